//! Resolves ranked triples to their chunk text.
//!
//! The cache is keyed by `(path, location)`. Resolving any key of an
//! unseen path fetches that path's payload once and caches every chunk in
//! it, so each key costs at most one successful object-store fetch per
//! fetcher. A fetch that fails (store error or bad payload) is returned to
//! the caller and leaves the path unloaded; the next resolve of that path
//! tries the store again. Nothing retries internally.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use triplex_core::{FileLocation, RankedResult, TripleRef};

use crate::objstore::{ObjectStore, ObjectStoreError};
use crate::payload::{parse_payload, PayloadError};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to fetch {path}: {source}")]
    Store {
        path: String,
        #[source]
        source: ObjectStoreError,
    },

    #[error("Bad payload in {path}: {source}")]
    Payload {
        path: String,
        #[source]
        source: PayloadError,
    },

    #[error("Chunk {chunk} not present in {path}")]
    MissingChunk { path: String, chunk: FileLocation },
}

#[derive(Default)]
struct Cache {
    texts: HashMap<(String, FileLocation), Arc<str>>,
    loaded_paths: HashSet<String>,
}

pub struct ChunkFetcher<S> {
    store: S,
    cache: Mutex<Cache>,
    remote_fetches: AtomicUsize,
}

impl<S: ObjectStore> ChunkFetcher<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: Mutex::new(Cache::default()),
            remote_fetches: AtomicUsize::new(0),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Number of payloads fetched from the store so far.
    pub fn remote_fetches(&self) -> usize {
        self.remote_fetches.load(Ordering::Relaxed)
    }

    /// Number of cached chunk texts.
    pub fn cached(&self) -> usize {
        self.cache.lock().texts.len()
    }

    pub fn resolve(&self, triple: TripleRef<'_>) -> Result<Arc<str>, FetchError> {
        self.resolve_key(triple.path(), triple.location())
    }

    pub fn resolve_key(&self, path: &str, location: FileLocation) -> Result<Arc<str>, FetchError> {
        // Held across the fetch: concurrent misses on one path wait for the
        // first caller instead of fetching again.
        let mut cache = self.cache.lock();

        let key = (path.to_string(), location);
        if let Some(text) = cache.texts.get(&key) {
            tracing::debug!("Chunk cache hit: {}{}", path, location);
            return Ok(Arc::clone(text));
        }

        if !cache.loaded_paths.contains(path) {
            self.load_group(&mut cache, path)?;
        }

        cache
            .texts
            .get(&key)
            .cloned()
            .ok_or_else(|| FetchError::MissingChunk {
                path: path.to_string(),
                chunk: location,
            })
    }

    /// Resolve a ranked list in order.
    pub fn resolve_all(&self, results: &[RankedResult<'_>]) -> Result<Vec<Arc<str>>, FetchError> {
        results.iter().map(|r| self.resolve(r.triple)).collect()
    }

    fn load_group(&self, cache: &mut Cache, path: &str) -> Result<(), FetchError> {
        self.remote_fetches.fetch_add(1, Ordering::Relaxed);
        let bytes = self.store.get(path).map_err(|source| FetchError::Store {
            path: path.to_string(),
            source,
        })?;
        let records = parse_payload(&bytes).map_err(|source| FetchError::Payload {
            path: path.to_string(),
            source,
        })?;

        tracing::debug!("Fetched {} ({} chunks)", path, records.len());
        for (chunk, record) in records.into_iter().enumerate() {
            let Ok(chunk) = u32::try_from(chunk) else {
                break;
            };
            cache.texts.insert(
                (path.to_string(), FileLocation { chunk }),
                Arc::from(record.text),
            );
        }
        cache.loaded_paths.insert(path.to_string());
        Ok(())
    }
}
