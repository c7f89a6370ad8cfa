//! Object storage for chunk payloads.
//!
//! Keys are relative, `/`-separated names such as `docs/intro.json`.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0:?}")]
    InvalidKey(String),

    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Byte-addressed store that payload groups are fetched from and uploaded to.
pub trait ObjectStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError>;

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), ObjectStoreError>;
}

impl<S: ObjectStore + ?Sized> ObjectStore for &S {
    fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), ObjectStoreError> {
        (**self).put(key, bytes)
    }
}

impl<S: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), ObjectStoreError> {
        (**self).put(key, bytes)
    }
}

/// Keys must be non-empty relative paths whose segments are plain names.
fn check_key(key: &str) -> Result<(), ObjectStoreError> {
    let valid = !key.contains('\\')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if valid {
        Ok(())
    } else {
        Err(ObjectStoreError::InvalidKey(key.to_string()))
    }
}

/// Directory-rooted store: key `a/b.json` lives at `<root>/a/b.json`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_to_path(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        check_key(key)?;
        Ok(self.root.join(key))
    }
}

impl ObjectStore for LocalObjectStore {
    fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let path = self.key_to_path(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(key.to_string()))
            }
            Err(source) => Err(ObjectStoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), ObjectStoreError> {
        let path = self.key_to_path(key)?;
        let io = |source| ObjectStoreError::Io {
            key: key.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);
        {
            let mut file = std::fs::File::create(&tmp_path).map_err(io)?;
            file.write_all(bytes).map_err(io)?;
            file.sync_all().map_err(io)?;
        }
        std::fs::rename(&tmp_path, &path).map_err(io)?;

        tracing::debug!("Stored object {} ({} bytes)", key, bytes.len());
        Ok(())
    }
}

/// In-process store. Counts `get` calls so callers can observe fetch traffic.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    gets: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get` calls served so far, including misses.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        check_key(key)?;
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), ObjectStoreError> {
        check_key(key)?;
        self.objects.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}
