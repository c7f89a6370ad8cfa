//! Index construction from chunk payload groups.
//!
//! Each group identifier is an object key holding a payload (see
//! [`crate::payload`]). Triples are appended in group order, then in chunk
//! order within the payload; the chunk ordinal becomes the triple's
//! [`FileLocation`].

use std::path::Path;
use std::time::Instant;

use thiserror::Error;
use triplex_core::simd::is_normalized;
use triplex_core::{FileLocation, FormatError, Index, IndexBuilder, IndexError};

use crate::config::BuildConfig;
use crate::objstore::{ObjectStore, ObjectStoreError};
use crate::payload::{parse_payload, ChunkRecord, PayloadError};

/// Squared-norm tolerance for the unit-length warning. Int8 storage alone
/// moves the squared norm of a unit vector by well under this.
const NORM_TOLERANCE: f32 = 0.05;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("No triples found; nothing to index")]
    EmptyIndex,

    #[error("Failed to fetch group {path}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: ObjectStoreError,
    },

    #[error("Bad payload in group {path}: {source}")]
    Payload {
        path: String,
        #[source]
        source: PayloadError,
    },

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),
}

/// Turns a payload record into its `f32` embedding.
pub trait VectorExtractor {
    fn extract(&self, record: &ChunkRecord, chunk: usize) -> Result<Vec<f32>, PayloadError>;
}

/// Decodes the embedding stored in the record itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedVectors;

impl VectorExtractor for EmbeddedVectors {
    fn extract(&self, record: &ChunkRecord, chunk: usize) -> Result<Vec<f32>, PayloadError> {
        record.vector(chunk)
    }
}

impl<F> VectorExtractor for F
where
    F: Fn(&ChunkRecord, usize) -> Result<Vec<f32>, PayloadError>,
{
    fn extract(&self, record: &ChunkRecord, chunk: usize) -> Result<Vec<f32>, PayloadError> {
        self(record, chunk)
    }
}

/// Fetch every group and build an index of its chunks.
pub fn build_index<S, E>(
    store: &S,
    groups: &[String],
    extractor: &E,
    config: &BuildConfig,
) -> Result<Index, BuildError>
where
    S: ObjectStore + ?Sized,
    E: VectorExtractor + ?Sized,
{
    let started = Instant::now();
    let mut builder = IndexBuilder::new(config.vector_type);
    let mut unnormalized = 0usize;

    for group in groups {
        let bytes = store.get(group).map_err(|source| BuildError::Fetch {
            path: group.clone(),
            source,
        })?;
        let records = parse_payload(&bytes).map_err(|source| BuildError::Payload {
            path: group.clone(),
            source,
        })?;

        for (chunk, record) in records.iter().enumerate() {
            let vector = extractor
                .extract(record, chunk)
                .map_err(|source| BuildError::Payload {
                    path: group.clone(),
                    source,
                })?;
            if config.warn_unnormalized && !is_normalized(&vector, NORM_TOLERANCE) {
                unnormalized += 1;
            }
            let location = FileLocation {
                chunk: u32::try_from(chunk).map_err(|_| IndexError::Capacity {
                    max: u32::MAX as usize,
                })?,
            };
            builder.push(&vector, group, location)?;
        }

        tracing::debug!("Group {}: {} chunks", group, records.len());
    }

    if unnormalized > 0 {
        tracing::warn!(
            "{} vectors are not unit length; scores will not be cosine similarities",
            unnormalized
        );
    }

    let index = builder.finish().map_err(|e| match e {
        IndexError::EmptyIndex => BuildError::EmptyIndex,
        other => BuildError::Index(other),
    })?;

    tracing::info!(
        "Built index: {} triples, dim {}, {} paths in {:?}",
        index.len(),
        index.dim(),
        index.paths().len(),
        started.elapsed()
    );
    Ok(index)
}

/// Build and save to `output`. Nothing is written when the build fails,
/// including when it finds no triples.
pub fn build_index_to_file<S, E, P>(
    store: &S,
    groups: &[String],
    extractor: &E,
    config: &BuildConfig,
    output: P,
) -> Result<(Index, u64), BuildError>
where
    S: ObjectStore + ?Sized,
    E: VectorExtractor + ?Sized,
    P: AsRef<Path>,
{
    let index = build_index(store, groups, extractor, config)?;
    let written = index.save(output)?;
    Ok((index, written))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objstore::MemoryObjectStore;
    use crate::payload::encode_payload;
    use triplex_core::VectorType;

    fn put_group(store: &MemoryObjectStore, key: &str, vectors: &[&[f32]]) {
        let records: Vec<ChunkRecord> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| ChunkRecord::from_vector(format!("{key} chunk {i}"), v, VectorType::Int8).unwrap())
            .collect();
        store.put(key, &encode_payload(&records).unwrap()).unwrap();
    }

    fn groups(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_triples_in_group_then_chunk_order() {
        let store = MemoryObjectStore::new();
        put_group(&store, "a.json", &[&[1.0, 0.0], &[0.0, 1.0]]);
        put_group(&store, "b.json", &[&[0.6, 0.8]]);

        let index = build_index(
            &store,
            &groups(&["b.json", "a.json"]),
            &EmbeddedVectors,
            &BuildConfig::default(),
        )
        .unwrap();

        assert_eq!(index.len(), 3);
        assert_eq!(index.dim(), 2);
        assert_eq!(index.paths(), &["b.json".to_string(), "a.json".to_string()]);
        let placed: Vec<(&str, u32)> = index
            .triples()
            .map(|t| (t.path(), t.location().chunk))
            .collect();
        assert_eq!(placed, vec![("b.json", 0), ("a.json", 0), ("a.json", 1)]);
    }

    #[test]
    fn test_duplicate_groups_share_a_path() {
        let store = MemoryObjectStore::new();
        put_group(&store, "a.json", &[&[1.0, 0.0]]);
        let index = build_index(
            &store,
            &groups(&["a.json", "a.json"]),
            &EmbeddedVectors,
            &BuildConfig::default(),
        )
        .unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.paths().len(), 1);
    }

    #[test]
    fn test_empty_groups_are_empty_index() {
        let store = MemoryObjectStore::new();
        store.put("empty.json", b"[]").unwrap();
        let err = build_index(
            &store,
            &groups(&["empty.json"]),
            &EmbeddedVectors,
            &BuildConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::EmptyIndex));

        let err = build_index(&store, &[], &EmbeddedVectors, &BuildConfig::default()).unwrap_err();
        assert!(matches!(err, BuildError::EmptyIndex));
    }

    #[test]
    fn test_dimension_mismatch_across_groups() {
        let store = MemoryObjectStore::new();
        put_group(&store, "a.json", &[&[1.0, 0.0]]);
        put_group(&store, "b.json", &[&[1.0, 0.0, 0.0]]);
        let err = build_index(
            &store,
            &groups(&["a.json", "b.json"]),
            &EmbeddedVectors,
            &BuildConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BuildError::Index(IndexError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_missing_group_is_fetch_error() {
        let store = MemoryObjectStore::new();
        let err = build_index(
            &store,
            &groups(&["gone.json"]),
            &EmbeddedVectors,
            &BuildConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::Fetch { ref path, .. } if path == "gone.json"));
    }

    #[test]
    fn test_custom_extractor_and_vector_type() {
        let store = MemoryObjectStore::new();
        put_group(&store, "a.json", &[&[1.0, 0.0], &[0.0, 1.0]]);

        // Ignore stored embeddings and derive one from the text length.
        let by_length = |record: &ChunkRecord, _chunk: usize| -> Result<Vec<f32>, PayloadError> {
            Ok(vec![record.text.len() as f32 / 100.0])
        };
        let config = BuildConfig {
            vector_type: VectorType::Float32,
            warn_unnormalized: false,
        };
        let index = build_index(&store, &groups(&["a.json"]), &by_length, &config).unwrap();
        assert_eq!(index.vector_type(), VectorType::Float32);
        assert_eq!(index.dim(), 1);
        assert_eq!(index.triple(0).unwrap().vector(), vec![0.14]);
    }

    #[test]
    fn test_to_file_writes_nothing_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("index.tpx");
        let store = MemoryObjectStore::new();
        store.put("empty.json", b"[]").unwrap();

        let err = build_index_to_file(
            &store,
            &groups(&["empty.json"]),
            &EmbeddedVectors,
            &BuildConfig::default(),
            &output,
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::EmptyIndex));
        assert!(!output.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
