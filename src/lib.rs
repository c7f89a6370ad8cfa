//! Triplex: brute-force top-k retrieval over a quantized triples index
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 CLI (ingest · build · search)               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │  builder: payload groups │   │  fetch: triple → chunk text  │
//! │  → IndexBuilder → file   │   │  cached per (path, chunk)    │
//! └──────────────────────────┘   └──────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        triplex-core: codec · index store · ranking          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          ObjectStore (local directory / in-memory)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod builder;
pub mod chunking;
pub mod config;
pub mod fetch;
pub mod objstore;
pub mod payload;

pub use triplex_core::{
    baseline_top_k, top_k, BackendKind, FileLocation, FormatError, Index, IndexBuilder,
    LoadOptions, RankConfig, RankError, RankedResult, Ranker, TripleRef, VectorType,
};

pub use builder::{build_index, build_index_to_file, BuildError, EmbeddedVectors, VectorExtractor};
pub use config::{BuildConfig, Config};
pub use fetch::{ChunkFetcher, FetchError};
pub use objstore::{LocalObjectStore, MemoryObjectStore, ObjectStore};
pub use payload::ChunkRecord;
