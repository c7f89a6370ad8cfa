//! Triplex Core – Vector codec, triples index format and top-k ranking
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Ranking Engine                         │
//! │   CpuBackend (SIMD · rayon) · AcceleratorBackend (candle)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │        Index Store (matrix · path ids · locations)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │     Codec (int8 / f32)       ·   Format (.tpx, mmap load)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod format;
pub mod rank;
pub mod simd;
pub mod store;

pub use codec::{CodecError, VectorType};
pub use format::{FormatError, LoadOptions};
pub use rank::{
    baseline_top_k, top_k, BackendKind, RankConfig, RankError, RankedResult, Ranker,
};
pub use simd::{dot_product, l2_normalize};
pub use store::{FileLocation, Index, IndexBuilder, IndexError, IndexStats, TripleRef};
