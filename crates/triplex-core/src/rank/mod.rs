//! Top-k ranking engine
//!
//! ```text
//! query ─▶ validate (dim, finite) ─▶ clamp k to N
//!        ─▶ Backend::select  (score every row, partition, sort k)
//!        ─▶ RankedResult { triple, score } best-first
//! ```
//!
//! Two backends implement [`Backend`]: [`CpuBackend`] and
//! [`AcceleratorBackend`]. Both report scores from the same host scoring
//! function and order results with [`select::rank_order`] (score
//! descending, position ascending), so for the same index, query and k they
//! return the same triples in the same order.
//!
//! Scores are plain dot products. Vectors are expected to be L2-normalized
//! before they reach the index; the engine does not re-normalize.

pub mod accel;
pub mod config;
pub mod cpu;
pub mod select;

use std::time::Instant;

use thiserror::Error;

pub use accel::AcceleratorBackend;
pub use config::{BackendKind, RankConfig};
pub use cpu::CpuBackend;
pub use select::Scored;

use crate::store::{Index, TripleRef};

#[derive(Error, Debug)]
pub enum RankError {
    #[error("Dimension mismatch: index has {expected} dimensions, query has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Query component {index} is not finite")]
    NonFiniteQuery { index: usize },

    #[error("Device {device} unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    #[error("Device error: {0}")]
    Device(#[from] candle_core::Error),

    #[error("Unknown backend: {0:?}")]
    UnknownBackend(String),

    #[error("Invalid rank config: {0}")]
    InvalidConfig(String),
}

/// An execution strategy for the ranking contract.
///
/// Callers guarantee `query.len() == index.dim()`, every query component is
/// finite, and `1 <= k <= index.len()`. Implementations return exactly `k`
/// entries ordered by [`select::rank_order`].
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn select(&self, index: &Index, query: &[f32], k: usize) -> Result<Vec<Scored>, RankError>;
}

/// One ranked triple.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedResult<'a> {
    pub triple: TripleRef<'a>,
    pub score: f32,
}

impl RankedResult<'_> {
    #[inline]
    pub fn position(&self) -> usize {
        self.triple.position()
    }
}

/// Query entry point holding the chosen backend.
pub struct Ranker {
    backend: Box<dyn Backend>,
    config: RankConfig,
}

impl std::fmt::Debug for Ranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ranker")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}

impl Ranker {
    /// Build a ranker for `config`.
    ///
    /// An unavailable accelerator is not an error: the ranker logs a
    /// warning and runs the CPU backend instead.
    pub fn new(config: RankConfig) -> Result<Self, RankError> {
        config.validate()?;

        let backend: Box<dyn Backend> = if config.backend.is_accelerator() {
            match AcceleratorBackend::new(&config) {
                Ok(accel) => {
                    tracing::info!("Ranking on accelerator {}", accel.name());
                    Box::new(accel)
                }
                Err(RankError::DeviceUnavailable { device, reason }) => {
                    tracing::warn!(
                        "Accelerator {} unavailable ({}), falling back to cpu",
                        device,
                        reason
                    );
                    Box::new(CpuBackend::new(config.parallel))
                }
                Err(e) => return Err(e),
            }
        } else {
            Box::new(CpuBackend::new(config.parallel))
        };

        Ok(Self { backend, config })
    }

    /// CPU ranker with default settings.
    pub fn cpu() -> Self {
        Self {
            backend: Box::new(CpuBackend::default()),
            config: RankConfig::default(),
        }
    }

    /// Ranker over a caller-supplied backend.
    pub fn with_backend(backend: Box<dyn Backend>, config: RankConfig) -> Self {
        Self { backend, config }
    }

    /// Name of the backend actually in use.
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn config(&self) -> &RankConfig {
        &self.config
    }

    /// The `min(k, N)` highest-scoring triples, best first.
    pub fn top_k<'a>(
        &self,
        index: &'a Index,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RankedResult<'a>>, RankError> {
        validate_query(index, query)?;

        let k = k.min(index.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let selected = self.backend.select(index, query, k)?;
        debug_assert_eq!(selected.len(), k);

        tracing::debug!(
            "top_k: backend={} k={} n={} in {:?}",
            self.backend.name(),
            k,
            index.len(),
            started.elapsed()
        );

        Ok(attach(index, selected))
    }
}

fn validate_query(index: &Index, query: &[f32]) -> Result<(), RankError> {
    if query.len() != index.dim() {
        return Err(RankError::DimensionMismatch {
            expected: index.dim(),
            actual: query.len(),
        });
    }
    if let Some(i) = query.iter().position(|x| !x.is_finite()) {
        return Err(RankError::NonFiniteQuery { index: i });
    }
    Ok(())
}

fn attach(index: &Index, selected: Vec<Scored>) -> Vec<RankedResult<'_>> {
    selected
        .into_iter()
        .filter_map(|s| {
            index.triple(s.position).map(|triple| RankedResult {
                triple,
                score: s.score,
            })
        })
        .collect()
}

/// Rank with the default CPU backend.
pub fn top_k<'a>(
    index: &'a Index,
    query: &[f32],
    k: usize,
) -> Result<Vec<RankedResult<'a>>, RankError> {
    Ranker::cpu().top_k(index, query, k)
}

/// Reference ranking: score everything, fully sort, slice.
pub fn baseline_top_k<'a>(
    index: &'a Index,
    query: &[f32],
    k: usize,
) -> Result<Vec<RankedResult<'a>>, RankError> {
    validate_query(index, query)?;
    let mut all = select::sort_all(cpu::score_all(index, query, false));
    all.truncate(k);
    Ok(attach(index, all))
}
