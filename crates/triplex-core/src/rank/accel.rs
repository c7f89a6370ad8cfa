//! Accelerator backend built on `candle-core`.
//!
//! # Pipeline
//!
//! ```text
//! host matrix ──dequantize block──▶ device [rows × D] f32
//!                                        │ matmul query [D × 1]
//!                                        ▼
//!                                 device scores [rows]
//!                                        │ arg_sort desc
//!                                        ▼
//!                   copy back leading band only (ids + scores)
//!                                        │
//!                                        ▼
//!          host rescoring with cpu::score_row ─▶ select_top_k
//! ```
//!
//! A block whose device scores are not all finite is passed to the host
//! whole.
//!
//! The band for a block is every row whose device score is at least the
//! block's k-th best device score minus `parity_epsilon`. If device and host
//! scores differ by less than `parity_epsilon / 2` the band contains every
//! row the CPU backend would pick from that block, and because final scores
//! and ordering come from the host, both backends return the same triples in
//! the same order with the same score bits.

use candle_core::{Device, Tensor};

use super::config::{BackendKind, RankConfig};
use super::cpu::score_row;
use super::select::{select_top_k, Scored};
use super::{Backend, RankError};
use crate::store::Index;

/// Extra rows fetched beyond k before checking whether the band is complete.
const BAND_SLACK: usize = 8;

pub struct AcceleratorBackend {
    device: Device,
    label: String,
    chunk_rows: usize,
    epsilon: f32,
}

impl std::fmt::Debug for AcceleratorBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceleratorBackend")
            .field("device", &self.label)
            .field("chunk_rows", &self.chunk_rows)
            .field("epsilon", &self.epsilon)
            .finish()
    }
}

impl AcceleratorBackend {
    /// Open the device named by `config.backend`.
    ///
    /// Fails with `DeviceUnavailable` when the device is absent or support
    /// for it was not compiled in.
    pub fn new(config: &RankConfig) -> Result<Self, RankError> {
        config.validate()?;
        let kind = config.backend;
        let unavailable = |e: candle_core::Error| RankError::DeviceUnavailable {
            device: kind.to_string(),
            reason: e.to_string(),
        };
        let device = match kind {
            BackendKind::Host => Device::Cpu,
            BackendKind::Cuda(ordinal) => Device::new_cuda(ordinal).map_err(unavailable)?,
            BackendKind::Metal(ordinal) => Device::new_metal(ordinal).map_err(unavailable)?,
            BackendKind::Cpu => {
                return Err(RankError::InvalidConfig(
                    "cpu is not an accelerator backend".into(),
                ))
            }
        };

        Ok(Self {
            device,
            label: kind.to_string(),
            chunk_rows: config.device_chunk_rows,
            epsilon: config.parity_epsilon,
        })
    }

    /// Device scores for one block, then the band of candidate offsets
    /// (relative to the block start).
    fn block_band(
        &self,
        block: &[f32],
        rows: usize,
        dim: usize,
        query: &Tensor,
        k: usize,
    ) -> Result<Vec<u32>, RankError> {
        let matrix = Tensor::from_slice(block, (rows, dim), &self.device)?;
        let scores = matrix.matmul(query)?.squeeze(1)?;

        // Overflowing products produce inf or NaN, which the device sort and
        // the band floor cannot order. Hand the whole block to the host.
        let total: f32 = scores.sum_all()?.to_scalar()?;
        if !total.is_finite() {
            tracing::debug!("{}: non-finite device scores, keeping block", self.label);
            return Ok((0..rows as u32).collect());
        }

        let order = scores.arg_sort_last_dim(false)?;

        let kk = k.min(rows);
        let mut take = (kk + BAND_SLACK).min(rows);
        loop {
            let head = order.narrow(0, 0, take)?.contiguous()?;
            let head_scores: Vec<f32> = scores.index_select(&head, 0)?.to_vec1()?;
            let floor = head_scores[kk - 1] - self.epsilon;

            if take == rows || head_scores[take - 1] < floor {
                let keep = head_scores.partition_point(|&s| s >= floor);
                let mut ids: Vec<u32> = head.to_vec1()?;
                ids.truncate(keep);
                return Ok(ids);
            }
            take = (take * 2).min(rows);
        }
    }
}

impl Backend for AcceleratorBackend {
    fn name(&self) -> &str {
        &self.label
    }

    fn select(&self, index: &Index, query: &[f32], k: usize) -> Result<Vec<Scored>, RankError> {
        let n = index.len();
        let dim = index.dim();
        if k == 0 || n == 0 {
            return Ok(Vec::new());
        }
        let query_t = Tensor::from_slice(query, (dim, 1), &self.device)?;

        let mut host_block = vec![0.0f32; self.chunk_rows.min(n) * dim];
        let mut candidates: Vec<usize> = Vec::new();
        let mut blocks = 0usize;

        for start in (0..n).step_by(self.chunk_rows) {
            let rows = self.chunk_rows.min(n - start);
            if k >= rows {
                // Every row of this block is a candidate.
                candidates.extend(start..start + rows);
                continue;
            }

            let block = &mut host_block[..rows * dim];
            index.dequantize_rows_into(start..start + rows, block);
            let band = self.block_band(block, rows, dim, &query_t, k)?;
            candidates.extend(band.into_iter().map(|offset| start + offset as usize));
            blocks += 1;
        }

        tracing::debug!(
            "{}: {} device blocks, {} candidates for k={} of {}",
            self.label,
            blocks,
            candidates.len(),
            k,
            n
        );

        let mut scratch = vec![0.0f32; dim];
        let rescored = candidates
            .into_iter()
            .map(|position| Scored {
                position,
                score: score_row(index, query, position, &mut scratch),
            })
            .collect();
        Ok(select_top_k(rescored, k))
    }
}
