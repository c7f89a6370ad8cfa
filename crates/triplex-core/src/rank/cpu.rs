//! Host backend: one pass over the in-memory matrix.

use rayon::prelude::*;

use super::select::{select_top_k, Scored};
use super::{Backend, RankError};
use crate::simd::dot_product;
use crate::store::Index;

/// Below this many rows per rayon task the split overhead dominates.
const PAR_MIN_ROWS: usize = 2048;

/// Canonical score of one row: dot product of the query with the
/// dequantized row. Every backend reports scores computed here.
#[inline]
pub(crate) fn score_row(index: &Index, query: &[f32], position: usize, scratch: &mut [f32]) -> f32 {
    index.dequantize_row_into(position, scratch);
    dot_product(query, scratch)
}

/// Score every row. Row scores are independent of one another, so the
/// parallel and sequential paths produce identical output.
pub(crate) fn score_all(index: &Index, query: &[f32], parallel: bool) -> Vec<Scored> {
    let dim = index.dim();
    if parallel && index.len() >= 2 * PAR_MIN_ROWS {
        (0..index.len())
            .into_par_iter()
            .with_min_len(PAR_MIN_ROWS)
            .map_init(
                || vec![0.0f32; dim],
                |scratch, position| Scored {
                    position,
                    score: score_row(index, query, position, scratch),
                },
            )
            .collect()
    } else {
        let mut scratch = vec![0.0f32; dim];
        (0..index.len())
            .map(|position| Scored {
                position,
                score: score_row(index, query, position, &mut scratch),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CpuBackend {
    parallel: bool,
}

impl CpuBackend {
    pub fn new(parallel: bool) -> Self {
        Self { parallel }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn select(&self, index: &Index, query: &[f32], k: usize) -> Result<Vec<Scored>, RankError> {
        Ok(select_top_k(score_all(index, query, self.parallel), k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::VectorType;
    use crate::store::{FileLocation, IndexBuilder};

    fn index_of(rows: &[Vec<f32>]) -> Index {
        let mut builder = IndexBuilder::new(VectorType::Float32);
        for (i, row) in rows.iter().enumerate() {
            builder
                .push(row, "p", FileLocation { chunk: i as u32 })
                .unwrap();
        }
        builder.finish().unwrap()
    }

    #[test]
    fn test_scores_are_dot_products() {
        let index = index_of(&[vec![1.0, 0.0], vec![0.6, 0.8], vec![-1.0, 0.0]]);
        let scores = score_all(&index, &[1.0, 0.0], false);
        let values: Vec<f32> = scores.iter().map(|s| s.score).collect();
        assert_eq!(values, vec![1.0, 0.6, -1.0]);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let rows: Vec<Vec<f32>> = (0..5000)
            .map(|i| {
                let t = i as f32 * 0.013;
                vec![t.sin(), t.cos(), (2.0 * t).sin(), 0.5]
            })
            .collect();
        let index = index_of(&rows);
        let query = [0.3, -0.2, 0.9, 0.1];
        let seq = score_all(&index, &query, false);
        let par = score_all(&index, &query, true);
        assert_eq!(seq.len(), par.len());
        for (a, b) in seq.iter().zip(&par) {
            assert_eq!(a.position, b.position);
            assert_eq!(a.score.to_bits(), b.score.to_bits());
        }
    }

    #[test]
    fn test_select() {
        let index = index_of(&[vec![0.1, 0.0], vec![0.9, 0.0], vec![0.5, 0.0]]);
        let top = CpuBackend::new(false).select(&index, &[1.0, 0.0], 2).unwrap();
        assert_eq!(
            top.iter().map(|s| s.position).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }
}
