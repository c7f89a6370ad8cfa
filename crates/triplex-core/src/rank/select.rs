//! Top-k selection with a total, backend-independent order.
//!
//! Order: score descending (`f32::total_cmp`), then position ascending.
//! Selection partitions with `select_nth_unstable_by` (expected O(N)) and
//! sorts only the k survivors.

use std::cmp::Ordering;

/// A scored index position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub position: usize,
    pub score: f32,
}

/// Ranking order; `Less` means `a` ranks ahead of `b`.
#[inline]
pub fn rank_order(a: &Scored, b: &Scored) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.position.cmp(&b.position))
}

/// Keep the `k` best candidates, sorted best-first.
pub fn select_top_k(mut candidates: Vec<Scored>, k: usize) -> Vec<Scored> {
    let k = k.min(candidates.len());
    if k == 0 {
        return Vec::new();
    }
    if k < candidates.len() {
        candidates.select_nth_unstable_by(k - 1, rank_order);
        candidates.truncate(k);
    }
    candidates.sort_unstable_by(rank_order);
    candidates
}

/// Full sort of every candidate; the naive reference the fast path is
/// checked against.
pub fn sort_all(mut candidates: Vec<Scored>) -> Vec<Scored> {
    candidates.sort_by(rank_order);
    candidates
}
