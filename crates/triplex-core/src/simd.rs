//! SIMD dot product
//!
//! Explicit intrinsics for aarch64 (NEON) and x86_64 (AVX2+FMA, detected at
//! runtime), with a scalar fallback LLVM auto-vectorizes.
//!
//! Index vectors are expected to be L2-normalized upstream, so the dot
//! product is the cosine similarity:
//! ```text
//! cos(θ) = A · B  when ||A|| = ||B|| = 1
//! ```
//!
//! Every kernel has a fixed accumulation order for a given length, so the
//! same inputs always produce the same bits on the same machine. Ranking
//! determinism relies on this.

#[cfg(target_arch = "aarch64")]
#[inline(always)]
unsafe fn dot_neon(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::aarch64::*;

    let lanes = a.len() / 4;
    let mut acc = vdupq_n_f32(0.0);
    let (pa, pb) = (a.as_ptr(), b.as_ptr());

    for i in 0..lanes {
        acc = vfmaq_f32(acc, vld1q_f32(pa.add(i * 4)), vld1q_f32(pb.add(i * 4)));
    }

    let mut sum = vaddvq_f32(acc);
    for i in lanes * 4..a.len() {
        sum += a[i] * b[i];
    }
    sum
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
#[inline]
unsafe fn dot_avx2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let lanes = a.len() / 8;
    let mut acc = _mm256_setzero_ps();
    let (pa, pb) = (a.as_ptr(), b.as_ptr());

    // Scratch rows carry no alignment guarantee.
    for i in 0..lanes {
        let va = _mm256_loadu_ps(pa.add(i * 8));
        let vb = _mm256_loadu_ps(pb.add(i * 8));
        acc = _mm256_fmadd_ps(va, vb, acc);
    }

    let mut sum = hsum256(acc);
    for i in lanes * 8..a.len() {
        sum += a[i] * b[i];
    }
    sum
}

/// Horizontal sum of 8 lanes.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn hsum256(v: std::arch::x86_64::__m256) -> f32 {
    use std::arch::x86_64::*;

    let sum128 = _mm_add_ps(_mm256_castps256_ps128(v), _mm256_extractf128_ps(v, 1));
    let sums = _mm_add_ps(sum128, _mm_movehdup_ps(sum128));
    _mm_cvtss_f32(_mm_add_ss(sums, _mm_movehl_ps(sums, sums)))
}

#[inline(always)]
fn dot_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Dot product of two equal-length vectors.
#[inline(always)]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector length mismatch");

    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { dot_neon(a, b) };
    }

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return unsafe { dot_avx2(a, b) };
        }
    }

    #[allow(unreachable_code)]
    dot_scalar(a, b)
}

/// Euclidean norm.
#[inline]
pub fn l2_norm(v: &[f32]) -> f32 {
    dot_product(v, v).sqrt()
}

/// L2-normalize in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Whether `v` has unit length within `tolerance`.
#[inline]
pub fn is_normalized(v: &[f32], tolerance: f32) -> bool {
    (dot_product(v, v) - 1.0).abs() < tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_product_basic() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        assert!((dot_product(&a, &b) - 70.0).abs() < 1e-6);
    }

    #[test]
    fn test_dot_product_matches_scalar_across_lengths() {
        // Covers the remainder loops of both the 4- and 8-lane kernels.
        for dim in [1usize, 3, 4, 7, 8, 9, 15, 16, 17, 31, 33, 1536] {
            let a: Vec<f32> = (0..dim).map(|i| ((i * 7) % 11) as f32 / 11.0 - 0.5).collect();
            let b: Vec<f32> = (0..dim).map(|i| ((i * 3) % 5) as f32 / 5.0 - 0.5).collect();
            let expected = dot_scalar(&a, &b);
            assert!(
                (dot_product(&a, &b) - expected).abs() < 1e-3,
                "dim {dim}"
            );
        }
    }

    #[test]
    fn test_dot_product_is_repeatable() {
        let a: Vec<f32> = (0..1536).map(|i| (i as f32 * 0.37).sin()).collect();
        let b: Vec<f32> = (0..1536).map(|i| (i as f32 * 0.11).cos()).collect();
        let first = dot_product(&a, &b);
        for _ in 0..8 {
            assert_eq!(dot_product(&a, &b).to_bits(), first.to_bits());
        }
    }

    #[test]
    fn test_orthogonal_and_parallel() {
        let x = [1.0f32, 0.0, 0.0];
        let y = [0.0f32, 1.0, 0.0];
        assert_eq!(dot_product(&x, &y), 0.0);
        assert_eq!(dot_product(&x, &x), 1.0);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert!(is_normalized(&v, 1e-5));
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0f32; 64];
        l2_normalize(&mut v);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_is_normalized_edge_cases() {
        assert!(is_normalized(&[1.0, 0.0, 0.0], 1e-6));
        assert!(is_normalized(&[0.9999999, 0.0, 0.0], 1e-5));
        assert!(!is_normalized(&[0.5, 0.0, 0.0], 1e-5));
    }

    #[test]
    fn test_dispatch_matches_scalar() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(11);
        for dim in [1, 3, 7, 8, 9, 31, 128, 1536] {
            let a: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
            let b: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
            let fast = dot_product(&a, &b);
            assert!((fast - dot_scalar(&a, &b)).abs() < 1e-4, "dim={dim}");
            assert_eq!(fast.to_bits(), dot_product(&a, &b).to_bits());
        }
    }
}
