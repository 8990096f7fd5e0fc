//! Robust location and scale of residual samples.
//!
//! ## Purpose
//!
//! The voxel fitter needs dispersions that stay close to the width of the
//! Gaussian core while a quarter of the samples are arbitrary outliers. This
//! module provides the building blocks:
//!
//! * the median and the Gaussian-consistent MAD sigma, used as a seed;
//! * an iterated `±k·sigma` clip around the seed whose variance is corrected for
//!   the truncation of the normal tails;
//! * the normal CDF, quantile and truncated-variance helpers shared with the LTM.
//!
//! ## Key concepts
//!
//! * **Seed**: The MAD has a 50% breakdown point but inflates with contamination,
//!   because outliers shift the median of the absolute deviations.
//! * **Refinement**: Outliers spread over a wide range contribute only their density
//!   inside `±k·sigma`, so the clipped estimate converges to the core width.
//! * **Truncation**: A normal population cut at `±k·sigma` keeps the variance
//!   fraction `1 - 2kφ(k) / (2Φ(k) - 1)`.
//!
//! ## Invariants
//!
//! * `sigma >= 0` for every estimate.
//! * Inputs given as `&[T]` are left untouched; `&mut [T]` inputs are reordered.

use core::cmp::Ordering::Equal;
use core::f64::consts::{FRAC_1_SQRT_2, PI};
use num_traits::Float;

/// Scale factor turning a MAD into the sigma of a normal distribution.
pub const MAD_TO_SIGMA: f64 = 1.482_602_218_505_602;

/// Relative sigma change below which the clipped estimate is settled.
const SETTLE_TOLERANCE: f64 = 1e-6;

/// Center, width and support of a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spread<T> {
    /// Location estimate.
    pub center: T,
    /// Gaussian-consistent width.
    pub sigma: T,
    /// Number of samples the estimate is based on.
    pub retained: usize,
}

// ============================================================================
// Median and MAD
// ============================================================================

/// Median of `values`, reordering them. Zero for an empty slice.
pub fn median<T: Float>(values: &mut [T]) -> T {
    let n = values.len();
    if n == 0 {
        return T::zero();
    }
    let mid = n / 2;
    let (lower, &mut upper, _) =
        values.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap_or(Equal));
    if n % 2 == 1 {
        return upper;
    }
    let below = lower.iter().copied().fold(T::neg_infinity(), T::max);
    (below + upper) * T::from(0.5).unwrap()
}

/// Median and Gaussian-consistent MAD sigma of `values`, reordering them.
pub fn mad_spread<T: Float>(values: &mut [T]) -> Spread<T> {
    let center = median(values);
    for v in values.iter_mut() {
        *v = (*v - center).abs();
    }
    Spread {
        center,
        sigma: median(values) * T::from(MAD_TO_SIGMA).unwrap(),
        retained: values.len(),
    }
}

// ============================================================================
// Clipped Refinement
// ============================================================================

/// Refine `start` by repeatedly keeping the samples within `nsigma` widths of the
/// current center and re-estimating the center and truncation-corrected width.
///
/// Stops when the retained set and the width are stable, after `max_iterations`
/// passes, or when fewer than two samples remain (the last usable estimate is
/// returned). A non-positive seed width is returned unchanged.
pub fn clipped_spread<T: Float>(
    values: &[T],
    start: Spread<T>,
    nsigma: T,
    max_iterations: usize,
) -> Spread<T> {
    let k = nsigma.to_f64().unwrap_or(0.0);
    let kept_variance = truncated_variance_at(k);
    let seeded = start.sigma > T::zero();
    if values.is_empty() || !seeded || kept_variance <= 0.0 {
        return start;
    }
    let rescale = T::from(kept_variance.sqrt()).unwrap();
    let tolerance = T::from(SETTLE_TOLERANCE).unwrap();

    let mut current = start;
    for _ in 0..max_iterations {
        let cut = nsigma * current.sigma;
        let mut n = 0usize;
        let mut sum = T::zero();
        let mut sum2 = T::zero();
        for &v in values {
            let d = v - current.center;
            if d.abs() <= cut {
                n += 1;
                sum = sum + d;
                sum2 = sum2 + d * d;
            }
        }
        if n < 2 {
            break;
        }

        let count = T::from(n).unwrap();
        let shift = sum / count;
        let var = ((sum2 - count * shift * shift) / (count - T::one())).max(T::zero());
        let next = Spread {
            center: current.center + shift,
            sigma: var.sqrt() / rescale,
            retained: n,
        };

        let settled = n == current.retained
            && (next.sigma - current.sigma).abs() <= tolerance * current.sigma;
        current = next;
        if settled || current.sigma <= T::zero() {
            break;
        }
    }
    current
}

// ============================================================================
// Normal Distribution Helpers
// ============================================================================

/// Variance kept by a standard normal truncated to `[-k, k]`.
///
/// One for an infinite cut, zero for a non-positive one.
pub fn truncated_variance_at(k: f64) -> f64 {
    if k.is_nan() || k <= 0.0 {
        return 0.0;
    }
    if k.is_infinite() {
        return 1.0;
    }
    let inside = 2.0 * normal_cdf(k) - 1.0;
    if inside <= 0.0 {
        return 0.0;
    }
    let density = (-0.5 * k * k).exp() / (2.0 * PI).sqrt();
    (1.0 - 2.0 * k * density / inside).clamp(0.0, 1.0)
}

/// Standard normal CDF.
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x * FRAC_1_SQRT_2))
}

/// Error function, Abramowitz and Stegun 7.1.26 (absolute error below 1.5e-7).
fn erf(x: f64) -> f64 {
    const P: f64 = 0.327_591_1;
    const A: [f64; 5] = [
        0.254_829_592,
        -0.284_496_736,
        1.421_413_741,
        -1.453_152_027,
        1.061_405_429,
    ];
    let ax = x.abs();
    let t = 1.0 / (1.0 + P * ax);
    let poly = t * (A[0] + t * (A[1] + t * (A[2] + t * (A[3] + t * A[4]))));
    let y = 1.0 - poly * (-ax * ax).exp();
    if x < 0.0 {
        -y
    } else {
        y
    }
}

/// Inverse of the standard normal CDF (Acklam's rational approximation).
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}
