//! Least Trimmed Mean (LTM) location and scale estimation.
//!
//! ## Purpose
//!
//! This module implements the unbinned LTM estimator used for the Δz distortion
//! and for the pre-selection of Δy samples: among all windows of consecutive sorted
//! samples covering a fixed fraction of the population, the one with the smallest
//! spread is retained and its mean and standard deviation are reported.
//!
//! ## Design notes
//!
//! * **Pure**: Functions work on a local sorted copy; the caller's slice is untouched.
//! * **Sliding sums**: Window spreads are evaluated in O(n) after the O(n log n) sort,
//!   with values shifted by the median to limit cancellation.
//! * **Target sigma**: A variant bisects the retained count until the window
//!   sigma matches a requested value.
//!
//! ## Key concepts
//!
//! * **Breakdown point**: `1 - fraction` of the samples may be arbitrary outliers.
//! * **Consistency**: The sigma of a central Gaussian window of fraction `f` is
//!   smaller than the parent sigma; `consistent_sigma` undoes the truncation.
//!
//! ## Invariants
//!
//! * `1 <= retained <= n`.
//! * `sigma >= 0`.
//!
//! ## Non-goals
//!
//! * This module does not reject non-finite values (callers filter them).

use core::cmp::Ordering::Equal;
use num_traits::Float;

use crate::math::robust::{normal_quantile, truncated_variance_at};

/// Result of an LTM evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LtmEstimate<T> {
    /// Mean of the retained window.
    pub mean: T,
    /// Standard deviation of the retained window.
    pub sigma: T,
    /// Number of retained samples.
    pub retained: usize,
    /// Smallest retained value.
    pub low: T,
    /// Largest retained value.
    pub high: T,
}

impl<T: Float> LtmEstimate<T> {
    /// Fraction of the `total` samples kept by this window.
    #[inline]
    pub fn fraction(&self, total: usize) -> T {
        if total == 0 {
            return T::zero();
        }
        T::from(self.retained).unwrap() / T::from(total).unwrap()
    }

    /// Sigma rescaled to the parent Gaussian, assuming the window kept the
    /// central `retained / total` of a normal population.
    pub fn consistent_sigma(&self, total: usize) -> T {
        let f = self.fraction(total).to_f64().unwrap_or(1.0);
        let ratio = truncated_variance_ratio(f);
        if ratio <= 0.0 {
            return self.sigma;
        }
        self.sigma / T::from(ratio.sqrt()).unwrap()
    }

    /// Standard error of the window mean.
    #[inline]
    pub fn mean_error(&self) -> T {
        self.sigma / T::from(self.retained.max(1)).unwrap().sqrt()
    }
}

// ============================================================================
// Estimators
// ============================================================================

/// LTM over an unsorted sample, keeping `fraction` of the points.
///
/// Returns `None` for an empty sample.
pub fn ltm<T: Float>(values: &[T], fraction: T) -> Option<LtmEstimate<T>> {
    let sorted = sorted_copy(values);
    ltm_sorted(&sorted, fraction)
}

/// LTM over an already sorted sample.
pub fn ltm_sorted<T: Float>(sorted: &[T], fraction: T) -> Option<LtmEstimate<T>> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let keep = (fraction * T::from(n).unwrap())
        .to_usize()
        .unwrap_or(n)
        .clamp(1, n);
    Some(best_window(sorted, keep))
}

/// LTM whose retained fraction is adjusted until the window sigma matches
/// `target_sigma`.
///
/// The retained count is bisected between `min_fraction * n` and `n`; the largest
/// window whose sigma does not exceed the target is returned. If even the smallest
/// window is wider than the target, that smallest window is returned.
pub fn ltm_target_sigma<T: Float>(
    values: &[T],
    target_sigma: T,
    min_fraction: T,
) -> Option<LtmEstimate<T>> {
    let sorted = sorted_copy(values);
    let n = sorted.len();
    if n == 0 {
        return None;
    }

    let min_keep = (min_fraction * T::from(n).unwrap())
        .to_usize()
        .unwrap_or(1)
        .clamp(1, n);

    let mut best = best_window(&sorted, min_keep);
    if best.sigma > target_sigma {
        return Some(best);
    }

    let (mut lo, mut hi) = (min_keep, n);
    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;
        let est = best_window(&sorted, mid);
        if est.sigma <= target_sigma {
            best = est;
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    Some(best)
}

// ============================================================================
// Internals
// ============================================================================

fn sorted_copy<T: Float>(values: &[T]) -> Vec<T> {
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Equal));
    sorted
}

/// Find the window of `keep` consecutive sorted values with minimal variance.
fn best_window<T: Float>(sorted: &[T], keep: usize) -> LtmEstimate<T> {
    let n = sorted.len();
    let shift = sorted[n / 2];
    let inv = T::one() / T::from(keep).unwrap();

    let mut sum = T::zero();
    let mut sum2 = T::zero();
    for &v in &sorted[..keep] {
        let d = v - shift;
        sum = sum + d;
        sum2 = sum2 + d * d;
    }

    let mut best_start = 0;
    let mut best_var = sum2 * inv - (sum * inv) * (sum * inv);
    for start in 1..=(n - keep) {
        let out = sorted[start - 1] - shift;
        let inn = sorted[start + keep - 1] - shift;
        sum = sum + inn - out;
        sum2 = sum2 + inn * inn - out * out;
        let var = sum2 * inv - (sum * inv) * (sum * inv);
        if var < best_var {
            best_var = var;
            best_start = start;
        }
    }

    // Exact two-pass statistics on the chosen window
    let window = &sorted[best_start..best_start + keep];
    let mean = window.iter().fold(T::zero(), |acc, &v| acc + v) * inv;
    let var = window
        .iter()
        .fold(T::zero(), |acc, &v| acc + (v - mean) * (v - mean))
        * inv;

    LtmEstimate {
        mean,
        sigma: var.max(T::zero()).sqrt(),
        retained: keep,
        low: window[0],
        high: window[keep - 1],
    }
}

/// Variance of a standard normal truncated to its central fraction `f`.
fn truncated_variance_ratio(f: f64) -> f64 {
    if f >= 1.0 {
        return 1.0;
    }
    truncated_variance_at(normal_quantile(0.5 * (1.0 + f)))
}
