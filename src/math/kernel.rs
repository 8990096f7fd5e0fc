//! Kernel (weight) functions for distance-based weighting.
//!
//! ## Purpose
//!
//! The kernel smoother weights every neighboring voxel by a function of its
//! normalized distance `u` from the target voxel. This module provides the
//! supported kernel shapes.
//!
//! ## Invariants
//!
//! * Weights are in [0, 1] and equal 1 at `u = 0`.
//! * Weights are non-increasing in `u`.

use num_traits::Float;

/// Kernel shape used by the local regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelShape {
    /// `w(u) = 1 - u^2` for `u < 1`, else 0.
    #[default]
    Epanechnikov,

    /// `w(u) = exp(-u^2 / 2)`, truncated only by the neighborhood window.
    Gaussian,
}

impl KernelShape {
    /// Weight for a squared normalized distance `u2`.
    #[inline]
    pub fn weight<T: Float>(&self, u2: T) -> T {
        match self {
            KernelShape::Epanechnikov => {
                if u2 < T::one() {
                    T::one() - u2
                } else {
                    T::zero()
                }
            }
            KernelShape::Gaussian => (-u2 / T::from(2.0).unwrap()).exp(),
        }
    }
}
