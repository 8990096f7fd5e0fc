//! Reusable scratch space for per-voxel fitting and smoothing.
//!
//! ## Purpose
//!
//! A sector holds thousands of voxels, each fitted from its own sample list and then
//! smoothed from its neighborhood. This module provides workspaces that are
//! allocated once per sector task and recycled across voxels to keep allocator
//! pressure low.
//!
//! ## Design notes
//!
//! * **Lazy Expansion**: Buffers grow on demand and are never shrunk.
//! * **One per task**: Buffers are passed explicitly, so parallel sector tasks each own
//!   their workspace and no synchronization is required.
//!
//! ## Invariants
//!
//! * Buffers are only logically cleared between voxels.

use core::ops::{Deref, DerefMut};

// ============================================================================
// Slot - Unified Vector Abstraction
// ============================================================================

/// A reusable vector slot with automatic capacity management.
#[derive(Debug, Clone)]
pub struct Slot<T>(Vec<T>);

impl<T> Slot<T> {
    /// Create a new slot with the given initial capacity.
    #[inline]
    pub fn new(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// Clear the slot and make sure it can hold `capacity` items without growing.
    #[inline]
    pub fn reset(&mut self, capacity: usize) {
        self.0.clear();
        if self.0.capacity() < capacity {
            self.0.reserve(capacity);
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> Deref for Slot<T> {
    type Target = Vec<T>;
    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for Slot<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

// ============================================================================
// Fitter Workspace
// ============================================================================

/// Scratch buffers for the robust per-voxel fit.
#[derive(Debug, Default)]
pub struct FitBuffer {
    /// Indices of samples retained by the current selection.
    pub selected: Slot<usize>,
    /// Residuals of all samples with respect to the current line fit.
    pub residuals: Slot<f64>,
    /// Copy of values handed to in-place median/MAD routines.
    pub scratch: Slot<f64>,
    /// Δz values after removal of the radial coupling.
    pub dz: Slot<f64>,
}

impl FitBuffer {
    /// Create a buffer sized for voxels with about `n` samples.
    pub fn new(n: usize) -> Self {
        Self {
            selected: Slot::new(n),
            residuals: Slot::new(n),
            scratch: Slot::new(n),
            dz: Slot::new(n),
        }
    }
}

// ============================================================================
// Smoother Workspace
// ============================================================================

/// Scratch buffers for the weighted local polynomial regression.
#[derive(Debug, Default)]
pub struct SmoothBuffer {
    /// Linear indices of the neighbors with non-zero weight.
    pub neighbors: Slot<usize>,
    /// Normalized offsets of the neighbors from the target, per axis.
    pub offsets: Slot<[f64; 3]>,
    /// Kernel weight per neighbor.
    pub weights: Slot<f64>,
    /// Polynomial terms of the current row.
    pub terms: Slot<f64>,
}

impl SmoothBuffer {
    /// Create a buffer for up to `k` neighbors and `n_coeffs` coefficients.
    pub fn new(k: usize, n_coeffs: usize) -> Self {
        Self {
            neighbors: Slot::new(k),
            offsets: Slot::new(k),
            weights: Slot::new(k),
            terms: Slot::new(n_coeffs),
        }
    }
}
