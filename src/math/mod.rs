//! Layer 2: Math
//!
//! # Purpose
//!
//! This layer provides pure mathematical functions used throughout the calibration:
//! - Robust statistics (median, MAD, clipped Gaussian scale, LTM)
//! - Kernel functions for distance-based weighting
//! - Weighted least squares
//! - Chebyshev basis evaluation
//!
//! These are reusable mathematical building blocks with no detector-specific logic.
//!
//! # Architecture
//!
//! ```text
//! Layer 6: API
//!   ↓
//! Layer 5: Engine
//!   ↓
//! Layer 4: Evaluation
//!   ↓
//! Layer 3: Algorithms
//!   ↓
//! Layer 2: Math ← You are here
//!   ↓
//! Layer 1: Primitives / Geometry
//! ```

/// Kernel (weight) functions for distance-based weighting.
pub mod kernel;

/// Median, MAD and clipped-Gaussian scale estimators.
pub mod robust;

/// Least Trimmed Mean estimators.
pub mod ltm;

/// Weighted least-squares backend.
pub mod linalg;

/// Chebyshev basis evaluation.
pub mod chebyshev;
