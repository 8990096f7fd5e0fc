//! Layer 3: Algorithms
//!
//! # Purpose
//!
//! This layer implements the calibration stages:
//! - Residual aggregation and sample spooling
//! - Robust per-voxel extraction
//! - Voxel, radial-bin and sector validation
//! - Kernel smoothing
//! - Chebyshev compression and correction lookup
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
//! Layer 3: Algorithms ← You are here
//!   ↓
//! Layer 2: Math
//!   ↓
//! Layer 1: Primitives / Geometry
//! ```

/// Residual filtering and demultiplexing.
pub mod aggregation;

/// Per-sector sample storage.
pub mod spool;

/// Per-voxel and per-sector results.
pub mod results;

/// Robust per-voxel fitting.
pub mod fitting;

/// Validation state machine.
pub mod validation;

/// Kernel smoothing.
pub mod smoothing;

/// Chebyshev compression.
pub mod compression;

/// Correction lookup.
pub mod correction;
