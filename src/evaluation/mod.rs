//! Layer 4: Evaluation
//!
//! # Purpose
//!
//! Post-processing of finished calibrations: coverage diagnostics and the
//! closure test on independent residuals.
//!
//! # Architecture
//!
//! ```text
//! Layer 6: API
//!   ↓
//! Layer 5: Engine
//!   ↓
//! Layer 4: Evaluation ← You are here
//!   ↓
//! Layer 3: Algorithms
//!   ↓
//! Layer 2: Math
//!   ↓
//! Layer 1: Primitives / Geometry
//! ```

/// Coverage and rejection diagnostics.
pub mod diagnostics;

/// Closure test.
pub mod closure;
