//! Layer 5: Engine
//!
//! # Purpose
//!
//! Orchestration of the calibration: configuration validation, per-sector stage
//! execution and assembly of the final output.
//!
//! # Architecture
//!
//! ```text
//! Layer 6: API
//!   ↓
//! Layer 5: Engine ← You are here
//!   ↓
//! Layer 4: Evaluation
//!   ↓
//! Layer 3: Algorithms
//!   ↓
//! Layer 2: Math
//!   ↓
//! Layer 1: Primitives / Geometry
//! ```

/// Per-sector stage execution.
pub mod executor;

/// Configuration validation.
pub mod validator;

/// Calibration output.
pub mod output;
