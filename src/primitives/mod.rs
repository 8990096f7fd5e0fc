//! Layer 1: Primitives
//!
//! # Purpose
//!
//! Fundamental data structures shared by every other layer: errors, voxel
//! status flags and reusable scratch buffers.

/// Error types.
pub mod errors;

/// Voxel status flags.
pub mod flags;

/// Reusable scratch buffers.
pub mod buffer;
