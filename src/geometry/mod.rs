//! Layer 1: Geometry
//!
//! # Purpose
//!
//! Deterministic, invertible mapping between sector-local coordinates
//! `(x, y/x, z/x)` and voxel indices, including the pad-row aligned radial
//! binning and the sector-edge dead zone.

/// Pad-row tables and radial binning modes.
pub mod rows;

/// Voxel binning and bin centers.
pub mod voxel;
