use approx::assert_relative_eq;
use tpc_dcalib::prelude::*;

fn geometry() -> VoxelGeometry {
    VoxelGeometry::new(&GeometryConfig {
        radial_binning: RadialBinning::Uniform { n_bins: 8 },
        row_regions: vec![RowRegion {
            first_x: 100.5,
            pitch: 1.0,
            n_rows: 40,
        }],
        n_y2x_bins: 5,
        n_z2x_bins: 3,
        max_z2x: 1.0,
        dead_zone: 1.5,
    })
    .unwrap()
}

fn field(p: [f64; 3]) -> [f64; N_DIMS] {
    [
        0.1 + 0.002 * (p[0] - 120.0),
        0.05 + 0.5 * p[1] + 0.2 * p[1] * p[2],
        -0.02 + 0.1 * p[2] * p[2],
        0.1 + 0.001 * p[0],
    ]
}

/// Validated and smoothed sector carrying `field`.
fn smoothed_sector(geo: &VoxelGeometry, sector: usize, hole: Option<VoxelBin>) -> SectorResults {
    let mut results = SectorResults::new(geo, sector, SectorCounts::default());
    for voxel in &mut results.voxels {
        let c = geo.voxel_center(sector, voxel.bin);
        voxel.state = VoxelState::Fitted;
        voxel.stat = VoxelStats {
            mean: c,
            entries: 100,
        };
        voxel.d = field([c[0], c[1], c[2].abs()]);
        voxel.dy_sig_mad = 0.1;
        voxel.dz_sig_ltm = 0.1;
        voxel.flags = VoxelFlags::DIST_DONE | VoxelFlags::DISP_DONE;
    }
    if let Some(bin) = hole {
        let voxel = &mut results.voxels[geo.linear_index(bin)];
        voxel.failure = Some(FitFailure::NotEnoughStatistics {
            entries: 3,
            required: 15,
        });
    }

    let validation = ValidationConfig::default();
    VoxelValidator::new(&validation).validate(geo, &mut results);
    let smoothing = SmoothingConfig::default();
    let mut buf = SmoothBuffer::new(smoothing.max_neighbors(), smoothing.max_coeffs());
    KernelSmoother::new(&smoothing, geo).smooth_sector(&mut results, &mut buf);
    results
}

// ============================================================================
// Round-Trip Tests
// ============================================================================

#[test]
fn test_round_trip_within_precision() {
    let geo = geometry();
    let mut sector = smoothed_sector(&geo, 0, None);
    let cfg = ChebyshevConfig::default();
    let map = ChebyshevCompressor::new(&cfg, &geo).compress(&mut sector);

    assert_eq!(map.status, SectorStatus::Usable);
    assert_eq!(map.slices.len(), 1);
    let params = map.slices[0].params.as_ref().unwrap();
    assert_eq!(params.len(), N_DIMS);
    assert!(params.iter().all(|p| p.precision_met));

    for voxel in &sector.voxels {
        let [x, y2x, z2x] = geo.voxel_center(0, voxel.bin);
        let value = map.evaluate(&geo, x, y2x, z2x).unwrap();
        for dim in 0..N_DIMS {
            assert!((voxel.dc[dim] - voxel.ds[dim]).abs() <= cfg.precision[dim]);
            assert_relative_eq!(value[dim], voxel.dc[dim], epsilon = 1e-9);
        }
    }
}

#[test]
fn test_sliced_round_trip() {
    let geo = geometry();
    let mut sector = smoothed_sector(&geo, 0, None);
    let cfg = ChebyshevConfig {
        n_y_slices: 2,
        n_z_slices: 3,
        ..ChebyshevConfig::default()
    };
    let map = ChebyshevCompressor::new(&cfg, &geo).compress(&mut sector);

    assert_eq!(map.slices.len(), 6);
    assert_eq!(map.slices[0].y_bins, 0..2);
    assert_eq!(map.slices[5].y_bins, 2..5);
    assert_eq!(map.slices[5].z_bins, 2..3);
    for voxel in &sector.voxels {
        for dim in 0..N_DIMS {
            assert!((voxel.dc[dim] - voxel.ds[dim]).abs() <= cfg.precision[dim]);
        }
    }
}

#[test]
fn test_low_order_cap_misses_precision() {
    let geo = geometry();
    let mut sector = smoothed_sector(&geo, 0, None);
    let cfg = ChebyshevConfig {
        precision: [1e-6; N_DIMS],
        max_order: [0, 0, 0],
        ..ChebyshevConfig::default()
    };
    let map = ChebyshevCompressor::new(&cfg, &geo).compress(&mut sector);
    let params = map.slices[0].params.as_ref().unwrap();

    // Best available fit is kept even though the precision is not reached
    assert!(!params[Dim::Y.index()].precision_met);
    assert_eq!(params[Dim::Y.index()].orders, [0, 0, 0]);
    assert!(params[Dim::Y.index()].max_error > 1e-6);
}

#[test]
fn test_bridged_voxel_outside_fit_domain() {
    let geo = geometry();
    let hole = VoxelBin::new(4, 2, 1);
    let mut sector = smoothed_sector(&geo, 0, Some(hole));
    let id = geo.linear_index(hole);
    assert_eq!(sector.voxels[id].state, VoxelState::Invalid);
    assert!(sector.voxels[id].flags.contains(VoxelFlags::SMOOTH_DONE));

    // A bogus smoothed value must not leak into the parameterization
    sector.voxels[id].ds = [100.0; N_DIMS];
    let cfg = ChebyshevConfig::default();
    ChebyshevCompressor::new(&cfg, &geo).compress(&mut sector);

    let reference = smoothed_sector(&geo, 0, None);
    for dim in 0..N_DIMS {
        assert!((sector.voxels[id].dc[dim] - reference.voxels[id].ds[dim]).abs() < 0.01);
    }
}

// ============================================================================
// Domain Tests
// ============================================================================

#[test]
fn test_blocked_sector_yields_no_values() {
    let geo = geometry();
    let mut sector = smoothed_sector(&geo, 0, None);
    sector.status = SectorStatus::Blocked(BlockReason::TooManyBadRows);
    let cfg = ChebyshevConfig::default();
    let map = ChebyshevCompressor::new(&cfg, &geo).compress(&mut sector);

    assert!(map.slices.iter().all(|s| s.params.is_none()));
    assert_eq!(map.evaluate(&geo, 120.0, 0.0, 0.5), None);
    assert!(sector.voxels.iter().all(|v| v.dc == [0.0; N_DIMS]));
}

#[test]
fn test_evaluate_outside_domain() {
    let geo = geometry();
    let mut sector = smoothed_sector(&geo, 0, None);
    let cfg = ChebyshevConfig::default();
    let map = ChebyshevCompressor::new(&cfg, &geo).compress(&mut sector);

    assert!(map.evaluate(&geo, 120.0, 0.0, 0.5).is_some());
    assert_eq!(map.evaluate(&geo, 99.0, 0.0, 0.5), None);
    assert_eq!(map.evaluate(&geo, 120.0, 0.17, 0.5), None);
    assert_eq!(map.evaluate(&geo, 120.0, 0.0, 1.5), None);
    assert_eq!(map.evaluate(&geo, 120.0, 0.0, -0.1), None);
}

#[test]
fn test_routed_residuals_near_sector_edge_get_corrections() {
    let geo = geometry();
    let mut sector = smoothed_sector(&geo, 0, None);
    let cfg = ChebyshevConfig::default();
    let map = CorrectionMap::new(
        geo.clone(),
        vec![ChebyshevCompressor::new(&cfg, &geo).compress(&mut sector)],
    );

    for ix in 0..geo.n_x_bins() {
        // Inner part of the bin, where the dead zone at x is wider than at the center
        let x = geo.x_center(ix) - 0.45 * geo.x_bin_width(ix);
        let edge = geo.max_y2x(ix) - 1e-6;
        for y2x in [edge, -edge] {
            let bin = geo.locate(0, x, y2x, 0.5).unwrap();
            assert_eq!(bin.ix as usize, ix);
            assert!(map.correction(0, x, y2x, 0.5).is_valid(), "x {x} y2x {y2x}");
        }
    }
}

#[test]
fn test_discarded_radial_bin_has_no_correction() {
    let geo = geometry();
    let mut results = smoothed_sector(&geo, 0, None);
    // Discard the outermost radial bin
    let per_bin = geo.n_y2x_bins() * geo.n_z2x_bins();
    for voxel in &mut results.voxels[7 * per_bin..] {
        voxel.failure = Some(FitFailure::Singular);
    }
    let validation = ValidationConfig::default();
    VoxelValidator::new(&validation).validate(&geo, &mut results);
    assert_eq!(results.x_bins[7].state, RadialBinState::Discarded);

    let cfg = ChebyshevConfig::default();
    let map = ChebyshevCompressor::new(&cfg, &geo).compress(&mut results);
    assert!(map.evaluate(&geo, 137.5, 0.0, 0.5).is_none());
    assert!(map.evaluate(&geo, 132.5, 0.0, 0.5).is_some());
}

// ============================================================================
// Correction Map Tests
// ============================================================================

#[test]
fn test_correction_is_negated_distortion() {
    let geo = geometry();
    let mut a_side = smoothed_sector(&geo, 3, None);
    let mut c_side = smoothed_sector(&geo, 21, None);
    let cfg = ChebyshevConfig::default();
    let compressor = ChebyshevCompressor::new(&cfg, &geo);
    let maps = vec![compressor.compress(&mut c_side), compressor.compress(&mut a_side)];
    let map = CorrectionMap::new(geo.clone(), maps);

    let d = map.distortion(3, 121.0, 0.02, 0.4).unwrap();
    let c = map.correction(3, 121.0, 0.02, 0.4);
    assert!(c.is_valid());
    assert_relative_eq!(c.dx, -d[Dim::X.index()]);
    assert_relative_eq!(c.dy, -d[Dim::Y.index()]);
    assert_relative_eq!(c.dz, -d[Dim::Z.index()]);
    assert_eq!(map.dispersion(3, 121.0, 0.02, 0.4), Some(d[Dim::D.index()]));

    // The C side is queried with negative z/x and sees the same field
    let dc = map.distortion(21, 121.0, 0.02, -0.4).unwrap();
    for dim in 0..N_DIMS {
        assert_relative_eq!(dc[dim], d[dim], epsilon = 1e-9);
    }
    assert!(!map.correction(21, 121.0, 0.02, 0.4).is_valid());
}

#[test]
fn test_missing_sector_is_invalid() {
    let geo = geometry();
    let map = CorrectionMap::new(geo, Vec::new());
    let c = map.correction(5, 121.0, 0.0, 0.4);
    assert_eq!(c, Correction::NONE);
    assert!(!map.is_usable(5));
    assert!(!map.correction(40, 121.0, 0.0, 0.4).is_valid());
    assert!(!map.correction(5, f64::NAN, 0.0, 0.4).is_valid());
}
