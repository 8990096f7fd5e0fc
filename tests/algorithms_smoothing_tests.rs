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

/// Linear distortion field in (x, y/x, |z/x|).
fn field(p: [f64; 3]) -> [f64; N_DIMS] {
    [
        0.1 + 0.002 * (p[0] - 120.0),
        0.05 + 0.5 * p[1],
        -0.02 + 0.1 * p[2],
        0.1,
    ]
}

/// Validated sector whose voxels carry `f` evaluated at their centers.
fn sector_with(
    geo: &VoxelGeometry,
    sector: usize,
    f: fn([f64; 3]) -> [f64; N_DIMS],
) -> SectorResults {
    let mut results = SectorResults::new(geo, sector, SectorCounts::default());
    for voxel in &mut results.voxels {
        let c = geo.voxel_center(sector, voxel.bin);
        voxel.state = VoxelState::Fitted;
        voxel.stat = VoxelStats {
            mean: c,
            entries: 100,
        };
        voxel.d = f([c[0], c[1], c[2].abs()]);
        voxel.e = [0.01; N_DIMS];
        voxel.dy_sig_mad = 0.1;
        voxel.dz_sig_ltm = 0.1;
        voxel.flags = VoxelFlags::DIST_DONE | VoxelFlags::DISP_DONE;
    }
    results
}

fn validate(geo: &VoxelGeometry, sector: &mut SectorResults) -> SectorStatus {
    let cfg = ValidationConfig::default();
    VoxelValidator::new(&cfg).validate(geo, sector)
}

fn smooth(geo: &VoxelGeometry, cfg: &SmoothingConfig, sector: &mut SectorResults) -> Vec<usize> {
    let mut buf = SmoothBuffer::new(cfg.max_neighbors(), cfg.max_coeffs());
    KernelSmoother::new(cfg, geo).smooth_sector(sector, &mut buf)
}

fn assert_reproduces(
    geo: &VoxelGeometry,
    sector: &SectorResults,
    f: fn([f64; 3]) -> [f64; N_DIMS],
) {
    for voxel in &sector.voxels {
        assert!(voxel.flags.contains(VoxelFlags::SMOOTH_DONE), "voxel {}", voxel.id);
        let c = geo.voxel_center(sector.sector, voxel.bin);
        let expected = f([c[0], c[1], c[2].abs()]);
        for dim in 0..N_DIMS {
            assert_relative_eq!(voxel.ds[dim], expected[dim], epsilon = 1e-9);
        }
    }
}

// ============================================================================
// Reproduction Tests
// ============================================================================

#[test]
fn test_linear_field_reproduced() {
    let geo = geometry();
    let mut sector = sector_with(&geo, 0, field);
    validate(&geo, &mut sector);

    let cfg = SmoothingConfig::default();
    let failed = smooth(&geo, &cfg, &mut sector);
    assert!(failed.is_empty());
    assert_reproduces(&geo, &sector, field);
}

#[test]
fn test_gradients_match_field() {
    let geo = geometry();
    let mut sector = sector_with(&geo, 0, field);
    validate(&geo, &mut sector);
    smooth(&geo, &SmoothingConfig::default(), &mut sector);

    let voxel = sector.voxel(&geo, VoxelBin::new(4, 2, 1));
    assert_relative_eq!(voxel.ds_grad[Dim::X.index()][0], 0.002, epsilon = 1e-9);
    assert_relative_eq!(voxel.ds_grad[Dim::Y.index()][1], 0.5, epsilon = 1e-7);
    assert_relative_eq!(voxel.ds_grad[Dim::Z.index()][2], 0.1, epsilon = 1e-8);
    assert_relative_eq!(voxel.ds_grad[Dim::D.index()][0], 0.0, epsilon = 1e-9);
}

#[test]
fn test_c_side_uses_absolute_drift() {
    let geo = geometry();
    let mut sector = sector_with(&geo, 27, field);
    validate(&geo, &mut sector);
    smooth(&geo, &SmoothingConfig::default(), &mut sector);
    assert_reproduces(&geo, &sector, field);
}

#[test]
fn test_quadratic_radial_field() {
    fn bowl(p: [f64; 3]) -> [f64; N_DIMS] {
        let q = 0.001 * (p[0] - 120.0) * (p[0] - 120.0);
        [q, q, q, q]
    }
    let geo = geometry();
    let mut sector = sector_with(&geo, 0, bowl);
    validate(&geo, &mut sector);

    let cfg = SmoothingConfig {
        degree: [
            SmoothingDegree::Quadratic,
            SmoothingDegree::Linear,
            SmoothingDegree::Linear,
        ],
        ..SmoothingConfig::default()
    };
    smooth(&geo, &cfg, &mut sector);
    assert_reproduces(&geo, &sector, bowl);
}

#[test]
fn test_gaussian_kernel_with_errors() {
    let geo = geometry();
    let mut sector = sector_with(&geo, 0, field);
    validate(&geo, &mut sector);

    let cfg = SmoothingConfig {
        kernel: KernelShape::Gaussian,
        use_errors: true,
        ..SmoothingConfig::default()
    };
    smooth(&geo, &cfg, &mut sector);
    assert_reproduces(&geo, &sector, field);
}

// ============================================================================
// Bridging Tests
// ============================================================================

#[test]
fn test_missing_voxel_bridged() {
    let geo = geometry();
    let mut sector = sector_with(&geo, 0, field);
    let hole = geo.linear_index(VoxelBin::new(4, 2, 1));
    sector.voxels[hole].failure = Some(FitFailure::NotEnoughStatistics {
        entries: 0,
        required: 15,
    });
    sector.voxels[hole].flags = VoxelFlags::empty();
    sector.voxels[hole].d = [0.0; N_DIMS];
    validate(&geo, &mut sector);
    assert_eq!(sector.voxels[hole].state, VoxelState::Invalid);

    let failed = smooth(&geo, &SmoothingConfig::default(), &mut sector);
    assert!(failed.is_empty());

    let voxel = &sector.voxels[hole];
    assert!(voxel.flags.contains(VoxelFlags::SMOOTH_DONE));
    let c = geo.voxel_center(0, voxel.bin);
    let expected = field(c);
    for dim in 0..N_DIMS {
        assert_relative_eq!(voxel.ds[dim], expected[dim], epsilon = 1e-9);
    }
}

#[test]
fn test_discarded_bins_not_smoothed() {
    let geo = geometry();
    let mut sector = sector_with(&geo, 0, field);
    let per_bin = geo.n_y2x_bins() * geo.n_z2x_bins();
    for voxel in &mut sector.voxels[..per_bin] {
        voxel.failure = Some(FitFailure::Singular);
    }
    validate(&geo, &mut sector);
    assert_eq!(sector.x_bins[0].state, RadialBinState::Discarded);

    smooth(&geo, &SmoothingConfig::default(), &mut sector);
    assert!(sector.voxels[..per_bin]
        .iter()
        .all(|v| !v.flags.contains(VoxelFlags::SMOOTH_DONE)));
    assert!(sector.voxels[per_bin..]
        .iter()
        .all(|v| v.flags.contains(VoxelFlags::SMOOTH_DONE)));
}

#[test]
fn test_isolated_targets_reported() {
    let geo = geometry();
    let mut sector = SectorResults::new(&geo, 0, SectorCounts::default());
    // Every bin forced usable but no voxel carries data
    sector.status = SectorStatus::Usable;
    for report in &mut sector.x_bins {
        report.state = RadialBinState::FullyValid;
    }

    let failed = smooth(&geo, &SmoothingConfig::default(), &mut sector);
    assert_eq!(failed.len(), geo.n_voxels());
    assert!(sector
        .voxels
        .iter()
        .all(|v| !v.flags.contains(VoxelFlags::SMOOTH_DONE)));
}

#[test]
fn test_blocked_sector_has_no_targets() {
    let geo = geometry();
    let mut sector = sector_with(&geo, 0, field);
    validate(&geo, &mut sector);
    sector.status = SectorStatus::Blocked(BlockReason::Cancelled);

    let failed = smooth(&geo, &SmoothingConfig::default(), &mut sector);
    assert!(failed.is_empty());
    assert!(sector
        .voxels
        .iter()
        .all(|v| !v.flags.contains(VoxelFlags::SMOOTH_DONE)));
}
