use approx::assert_relative_eq;
use rand::distr::Uniform;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tpc_dcalib::prelude::*;

// ============================================================================
// Synthetic Data
// ============================================================================

/// Known distortion model of the synthetic residuals.
#[derive(Clone, Copy)]
struct Model {
    x: f64,
    y: f64,
    z: f64,
    sigma: f64,
    outlier_fraction: f64,
}

impl Model {
    fn offset(y: f64) -> Self {
        Self {
            x: 0.0,
            y,
            z: 0.0,
            sigma: 0.1,
            outlier_fraction: 0.0,
        }
    }
}

fn engine() -> CalibrationEngine {
    Calibration::new()
        .radial_binning(RadialBinning::Uniform { n_bins: 4 })
        .row_regions(vec![RowRegion {
            first_x: 100.5,
            pitch: 1.0,
            n_rows: 40,
        }])
        .y2x_bins(3)
        .z2x_bins(2)
        .build()
        .unwrap()
}

fn good_quality() -> TrackQuality {
    TrackQuality {
        n_clusters: 140,
        match_dy: 0.2,
        match_dz: 0.1,
        helix_deviation: 0.02,
    }
}

/// `per_voxel` residuals for every voxel of `sectors`, skipping `holes`.
fn generate(
    geo: &VoxelGeometry,
    sectors: &[u8],
    per_voxel: usize,
    model: Model,
    holes: &[(u8, VoxelBin)],
    seed: u64,
) -> Vec<ResidualRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, model.sigma).unwrap();
    let jitter = Uniform::new(-0.4, 0.4).unwrap();
    let tg = Uniform::new(-0.5, 0.5).unwrap();
    let unit = Uniform::new(0.0, 1.0).unwrap();
    let outlier = Uniform::new(-5.0, 5.0).unwrap();

    let mut records = Vec::new();
    for &sector in sectors {
        let sign = if VoxelGeometry::is_c_side(sector as usize) { -1.0 } else { 1.0 };
        for id in 0..geo.n_voxels() {
            let bin = geo.bin_of_linear(id);
            if holes.contains(&(sector, bin)) {
                continue;
            }
            let (ix, ip, iz) = (bin.ix as usize, bin.ip as usize, bin.iz as usize);
            for _ in 0..per_voxel {
                let x = geo.x_center(ix) + jitter.sample(&mut rng) * geo.x_bin_width(ix);
                let y2x = geo.y2x_center(ix, ip) + jitter.sample(&mut rng) * geo.y2x_bin_width(ix);
                let z_abs = geo.z2x_center(iz) + jitter.sample(&mut rng) * geo.z2x_bin_width();
                let z2x = sign * z_abs;
                let t = tg.sample(&mut rng);
                let dy = if unit.sample(&mut rng) < model.outlier_fraction {
                    outlier.sample(&mut rng)
                } else {
                    model.y - model.x * t + noise.sample(&mut rng)
                };
                records.push(ResidualRecord {
                    sector,
                    x,
                    y2x,
                    z2x,
                    dy,
                    dz: model.z - model.x * z2x + noise.sample(&mut rng),
                    tg_slp: t,
                    sy: 0.1,
                    quality: good_quality(),
                });
            }
        }
    }
    records
}

// ============================================================================
// End-to-End Scenarios
// ============================================================================

#[test]
fn test_scenario_constant_offset() {
    let engine = engine();
    let geo = engine.geometry().clone();
    let records = generate(&geo, &[2], 10_000, Model::offset(0.05), &[], 1);
    let out = engine.run(&records).unwrap();

    let sector = out.sector(2).unwrap();
    assert_eq!(sector.status, SectorStatus::Usable);
    assert_eq!(sector.total_entries(), records.len());
    for voxel in &sector.voxels {
        assert_eq!(voxel.state, VoxelState::Valid);
        assert_relative_eq!(voxel.d[Dim::Y.index()], 0.05, epsilon = 0.005);
        assert_relative_eq!(voxel.dy_sig_mad, 0.1, max_relative = 0.1);
    }

    let c = out.correction(2, 121.0, 0.01, 0.4);
    assert!(c.is_valid());
    assert_relative_eq!(c.dy, -0.05, epsilon = 0.01);
}

#[test]
fn test_scenario_outlier_contamination() {
    let engine = engine();
    let geo = engine.geometry().clone();
    let model = Model {
        outlier_fraction: 0.2,
        ..Model::offset(0.05)
    };
    let records = generate(&geo, &[2], 10_000, model, &[], 2);
    let out = engine.run(&records).unwrap();

    let sector = out.sector(2).unwrap();
    for voxel in &sector.voxels {
        assert_eq!(voxel.state, VoxelState::Valid);
        assert_relative_eq!(voxel.d[Dim::Y.index()], 0.05, epsilon = 0.01);
    }
}

#[test]
fn test_scenario_empty_voxel() {
    let engine = engine();
    let geo = engine.geometry().clone();
    let hole = VoxelBin::new(1, 1, 0);
    let records = generate(&geo, &[2], 300, Model::offset(0.05), &[(2, hole)], 3);
    let out = engine.run(&records).unwrap();

    let sector = out.sector(2).unwrap();
    let voxel = sector.voxel(&geo, hole);
    assert_eq!(voxel.state, VoxelState::Invalid);
    assert_eq!(voxel.stat.entries, 0);
    assert_eq!(
        voxel.failure,
        Some(FitFailure::NotEnoughStatistics {
            entries: 0,
            required: 15
        })
    );
    assert!(!voxel.is_smoothing_input());

    // Bridged by the smoother; its radial bin stays usable
    assert!(voxel.flags.contains(VoxelFlags::SMOOTH_DONE));
    assert_eq!(sector.x_bins[1].state, RadialBinState::FullyValid);
    let [x, y2x, z2x] = geo.voxel_center(2, hole);
    let c = out.correction(2, x, y2x, z2x);
    assert!(c.is_valid());
    assert_relative_eq!(c.dy, -0.05, epsilon = 0.02);
}

#[test]
fn test_empty_sectors_blocked() {
    let engine = engine();
    let geo = engine.geometry().clone();
    let records = generate(&geo, &[2, 20], 200, Model::offset(0.05), &[], 4);
    let out = engine.run(&records).unwrap();

    let blocked = out.blocked_sectors();
    assert_eq!(blocked.len(), N_SECTORS - 2);
    assert!(!blocked.contains(&2));
    assert!(!blocked.contains(&20));

    let empty = out.sector(5).unwrap();
    assert!(empty.status.is_blocked());
    assert!(empty
        .voxels
        .iter()
        .all(|v| v.flags.contains(VoxelFlags::KILLED)));
    assert!(!out.correction(5, 121.0, 0.0, 0.4).is_valid());
    assert!(out.map.sector(5).unwrap().slices.iter().all(|s| s.params.is_none()));

    // C-side sector is corrected with negative z/x only
    assert!(out.correction(20, 121.0, 0.0, -0.4).is_valid());
    assert!(!out.correction(20, 121.0, 0.0, 0.4).is_valid());
}

#[test]
fn test_long_bad_radial_run_discarded() {
    let engine = Calibration::new()
        .radial_binning(RadialBinning::Uniform { n_bins: 10 })
        .row_regions(vec![RowRegion {
            first_x: 100.5,
            pitch: 1.0,
            n_rows: 50,
        }])
        .y2x_bins(3)
        .z2x_bins(2)
        .bridging(1, 2)
        .build()
        .unwrap();
    let geo = engine.geometry().clone();

    // Radial bins 4 and 5 receive nothing
    let holes: Vec<(u8, VoxelBin)> = (0..geo.n_voxels())
        .map(|id| geo.bin_of_linear(id))
        .filter(|b| b.ix == 4 || b.ix == 5)
        .map(|b| (1, b))
        .collect();
    let records = generate(&geo, &[1], 100, Model::offset(0.05), &holes, 5);
    let out = engine.run(&records).unwrap();

    let sector = out.sector(1).unwrap();
    assert_eq!(sector.status, SectorStatus::Usable);
    assert_eq!(sector.x_bins[4].state, RadialBinState::Discarded);
    assert_eq!(sector.x_bins[5].state, RadialBinState::Discarded);
    assert_eq!(out.diagnostics.blocked_rows(), vec![(1, 4), (1, 5)]);

    let x4 = geo.x_center(4);
    assert!(!out.correction(1, x4, 0.0, 0.4).is_valid());
    assert!(out.correction(1, geo.x_center(2), 0.0, 0.4).is_valid());
}

#[test]
fn test_single_bad_radial_bin_bridged() {
    let engine = Calibration::new()
        .radial_binning(RadialBinning::Uniform { n_bins: 8 })
        .row_regions(vec![RowRegion {
            first_x: 100.5,
            pitch: 1.0,
            n_rows: 40,
        }])
        .y2x_bins(3)
        .z2x_bins(2)
        .build()
        .unwrap();
    let geo = engine.geometry().clone();

    let holes: Vec<(u8, VoxelBin)> = (0..geo.n_voxels())
        .map(|id| geo.bin_of_linear(id))
        .filter(|b| b.ix == 3)
        .map(|b| (0, b))
        .collect();
    let records = generate(&geo, &[0], 100, Model::offset(0.05), &holes, 6);
    let out = engine.run(&records).unwrap();

    let sector = out.sector(0).unwrap();
    assert_eq!(sector.x_bins[3].state, RadialBinState::PartiallyValid);
    let c = out.correction(0, geo.x_center(3), 0.0, 0.3);
    assert!(c.is_valid());
    assert_relative_eq!(c.dy, -0.05, epsilon = 0.03);
}

// ============================================================================
// Closure Test
// ============================================================================

#[test]
fn test_closure_reduces_rms() {
    let engine = engine();
    let geo = engine.geometry().clone();
    let model = Model {
        x: 0.1,
        y: 0.3,
        z: 0.2,
        sigma: 0.1,
        outlier_fraction: 0.0,
    };
    let calibration = generate(&geo, &[3, 25], 500, model, &[], 7);
    let out = engine.run(&calibration).unwrap();

    let sector = out.sector(3).unwrap();
    for voxel in &sector.voxels {
        assert_relative_eq!(voxel.d[Dim::X.index()], 0.1, epsilon = 0.05);
        assert_relative_eq!(voxel.d[Dim::Z.index()], 0.2, epsilon = 0.03);
    }

    let independent = generate(&geo, &[3, 25], 100, model, &[], 8);
    let report = engine.closure_test(&out.map, &independent);

    assert_eq!(report.accepted, independent.len() as u64);
    assert_eq!(report.uncorrected, 0);
    assert_eq!(report.used, report.accepted);
    // Only the noise should remain after correction
    assert!(report.after.rms() < 0.16, "{report}");
    assert!(report.after.mean_y.abs() < 0.02);
    assert!(report.after.mean_z.abs() < 0.02);
    assert!(report.passed(0.5), "{report}");
}

#[test]
fn test_closure_counts_uncorrected() {
    let engine = engine();
    let geo = engine.geometry().clone();
    let records = generate(&geo, &[3], 200, Model::offset(0.1), &[], 9);
    let out = engine.run(&records).unwrap();

    // Residuals of a sector without a map are counted, not corrected
    let other = generate(&geo, &[4], 5, Model::offset(0.1), &[], 10);
    let report = engine.closure_test(&out.map, &other);
    assert_eq!(report.used, 0);
    assert_eq!(report.uncorrected, other.len() as u64);
    assert!(!report.passed(0.0));
}

// ============================================================================
// Engine Behavior
// ============================================================================

#[test]
fn test_cancelled_run_blocks_everything() {
    let engine = engine();
    let geo = engine.geometry().clone();
    let records = generate(&geo, &[2], 100, Model::offset(0.05), &[], 11);

    let cancel = CancelToken::new();
    cancel.cancel();
    let out = engine.run_with_cancel(&records, &cancel).unwrap();

    assert_eq!(out.blocked_sectors().len(), N_SECTORS);
    assert_eq!(
        out.sector(2).unwrap().status,
        SectorStatus::Blocked(BlockReason::Cancelled)
    );
    assert!(!out.correction(2, 121.0, 0.0, 0.4).is_valid());
}

#[test]
fn test_temp_file_spool_same_result() {
    let records = {
        let geo = engine().geometry().clone();
        generate(&geo, &[6, 30], 150, Model::offset(-0.02), &[], 12)
    };

    let memory = engine().run(&records).unwrap();
    let spooled = Calibration::new()
        .radial_binning(RadialBinning::Uniform { n_bins: 4 })
        .row_regions(vec![RowRegion {
            first_x: 100.5,
            pitch: 1.0,
            n_rows: 40,
        }])
        .y2x_bins(3)
        .z2x_bins(2)
        .spool(SpoolMode::TempFile {
            flush_threshold: 64,
        })
        .build()
        .unwrap()
        .run(&records)
        .unwrap();

    assert_eq!(memory.sectors, spooled.sectors);
    assert_eq!(memory.map, spooled.map);
}

#[test]
fn test_diagnostics_report() {
    let engine = engine();
    let geo = engine.geometry().clone();
    let mut records = generate(&geo, &[2], 50, Model::offset(0.05), &[], 13);
    let accepted = records.len() as u64;

    let mut bad = records[0];
    bad.quality.n_clusters = 3;
    records.push(bad);
    let mut dead = records[0];
    dead.y2x = 0.17;
    records.push(dead);
    let mut lost = records[0];
    lost.sector = 99;
    records.push(lost);

    let out = engine.run(&records).unwrap();
    let diag = &out.diagnostics;
    assert_eq!(diag.total_accepted(), accepted);
    assert_eq!(diag.total_rejected(), 3);
    assert_eq!(diag.unassigned, 1);

    let s2 = &diag.sectors[2];
    assert_eq!(s2.counts.too_few_clusters, 1);
    assert_eq!(s2.counts.dead_zone, 1);
    assert_eq!(s2.n_voxels, geo.n_voxels());
    assert_eq!(s2.n_valid, geo.n_voxels());
    assert_eq!(s2.bins_in_state(RadialBinState::FullyValid).len(), geo.n_x_bins());

    let text = format!("{}", out);
    assert!(text.contains("Summary:"));
    assert!(text.contains("Accepted samples: "));
    assert!(text.contains("usable"));
}
