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

fn good_quality() -> TrackQuality {
    TrackQuality {
        n_clusters: 120,
        match_dy: 0.1,
        match_dz: -0.2,
        helix_deviation: 0.05,
    }
}

fn record(sector: u8, x: f64, y2x: f64, z2x: f64, dy: f64) -> ResidualRecord {
    ResidualRecord {
        sector,
        x,
        y2x,
        z2x,
        dy,
        dz: 0.0,
        tg_slp: 0.1,
        sy: 0.05,
        quality: good_quality(),
    }
}

// ============================================================================
// Filter Tests
// ============================================================================

#[test]
fn test_track_quality_cuts() {
    let filter = FilterConfig::default();
    assert_eq!(filter.check(&good_quality()), Ok(()));

    let mut q = good_quality();
    q.n_clusters = 10;
    assert_eq!(filter.check(&q), Err(RejectReason::TooFewClusters));

    let mut q = good_quality();
    q.match_dz = 3.0;
    assert_eq!(filter.check(&q), Err(RejectReason::MatchingWindow));

    let mut q = good_quality();
    q.match_dy = f64::NAN;
    assert_eq!(filter.check(&q), Err(RejectReason::MatchingWindow));

    let mut q = good_quality();
    q.helix_deviation = 1.0;
    assert_eq!(filter.check(&q), Err(RejectReason::HelixDeviation));
}

#[test]
fn test_accept_locates_voxel() {
    let geo = geometry();
    let filter = FilterConfig::default();
    let sample = filter
        .accept(&geo, &record(3, 112.0, 0.0, 0.5, 0.07))
        .unwrap();

    assert_eq!(VoxelBin::unpack(sample.key), VoxelBin::new(2, 2, 1));
    assert_eq!(sample.dy, 0.07);
    assert_eq!(sample.z2x, 0.5);
    assert_eq!(sample.sy, 0.05);
}

#[test]
fn test_sample_weight_from_position_error() {
    let sample = |sy| VoxelSample {
        sy,
        ..Default::default()
    };
    assert_eq!(sample(0.5).weight(), 4.0);
    assert_eq!(sample(0.1).weight(), 1.0 / (0.1 * 0.1));
    // Unknown errors fall back to unit weight
    assert_eq!(sample(0.0).weight(), 1.0);
    assert_eq!(sample(-0.2).weight(), 1.0);
    assert_eq!(sample(f64::NAN).weight(), 1.0);
}

#[test]
fn test_accept_rejections() {
    let geo = geometry();
    let filter = FilterConfig::default();

    assert_eq!(
        filter.accept(&geo, &record(36, 112.0, 0.0, 0.5, 0.0)),
        Err(RejectReason::BadSector)
    );
    assert_eq!(
        filter.accept(&geo, &record(0, 112.0, 0.0, 0.5, f64::INFINITY)),
        Err(RejectReason::NonFinite)
    );
    assert_eq!(
        filter.accept(&geo, &record(0, 112.0, 0.0, -0.5, 0.0)),
        Err(RejectReason::Geometry(BinReject::WrongSide))
    );
    assert_eq!(
        filter.accept(&geo, &record(0, 112.0, 0.175, 0.5, 0.0)),
        Err(RejectReason::Geometry(BinReject::DeadZone))
    );
}

// ============================================================================
// Aggregator Tests
// ============================================================================

#[test]
fn test_counts_per_sector() {
    let geo = geometry();
    let mut agg = ResidualAggregator::new(&geo, FilterConfig::default(), SpoolMode::Memory);

    let mut bad_quality = record(1, 112.0, 0.0, 0.5, 0.0);
    bad_quality.quality.n_clusters = 5;
    let records = [
        record(1, 112.0, 0.0, 0.5, 0.0),
        record(1, 130.0, 0.05, 0.1, 0.0),
        record(1, 95.0, 0.0, 0.5, 0.0),
        bad_quality,
        record(20, 112.0, 0.0, -0.5, 0.0),
        record(20, 112.0, 0.0, 0.5, 0.0),
        record(40, 112.0, 0.0, 0.5, 0.0),
    ];
    agg.extend(&records).unwrap();

    let counts = agg.counts();
    assert_eq!(counts[1].accepted, 2);
    assert_eq!(counts[1].out_of_range_x, 1);
    assert_eq!(counts[1].too_few_clusters, 1);
    assert_eq!(counts[1].rejected(), 2);
    assert_eq!(counts[20].accepted, 1);
    assert_eq!(counts[20].wrong_side, 1);

    let out = agg.finish().unwrap();
    assert_eq!(out.unassigned, 1);
    assert_eq!(out.sectors.len(), N_SECTORS);
    assert_eq!(out.sectors[1].len(), 2);
    assert_eq!(out.sectors[20].len(), 1);
    assert!(out.sectors[0].is_empty());
}

#[test]
fn test_push_reports_reason() {
    let geo = geometry();
    let mut agg = ResidualAggregator::new(&geo, FilterConfig::default(), SpoolMode::Memory);
    assert_eq!(agg.push(&record(2, 112.0, 0.0, 0.5, 0.0)).unwrap(), None);
    assert_eq!(
        agg.push(&record(2, 112.0, 0.0, 1.5, 0.0)).unwrap(),
        Some(RejectReason::Geometry(BinReject::OutOfRangeZ))
    );
}

// ============================================================================
// Spool Tests
// ============================================================================

fn many_records() -> Vec<ResidualRecord> {
    (0..257)
        .map(|i| {
            let f = i as f64;
            ResidualRecord {
                sy: 0.02 + (f * 0.007) % 0.1,
                ..record(
                    (i % 3) as u8 * 12,
                    101.0 + (f * 0.37) % 38.0,
                    -0.1 + (f * 0.013) % 0.2,
                    0.05 + (f * 0.031) % 0.9,
                    0.001 * f,
                )
            }
        })
        .collect()
}

#[test]
fn test_temp_file_spool_matches_memory() {
    let geo = geometry();
    let records = many_records();

    let mut mem = ResidualAggregator::new(&geo, FilterConfig::default(), SpoolMode::Memory);
    mem.extend(&records).unwrap();
    let mem = mem.finish().unwrap();

    let mut disk = ResidualAggregator::new(
        &geo,
        FilterConfig::default(),
        SpoolMode::TempFile { flush_threshold: 7 },
    );
    disk.extend(&records).unwrap();
    let disk = disk.finish().unwrap();

    assert_eq!(mem.counts, disk.counts);
    for (a, b) in mem.sectors.into_iter().zip(disk.sectors) {
        assert_eq!(a.len(), b.len());
        assert_eq!(a.load().unwrap(), b.load().unwrap());
    }
}

#[test]
fn test_spooled_buffer_is_file_backed() {
    let geo = geometry();
    let mut agg = ResidualAggregator::new(
        &geo,
        FilterConfig::default(),
        SpoolMode::TempFile { flush_threshold: 2 },
    );
    for _ in 0..5 {
        agg.push(&record(4, 112.0, 0.0, 0.5, 0.0)).unwrap();
    }
    let out = agg.finish().unwrap();
    assert!(matches!(out.sectors[4], SectorBuffer::Spooled { len: 5, .. }));
    assert!(matches!(&out.sectors[5], SectorBuffer::Memory(v) if v.is_empty()));
}
