mod common;

use std::io::Cursor;

use scia::calib::{Algorithm, KeyData, Stage};
use scia::cluster::{Channel, ClusterDescriptor, ClusterMask};
use scia::geolocation::{GeoNadir, GeoRecords};
use scia::level1b::{Geometry, Level1bRecord, State};
use scia::level1c::Units;
use scia::packet::{DetectorPacket, PacketType};
use scia::sdmf::{CorrectionRecord, Dataset};
use scia::time::SensingTime;
use scia::{decode_packets, reorganize, CalibConfig, CalibMask, MemoryStore, Severity};

use common::{detector_body, detector_packet, Block};

const STATE_ID: u8 = 8;

fn descriptors() -> Vec<ClusterDescriptor> {
    vec![
        ClusterDescriptor::new(Channel::new(2).unwrap(), 10, 0, 4, 1, 0.5, 2).unwrap(),
        ClusterDescriptor::new(Channel::new(7).unwrap(), 40, 10, 3, 2, 0.25, 1).unwrap(),
    ]
}

/// Two DSRs of two packets each. The infrared cluster is read out once per DSR.
fn level0_stream() -> Vec<u8> {
    let mut stream = Vec::new();
    for n in 0..4u16 {
        let mut blocks = vec![Block {
            channel: 2,
            cluster_id: 10,
            coadd: 1,
            start: 0,
            values: vec![1000; 4],
        }];
        if n % 2 == 0 {
            blocks.push(Block {
                channel: 7,
                cluster_id: 40,
                coadd: 2,
                start: 10,
                values: vec![4000; 3],
            });
        }
        let body = detector_body(n * 8, &blocks);
        stream.extend(detector_packet(STATE_ID, 100 + u32::from(n), &body));
    }
    stream
}

fn decode_stream(stream: Vec<u8>) -> Vec<DetectorPacket> {
    decode_packets(Cursor::new(stream))
        .map(Result::unwrap)
        .filter_map(|p| p.as_detector().cloned())
        .collect()
}

fn state(packets: &[DetectorPacket]) -> State {
    let descriptors = descriptors();
    let records = packets
        .chunks(2)
        .enumerate()
        .map(|(nd, dsr)| {
            let time = SensingTime {
                days: 1500,
                seconds: 100 + 2 * nd as u32,
                micros: 0,
            };
            let geolocation = GeoRecords::Nadir(vec![GeoNadir {
                pixel_type: 1,
                sun_zen_ang: [40.0, 45.0, 50.0],
                ..Default::default()
            }]);
            Level1bRecord::from_detector_packets(time, &descriptors, dsr, geolocation)
        })
        .collect();
    State {
        state_id: STATE_ID,
        category: 2,
        geometry: Geometry::Nadir,
        orbit_phase: 0.3,
        dur_scan: 1.0,
        clusters: descriptors,
        records,
    }
}

#[test]
fn stream_skips_truncated_packet() {
    let good = level0_stream();
    let mut bad = detector_packet(STATE_ID, 99, &detector_body(0, &[]));
    // declared one byte longer than the body
    let len_at = 32 + 4;
    let length = u16::from_be_bytes([bad[len_at], bad[len_at + 1]]) + 1;
    bad[len_at..len_at + 2].copy_from_slice(&length.to_be_bytes());
    bad.push(0);

    let mut stream = bad;
    stream.extend(good);
    let mut iter = decode_packets(Cursor::new(stream));
    let packets: Vec<_> = (&mut iter).map(Result::unwrap).collect();

    assert_eq!(packets.len(), 4);
    assert_eq!(iter.skipped(), 1);
    let summary = iter.summary();
    assert_eq!(summary.count, 4);
    assert_eq!(summary.types[&PacketType::Detector].count, 4);
    assert_eq!(summary.corrupted, 0);
    assert!(summary.first < summary.last);
    assert!(packets.iter().all(|p| p.state_id() == STATE_ID));
}

#[test]
fn reorganize_decoded_state() {
    let packets = decode_stream(level0_stream());
    assert_eq!(packets.len(), 4);

    let product = reorganize(state(&packets), ClusterMask::ALL).unwrap();
    assert_eq!(product.state_id, STATE_ID);
    assert_eq!(product.series.len(), 2);
    assert!(product.diagnostics.is_empty());

    let vis = &product.series[0];
    assert_eq!(vis.values.dim(), (4, 4));
    assert_eq!(vis.geolocation.len(), 4);
    assert_eq!(vis.pixel_ids, vec![1024, 1025, 1026, 1027]);
    assert!(vis.values.iter().all(|v| *v == 1000.0));

    let ir = &product.series[1];
    assert_eq!(ir.values.dim(), (2, 3));
    assert_eq!(ir.geolocation.len(), 2);
    assert_eq!(ir.pixel_ids, vec![6154, 6155, 6156]);
    assert!(ir.values.iter().all(|v| *v == 4000.0));

    let only_ir = reorganize(state(&packets), ClusterMask::from_ids(&[40])).unwrap();
    assert_eq!(only_ir.series.len(), 1);
    assert_eq!(only_ir.series[0].cluster_id, 40);
}

#[test]
fn missing_readouts_exclude_cluster() {
    let mut packets = decode_stream(level0_stream());
    // lose the infrared cluster of the second DSR
    packets[2].channels.truncate(1);

    let product = reorganize(state(&packets), ClusterMask::ALL).unwrap();
    assert_eq!(product.series.len(), 1);
    assert_eq!(product.series[0].cluster_id, 10);
    assert_eq!(product.diagnostics.severity(), Severity::Warning);
    assert_eq!(product.diagnostics.warning_count(), 1);
}

fn correction_store() -> MemoryStore {
    let pixels = scia::cluster::SCIENCE_PIXELS;
    let mut mask = vec![0.0; pixels];
    mask[6 * 1024 + 11] = 1.0;

    let mut store = MemoryStore::default();
    store.insert(
        Dataset::Dark.name(),
        CorrectionRecord::new(20003)
            .with_field("analog_offset", vec![10.0; pixels])
            .with_field("dark_current", vec![20.0; pixels]),
    );
    store.insert(
        Dataset::BadPixelMask.name(),
        CorrectionRecord::new(19990).with_field("mask", mask),
    );
    store
}

#[test]
fn decode_reorganize_calibrate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrections.json");
    correction_store().save(&path).unwrap();
    let store = MemoryStore::with_file(&path).unwrap();
    assert_eq!(store, correction_store());

    let config = CalibConfig::builder()
        .calib_mask(
            CalibMask::NONE
                .with(Stage::Dark, Algorithm::Database)
                .with(Stage::PixelGain, Algorithm::Reference)
                .with(Stage::BadPixel, Algorithm::Database)
                .with(Stage::CoaddNormalization, Algorithm::Reference),
        )
        .build();
    let key_data = KeyData {
        pixel_gain: Some(vec![2.0; scia::cluster::SCIENCE_PIXELS]),
        ..Default::default()
    };

    let packets = decode_stream(level0_stream());
    let (product, status) = config
        .process(state(&packets), key_data, 20000, &store)
        .unwrap();

    assert_eq!(status.severity(), Severity::None);
    assert_eq!(
        status.applied,
        vec![
            (Stage::Dark, Algorithm::Database),
            (Stage::PixelGain, Algorithm::Reference),
            (Stage::BadPixel, Algorithm::Database),
            (Stage::CoaddNormalization, Algorithm::Reference),
        ]
    );

    // (1000 - (1 * 10 + 0.5 * 20)) / 2
    let vis = &product.series[0];
    assert!(vis.values.iter().all(|v| (*v - 490.0).abs() < 1e-4));
    assert_eq!(vis.units, Units::Counts);

    // (4000 - (2 * 10 + 0.5 * 20)) / 2 / 2, with pixel 6155 masked
    let ir = &product.series[1];
    for row in ir.values.rows() {
        assert!((row[0] - 992.5).abs() < 1e-4);
        assert!(row[1].is_nan());
        assert!((row[2] - 992.5).abs() < 1e-4);
    }
    assert!(ir.errors.column(1).iter().all(|e| e.is_nan()));
    assert!(ir.errors.column(0).iter().all(|e| *e == 0.0));
}

#[test]
fn missing_required_correction_fails_with_history() {
    let config = CalibConfig::builder()
        .calib_mask(
            CalibMask::NONE
                .with(Stage::Dark, Algorithm::Reference)
                .with(Stage::BadPixel, Algorithm::Reference),
        )
        .build();
    let packets = decode_stream(level0_stream());
    let err = config
        .process(state(&packets), KeyData::default(), 20000, &MemoryStore::default())
        .unwrap_err();

    let err = match err {
        scia::Error::Calib(err) => err,
        other => panic!("expected a calibration error, got {other:?}"),
    };
    assert_eq!(err.severity(), Severity::Fatal);
    // the skipped dark correction is reported with the failure
    assert_eq!(err.diagnostics.warning_count(), 1);
    assert_eq!(err.diagnostics.severity(), Severity::Fatal);
}
