//! End-to-end pipeline test on a synthetic recording.
//!
//! An observer sweeps a serpentine pattern south of a stationary emitter
//! while logging RSSI shaped as `-(distance to emitter)` plus Gaussian
//! noise. The full pipeline (tour ordering, coalescing, combinatorial
//! cluster search, AoA fitting, grid-walk minimization) must recover the
//! emitter position to within a few meters.

use polaris_core::locator::EmitterLocator;
use polaris_core::projection::PlanarFrame;
use polaris_core::sample::Sample;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::time::Duration;

const EMITTER_X: f64 = 0.0;
const EMITTER_Y: f64 = 30.0;

/// Serpentine sweep south of the emitter: lines y = 0, 4, ..., 20 with
/// samples every 2.5 m in x.
fn synthetic_sweep(frame: PlanarFrame, noise_sigma: f64, seed: u64) -> Vec<Sample> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, noise_sigma).expect("valid sigma");

    let mut samples = Vec::new();
    let mut timestamp = 0i64;
    for line in 0..6 {
        let y = f64::from(line) * 4.0;
        let mut xs: Vec<f64> = (0..21).map(|i| -25.0 + f64::from(i) * 2.5).collect();
        if line % 2 == 1 {
            xs.reverse();
        }
        for x in xs {
            let dist = (x - EMITTER_X).hypot(y - EMITTER_Y);
            let rssi = (-dist + noise.sample(&mut rng)).round() as i32;

            let (lat, lon) = frame.to_geographic(x, y);
            let mut sample = Sample::new(
                lat,
                lon,
                frame,
                rssi,
                timestamp,
                Some("beacon-7".into()),
                Some("observer-1".into()),
            );
            sample.project().expect("projectable");
            samples.push(sample);
            timestamp += 500;
        }
    }
    samples
}

#[test]
fn test_pipeline_recovers_emitter_position() {
    let frame = PlanarFrame::new(59.8586, 17.6389);
    let samples = synthetic_sweep(frame, 0.5, 20_240_601);

    let mut locator = EmitterLocator::new(frame);
    // A sweep this dense needs a short per-seed budget to keep the subset
    // enumeration bounded; the candidate radius matches the line spacing
    locator.params_mut().set("per_seed_timeout", 0.05);
    locator.params_mut().set("max_internal_distance", 8.0);

    for sample in samples {
        locator.add_sample(sample).expect("valid sample");
    }

    let estimate = locator
        .locate(0.5, Some(Duration::from_secs(120)))
        .expect("pipeline succeeds");

    // Planar error against the true emitter position
    let (x, y) = frame.to_planar(estimate.latitude, estimate.longitude);
    let error = (x - EMITTER_X).hypot(y - EMITTER_Y);
    assert!(
        error < 3.0,
        "estimated ({x:.2}, {y:.2}), error {error:.2} m exceeds 3 m"
    );

    let telemetry = &estimate.telemetry;
    assert!(telemetry.cluster_count >= 2);
    assert!(telemetry.combinations_explored > 0);
    assert!(!telemetry.seeds.is_empty());
    // Per-seed totals add up to the run total
    let sum: u64 = telemetry.seeds.iter().map(|s| s.combinations).sum();
    assert_eq!(sum, telemetry.combinations_explored);
}

#[test]
fn test_pipeline_via_recording_json() {
    // The same sweep serialized the way the capture tool writes it
    let frame = PlanarFrame::new(59.8586, 17.6389);
    let samples = synthetic_sweep(frame, 0.5, 77);

    let records: Vec<String> = samples
        .iter()
        .map(|s| {
            format!(
                r#"{{"latitude": {:.9}, "longitude": {:.9}, "rssi": {}, "ssid": "beacon-7", "device_id": "observer-1", "timestamp": {}}}"#,
                s.latitude().unwrap(),
                s.longitude().unwrap(),
                s.rssi,
                s.timestamp_ms
            )
        })
        .collect();
    let content = format!("[{}]", records.join(",\n"));

    let parsed = polaris_core::signal_json::parse_signals(&content).expect("parse");
    assert_eq!(parsed.len(), samples.len());

    // The parser anchors the frame at the first record, so the emitter sits
    // at a different planar position in the parsed frame
    let parsed_frame = parsed[0].frame;
    let first = &samples[0];
    let (fx, fy) = first.planar().unwrap();

    let mut locator = EmitterLocator::new(parsed_frame);
    locator.params_mut().set("per_seed_timeout", 0.05);
    locator.params_mut().set("max_internal_distance", 8.0);
    for sample in parsed {
        locator.add_sample(sample).expect("valid sample");
    }

    let estimate = locator
        .locate(0.5, Some(Duration::from_secs(120)))
        .expect("pipeline succeeds");

    // Compare in the original frame: the parsed frame's origin is the first
    // sweep point
    let (x, y) = parsed_frame.to_planar(estimate.latitude, estimate.longitude);
    let error = ((x + fx) - EMITTER_X).hypot((y + fy) - EMITTER_Y);
    assert!(
        error < 3.0,
        "estimated error {error:.2} m exceeds 3 m (parsed-frame planar ({x:.2}, {y:.2}))"
    );
}
