use std::collections::HashMap;
use std::time::Duration;

use glam::DVec2;

use super::*;
use crate::aperture::{Aperture, ApertureId};
use crate::frame::Window;
use crate::testing::{frame_of, init_tracing, star_buffer, star_window, Star};

const NAMES: [&str; 4] = ["ccd1", "ccd2", "ccd3", "ccd4"];

fn star_frame(number: u64, offset: f64) -> Frame {
    let windows = NAMES
        .iter()
        .map(|&name| {
            let star = Star::moffat(40.0 + offset, 41.0 - offset, 1500.0, 5.0, 3.0);
            (name, star_window(0, 0, 80, 80, 100.0, &[star]))
        })
        .collect();
    frame_of(number, 1.0, windows)
}

fn aperture_map() -> ApertureMap {
    NAMES
        .iter()
        .map(|&name| {
            let set = ApertureSet::try_from_iter([(ApertureId(1), Aperture::new(40.0, 41.0, 6.0, 10.0, 15.0))])
                .unwrap();
            (name.to_string(), set)
        })
        .collect()
}

fn position(apertures: &ApertureMap, detector: &str) -> DVec2 {
    apertures[detector].get(&ApertureId(1)).unwrap().pos
}

fn order(merged: &MergedFrame) -> Vec<&str> {
    merged.detectors.iter().map(|d| d.detector.as_str()).collect()
}

#[test]
fn test_merge_follows_frame_order_despite_delays() {
    init_tracing();
    let config = ReduceConfig::default();
    let dispatcher = Dispatcher::new(4).unwrap();
    assert_eq!(dispatcher.workers(), 4);

    for round in 0..3u64 {
        let frame = star_frame(round + 1, 0.3);
        let mut apertures = aperture_map();
        let mut store = Store::new();
        // The first detector sleeps longest, so it finishes last.
        let merged = dispatcher.dispatch_with(&frame, &mut apertures, &mut store, |job| {
            let idx = NAMES.iter().position(|&n| n == job.detector.name).unwrap() as u64;
            std::thread::sleep(Duration::from_millis((4 - idx) * 15));
            process_detector(job, &config)
        });

        assert_eq!(order(&merged), NAMES.to_vec());
        assert!(merged.detectors.iter().all(|d| !d.failed && d.results.len() == 1));
        assert!(merged.alerts.is_empty());
    }
}

#[test]
fn test_parallel_matches_serial() {
    let config = ReduceConfig::default();
    let frame = star_frame(1, 0.6);

    let run = |workers: usize| {
        let mut apertures = aperture_map();
        let mut store = Store::new();
        let merged = Dispatcher::new(workers)
            .unwrap()
            .dispatch(&frame, &mut apertures, &mut store, &config);
        (merged.detectors, apertures, store)
    };

    let (serial, serial_aps, serial_store) = run(1);
    let (parallel, parallel_aps, parallel_store) = run(3);
    assert_eq!(serial, parallel);
    for name in NAMES {
        assert_eq!(position(&serial_aps, name), position(&parallel_aps, name));
        assert_eq!(serial_store.get(name), parallel_store.get(name));
    }
}

#[test]
fn test_successful_merge_updates_state() {
    let config = ReduceConfig::default();
    let frame = star_frame(1, 0.6);
    let mut apertures = aperture_map();
    let mut store = Store::new();

    Dispatcher::new(2)
        .unwrap()
        .dispatch(&frame, &mut apertures, &mut store, &config);

    for name in NAMES {
        assert!(position(&apertures, name).distance(DVec2::new(40.6, 40.4)) < 1e-2);
        let entry = store.get(name).unwrap();
        assert_eq!(entry.frames, 1);
        assert!((entry.fwhm.unwrap() - 5.0).abs() < 0.05);
    }
}

#[test]
fn test_failing_detector_is_isolated() {
    init_tracing();
    let config = ReduceConfig::default();
    let mut frame = star_frame(1, 0.6);
    let mut pixels = star_buffer(0, 0, 80, 80, 100.0, &[]);
    pixels[(5, 5)] = f32::NAN;
    frame.detectors[1] = crate::frame::Detector::single("ccd2", Window::new(0, 0, 1, 1, pixels));

    let mut apertures = aperture_map();
    let mut store = Store::new();
    let before = position(&apertures, "ccd2");

    let merged = Dispatcher::new(4)
        .unwrap()
        .dispatch(&frame, &mut apertures, &mut store, &config);

    assert_eq!(order(&merged), NAMES.to_vec());
    let failed = &merged.detectors[1];
    assert!(failed.failed);
    assert_eq!(failed.results.len(), 1);
    let result = &failed.results[0];
    assert!(!result.is_valid());
    assert!(result.flags.contains(QualityFlags::DETECTOR_FAILED));
    assert!(result.flags.contains(QualityFlags::INVALID));
    assert_eq!(result.pos, before);

    assert_eq!(merged.alerts.len(), 1);
    assert!(merged.alerts[0].contains("ccd2"), "{}", merged.alerts[0]);
    assert_eq!(position(&apertures, "ccd2"), before);
    assert!(store.get("ccd2").is_none());

    for (idx, name) in NAMES.iter().enumerate().filter(|(i, _)| *i != 1) {
        assert!(!merged.detectors[idx].failed);
        assert!(merged.detectors[idx].results[0].is_valid());
        assert_ne!(position(&apertures, name), before);
    }
}

#[test]
fn test_panicking_detector_is_isolated() {
    let config = ReduceConfig::default();
    let frame = star_frame(1, 0.6);
    let mut apertures = aperture_map();
    let mut store = Store::new();

    let merged = Dispatcher::new(3)
        .unwrap()
        .dispatch_with(&frame, &mut apertures, &mut store, |job| {
            if job.detector.name == "ccd3" {
                panic!("window decoder exploded");
            }
            process_detector(job, &config)
        });

    let failed: Vec<&str> = merged
        .detectors
        .iter()
        .filter(|d| d.failed)
        .map(|d| d.detector.as_str())
        .collect();
    assert_eq!(failed, vec!["ccd3"]);
    assert_eq!(merged.alerts.len(), 1);
    assert!(merged.alerts[0].contains("window decoder exploded"));
    assert_eq!(position(&apertures, "ccd3"), DVec2::new(40.0, 41.0));
    assert!(store.get("ccd3").is_none());
    assert!(store.get("ccd1").is_some());
}

#[test]
fn test_detectors_without_apertures_are_skipped() {
    let config = ReduceConfig::default();
    let frame = star_frame(1, 0.0);
    let mut apertures: ApertureMap = aperture_map()
        .into_iter()
        .filter(|(name, _)| name == "ccd2")
        .collect::<HashMap<_, _>>();
    let mut store = Store::new();

    let merged = Dispatcher::new(1)
        .unwrap()
        .dispatch(&frame, &mut apertures, &mut store, &config);

    assert_eq!(order(&merged), vec!["ccd2"]);
    assert!(store.get("ccd1").is_none());
}

#[test]
fn test_alerts_collected_from_rejected_fits() {
    let config = ReduceConfig::default();
    // Flat windows: every fit falls below the minimum height.
    let windows = NAMES
        .iter()
        .map(|&name| (name, star_window(0, 0, 80, 80, 100.0, &[])))
        .collect();
    let frame = frame_of(1, 1.0, windows);
    let mut apertures = aperture_map();
    let mut store = Store::new();

    let merged = Dispatcher::new(2)
        .unwrap()
        .dispatch(&frame, &mut apertures, &mut store, &config);

    assert_eq!(merged.alerts.len(), NAMES.len());
    for (alert, name) in merged.alerts.iter().zip(NAMES) {
        assert!(alert.contains(name), "{alert}");
    }
    assert!(merged.detectors.iter().all(|d| !d.failed));
}
