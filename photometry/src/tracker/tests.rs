use super::*;
use crate::config::ExtractionConfig;
use crate::extraction::Extractor;
use crate::flags::QualityFlags;
use crate::testing::{init_tracing, star_window, Star};
use common::Buffer2;

fn detector_with(stars: &[Star]) -> Detector {
    Detector::single("ccd1", star_window(0, 0, 100, 100, 100.0, stars))
}

fn moffat(x: f64, y: f64) -> Star {
    Star::moffat(x, y, 1000.0, 5.0, 3.0)
}

fn aperture(x: f64, y: f64) -> Aperture {
    Aperture::new(x, y, 6.0, 10.0, 15.0)
}

fn set(items: Vec<(u32, Aperture)>) -> ApertureSet {
    ApertureSet::try_from_iter(items.into_iter().map(|(id, ap)| (ApertureId(id), ap))).unwrap()
}

fn run(
    detector: &Detector,
    config: &TrackingConfig,
    apertures: &mut ApertureSet,
    store: &mut DetectorStore,
) -> Vec<TrackOutcome> {
    let noise = DetectorNoise::default();
    Tracker::new(detector, config, &noise).track(apertures, store)
}

#[test]
fn test_tracks_moved_star() {
    init_tracing();
    let detector = detector_with(&[moffat(50.7, 49.4)]);
    let mut apertures = set(vec![(1, aperture(50.0, 50.0))]);
    let mut store = DetectorStore::default();

    let outcomes = run(&detector, &TrackingConfig::default(), &mut apertures, &mut store);

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, FitStatus::Accepted);
    assert!(outcomes[0].alert.is_none());
    let ap = apertures.get(&ApertureId(1)).unwrap();
    assert!(ap.pos.distance(DVec2::new(50.7, 49.4)) < 1e-2, "pos = {}", ap.pos);
    assert!((ap.fwhm - 5.0).abs() < 1e-2);
    assert_eq!(ap.window.as_deref(), Some("1"));
    assert!((store.fwhm.unwrap() - 5.0).abs() < 1e-2);
    assert!((store.beta.unwrap() - 3.0).abs() < 5e-2);
    assert_eq!(store.last_good(ApertureId(1)), Some(ap.pos));
}

#[test]
fn test_reference_shift_seeds_other_apertures() {
    let detector = detector_with(&[moffat(34.0, 33.0), moffat(74.0, 73.0)]);
    let mut apertures = set(vec![
        (1, aperture(30.0, 30.0).as_reference()),
        (2, aperture(70.0, 70.0)),
    ]);
    let mut store = DetectorStore::default();
    let config = TrackingConfig {
        search_half_width: 6.0,
        ..TrackingConfig::default()
    };

    let outcomes = run(&detector, &config, &mut apertures, &mut store);

    assert!(outcomes.iter().all(|o| o.status == FitStatus::Accepted));
    let reference = outcomes[0].fit.unwrap();
    assert!((reference.shift - DVec2::new(4.0, 3.0)).length() < 1e-2);
    // The second search started from the shifted position.
    let other = outcomes[1].fit.unwrap();
    assert!(other.shift.length() < 1e-2, "shift = {}", other.shift);
    assert!(apertures.get(&ApertureId(2)).unwrap().pos.distance(DVec2::new(74.0, 73.0)) < 1e-2);
}

#[test]
fn test_rejected_fit_retains_position_and_shape() {
    let detector = detector_with(&[]);
    let mut start = aperture(50.0, 50.0);
    start.fwhm = 4.2;
    start.beta = Some(3.3);
    let mut apertures = set(vec![(1, start.clone())]);
    let mut store = DetectorStore::default();

    let outcomes = run(&detector, &TrackingConfig::default(), &mut apertures, &mut store);

    assert_eq!(outcomes[0].status, FitStatus::LowHeight);
    assert!(outcomes[0].status.is_rejected());
    let alert = outcomes[0].alert.as_deref().unwrap();
    assert!(alert.contains("target lost"), "{alert}");
    assert!(alert.contains("ccd1"));
    let ap = apertures.get(&ApertureId(1)).unwrap();
    assert_eq!(ap.pos, start.pos);
    assert_eq!(ap.fwhm, 4.2);
    assert_eq!(ap.beta, Some(3.3));
    assert_eq!(store, DetectorStore::default());
}

#[test]
fn test_linked_aperture_follows_target() {
    let detector = detector_with(&[moffat(33.0, 28.0)]);
    let mut apertures = set(vec![
        (1, aperture(30.0, 30.0).as_reference()),
        (2, aperture(70.0, 70.0).linked_to(ApertureId(1))),
    ]);
    let mut store = DetectorStore::default();

    let outcomes = run(&detector, &TrackingConfig::default(), &mut apertures, &mut store);

    assert_eq!(outcomes[0].status, FitStatus::Accepted);
    assert_eq!(outcomes[1].status, FitStatus::Linked);
    assert!(outcomes[1].alert.is_none());
    assert!(apertures.get(&ApertureId(2)).unwrap().pos.distance(DVec2::new(73.0, 68.0)) < 1e-2);
}

#[test]
fn test_linked_to_rejected_target_stays_put() {
    let detector = detector_with(&[]);
    let mut apertures = set(vec![
        (1, aperture(30.0, 30.0)),
        (2, aperture(70.0, 70.0).linked_to(ApertureId(1))),
    ]);
    let mut store = DetectorStore::default();

    let outcomes = run(&detector, &TrackingConfig::default(), &mut apertures, &mut store);

    assert!(outcomes[0].status.is_rejected());
    assert_eq!(outcomes[1].status, FitStatus::Linked);
    assert_eq!(apertures.get(&ApertureId(2)).unwrap().pos, DVec2::new(70.0, 70.0));
}

#[test]
fn test_outside_windows_is_skipped_without_alert() {
    let detector = detector_with(&[moffat(50.0, 50.0)]);
    let mut apertures = set(vec![(1, aperture(150.0, 150.0))]);
    let mut store = DetectorStore::default();

    let outcomes = run(&detector, &TrackingConfig::default(), &mut apertures, &mut store);

    assert_eq!(outcomes[0].status, FitStatus::OutsideWindows);
    assert!(!outcomes[0].status.is_rejected());
    assert!(outcomes[0].alert.is_none());
    assert_eq!(apertures.get(&ApertureId(1)).unwrap().pos, DVec2::new(150.0, 150.0));
    assert!(apertures.get(&ApertureId(1)).unwrap().window.is_none());
}

#[test]
fn test_shifted_start_outside_windows_raises_alert() {
    let detector = detector_with(&[moffat(37.0, 37.0), moffat(93.0, 93.0)]);
    let mut apertures = set(vec![
        (1, aperture(30.0, 30.0).as_reference()),
        (2, Aperture::new(93.0, 93.0, 4.0, 5.0, 6.0)),
    ]);
    let mut store = DetectorStore::default();
    let config = TrackingConfig::default();

    let outcomes = run(&detector, &config, &mut apertures, &mut store);

    assert_eq!(outcomes[0].status, FitStatus::Accepted);
    assert_eq!(outcomes[1].status, FitStatus::OutsideWindows);
    let alert = outcomes[1].alert.as_deref().unwrap();
    assert!(alert.contains("aperture 2"), "{alert}");
    assert!(alert.contains("outside every window"), "{alert}");
    let ap = apertures.get(&ApertureId(2)).unwrap();
    assert_eq!(ap.pos, DVec2::new(93.0, 93.0));
    assert_eq!(ap.window.as_deref(), Some("1"));

    let noise = DetectorNoise::default();
    let extraction = ExtractionConfig::default();
    let result = Extractor::new(&detector, &extraction, &noise, &store, &config).extract_one(
        ApertureId(2),
        ap,
        &outcomes[1],
    );
    assert!(result.is_valid());
    assert!(result.flags.contains(QualityFlags::NOT_TRACKED));
    assert!(!result.fit_ok);
}

#[test]
fn test_width_out_of_range() {
    let detector = detector_with(&[Star::gaussian(50.0, 50.0, 1000.0, 12.0)]);
    let mut apertures = set(vec![(1, aperture(50.0, 50.0))]);
    let mut store = DetectorStore::default();
    let config = TrackingConfig {
        profile: ProfileKind::Gaussian,
        fwhm_max: 8.0,
        ..TrackingConfig::default()
    };

    let outcomes = run(&detector, &config, &mut apertures, &mut store);

    assert_eq!(outcomes[0].status, FitStatus::WidthOutOfRange);
    let fit = outcomes[0].fit.unwrap();
    assert!((fit.fwhm - 12.0).abs() < 0.1);
    assert_eq!(store.fwhm, None);
}

#[test]
fn test_shift_too_large() {
    let detector = detector_with(&[moffat(54.0, 50.0)]);
    let mut apertures = set(vec![(1, aperture(50.0, 50.0))]);
    let mut store = DetectorStore::default();
    let config = TrackingConfig {
        max_shift: 2.0,
        ..TrackingConfig::default()
    };

    let outcomes = run(&detector, &config, &mut apertures, &mut store);

    assert_eq!(outcomes[0].status, FitStatus::ShiftTooLarge);
    assert_eq!(apertures.get(&ApertureId(1)).unwrap().pos, DVec2::new(50.0, 50.0));
}

#[test]
fn test_near_edge() {
    let detector = detector_with(&[Star::gaussian(0.5, 50.0, 1000.0, 4.0)]);
    let mut apertures = set(vec![(1, aperture(3.0, 50.0))]);
    let mut store = DetectorStore::default();
    let config = TrackingConfig {
        profile: ProfileKind::Gaussian,
        ..TrackingConfig::default()
    };

    let outcomes = run(&detector, &config, &mut apertures, &mut store);

    assert_eq!(outcomes[0].status, FitStatus::NearEdge);
    assert_eq!(apertures.get(&ApertureId(1)).unwrap().pos, DVec2::new(3.0, 50.0));
}

#[test]
fn test_identical_frame_is_a_no_op() {
    let detector = detector_with(&[moffat(40.3, 60.8), moffat(70.1, 20.6)]);
    let mut apertures = set(vec![
        (1, aperture(40.0, 61.0).as_reference()),
        (2, aperture(70.0, 21.0)),
    ]);
    let mut store = DetectorStore::default();
    let config = TrackingConfig::default();

    run(&detector, &config, &mut apertures, &mut store);
    let first: Vec<DVec2> = apertures.iter().map(|(_, ap)| ap.pos).collect();
    let outcomes = run(&detector, &config, &mut apertures, &mut store);

    assert!(outcomes.iter().all(TrackOutcome::is_accepted));
    for (before, ap) in first.iter().zip(apertures.iter().map(|(_, ap)| ap)) {
        assert!(before.distance(ap.pos) < 1e-4);
    }
}

#[test]
fn test_smoothing_suppresses_single_hot_pixel() {
    let mut pixels = crate::testing::star_buffer(0, 0, 31, 31, 100.0, &[moffat(15.0, 15.0)]);
    pixels[(5, 5)] += 3000.0;
    let window = Window::new(0, 0, 1, 1, pixels);

    let (peak, _) = brightest_pixel(&window, 6.0).unwrap();
    assert_eq!(peak, DVec2::new(15.0, 15.0));
    let (raw_peak, value) = brightest_pixel(&window, 0.0).unwrap();
    assert_eq!(raw_peak, DVec2::new(5.0, 5.0));
    assert!(value > 3000.0);
}

#[test]
fn test_smooth_preserves_flat_field() {
    let flat = Buffer2::new_filled(9, 7, 42.0f32);
    let smoothed = smooth(&flat, 3.0);
    assert!(smoothed.iter().all(|&v| (v - 42.0).abs() < 1e-9));
}
