//! Reduces a synthetic three-detector run and prints the light curves.
//!
//! Two stars drift slowly across each detector. Clouds hide everything on
//! `ccd2` for a few frames, which shows up as alerts and flagged points.
//!
//! Run with `cargo run -p photometry --example reduce_synthetic`.

use std::sync::atomic::AtomicBool;

use common::Buffer2;
use photometry::config::{ExtractionMethod, LightCurveConfig, Quantity, SeriesDef};
use photometry::{
    Aperture, ApertureId, ApertureMap, ApertureSet, Detector, Frame, MemoryLog, ProfileShape,
    ReduceConfig, Reducer, Role, VecFrameSource, Window,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DETECTORS: [&str; 3] = ["ccd1", "ccd2", "ccd3"];
const SIZE: usize = 120;
const SKY: f64 = 150.0;
const FRAMES: u64 = 12;
const CADENCE_DAYS: f64 = 10.0 / 86400.0;

struct SyntheticStar {
    x: f64,
    y: f64,
    height: f64,
}

fn render(stars: &[SyntheticStar], shape: ProfileShape, rng: &mut StdRng) -> Buffer2<f32> {
    let mut pixels = Vec::with_capacity(SIZE * SIZE);
    for iy in 0..SIZE {
        for ix in 0..SIZE {
            let value = SKY
                + stars
                    .iter()
                    .map(|s| {
                        let r2 = (ix as f64 - s.x).powi(2) + (iy as f64 - s.y).powi(2);
                        s.height * shape.evaluate(r2)
                    })
                    .sum::<f64>();
            // Read noise of 4 counts plus Poisson noise at unit gain.
            let sigma = (16.0 + value).sqrt();
            let u1: f64 = rng.random_range(1e-10f64..1.0);
            let u2: f64 = rng.random_range(0.0f64..1.0);
            let gauss = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
            pixels.push((value + sigma * gauss) as f32);
        }
    }
    Buffer2::new(SIZE, SIZE, pixels)
}

fn make_frame(number: u64, rng: &mut StdRng) -> Frame {
    let drift = number as f64 * 0.35;
    let shape = ProfileShape::Moffat { fwhm: 4.5, beta: 3.5 };
    let detectors = DETECTORS
        .iter()
        .enumerate()
        .map(|(idx, &name)| {
            let clouded = name == "ccd2" && (6..=8).contains(&number);
            let transmission = if clouded { 0.01 } else { 1.0 };
            // A slow sinusoidal variation on the target only.
            let variation = 1.0 + 0.1 * (number as f64 * 0.8).sin();
            let stars = [
                SyntheticStar {
                    x: 40.0 + drift,
                    y: 45.0 + drift * 0.5,
                    height: 4000.0 * transmission * variation / (idx + 1) as f64,
                },
                SyntheticStar {
                    x: 80.0 + drift,
                    y: 75.0 + drift * 0.5,
                    height: 6000.0 * transmission / (idx + 1) as f64,
                },
            ];
            Detector::single(name, Window::new(0, 0, 1, 1, render(&stars, shape, rng)))
        })
        .collect();
    Frame::new(number, 60300.0 + number as f64 * CADENCE_DAYS, detectors)
}

fn apertures() -> anyhow::Result<ApertureMap> {
    let mut map = ApertureMap::new();
    for name in DETECTORS {
        let set = ApertureSet::try_from_iter([
            (ApertureId(1), Aperture::new(40.0, 45.0, 7.0, 11.0, 16.0)),
            (
                ApertureId(2),
                Aperture::new(80.0, 75.0, 7.0, 11.0, 16.0)
                    .as_reference()
                    .with_role(Role::Comparison),
            ),
        ])?;
        map.insert(name.to_string(), set);
    }
    Ok(map)
}

fn main() -> anyhow::Result<()> {
    let mut config = ReduceConfig::default();
    config.log.file_prefix = "reduce_synthetic".to_string();
    common::log_setup::setup_logging(&config.log)?;

    config.dispatch.workers = DETECTORS.len();
    config.extraction.method = ExtractionMethod::Optimal;
    config.noise.default.read_noise = 4.0;
    config.lightcurve = LightCurveConfig {
        keep_minutes: 1.0,
        series: DETECTORS
            .iter()
            .map(|&name| SeriesDef {
                name: format!("{name} target/comparison"),
                detector: name.to_string(),
                target: 1,
                comparison: Some(2),
                quantity: Quantity::Flux,
            })
            .chain(std::iter::once(SeriesDef {
                name: "ccd2 transmission".to_string(),
                detector: "ccd2".to_string(),
                target: 2,
                comparison: None,
                quantity: Quantity::Transmission,
            }))
            .collect(),
    };

    let mut rng = StdRng::seed_from_u64(7);
    let frames = (1..=FRAMES).map(|n| make_frame(n, &mut rng)).collect();
    let mut source = VecFrameSource::new(frames);
    let mut log = MemoryLog::default();

    let mut reducer = Reducer::new(config, apertures()?)?;
    let summary = reducer.run(&mut source, &mut log, &AtomicBool::new(false))?;

    println!(
        "{} frames processed, {} skipped, {} alerts ({})",
        summary.processed, summary.skipped, summary.alerts, summary.stop
    );
    for frame in &log.frames {
        for alert in &frame.alerts {
            println!("  frame {:>3}: {alert}", frame.number);
        }
    }

    let tzero = reducer.tzero().unwrap_or_default();
    for series in reducer.lightcurves().series() {
        println!("{} ({} points kept)", series.name(), series.len());
        for point in series.points() {
            println!(
                "  {:>8.1} s  {:>8.4} ± {:<8.4} {}",
                (point.time - tzero) * 86400.0,
                point.value,
                point.error,
                point.flags
            );
        }
    }

    for name in DETECTORS {
        let Some(store) = reducer.store().get(name) else {
            continue;
        };
        let mut ids: Vec<_> = store.positions.keys().copied().collect();
        ids.sort();
        for id in ids {
            if let Some(pos) = store.last_good(id) {
                println!("{name} aperture {id}: last good ({:.2}, {:.2})", pos.x, pos.y);
            }
        }
    }
    Ok(())
}
