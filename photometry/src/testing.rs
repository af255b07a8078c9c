//! Synthetic frames and helpers shared by the unit tests.

use common::Buffer2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::DetectorNoise;
use crate::fitting::ProfileShape;
use crate::frame::{Detector, Frame, Window};

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Copy)]
pub struct Star {
    pub x: f64,
    pub y: f64,
    pub height: f64,
    pub shape: ProfileShape,
}

impl Star {
    pub fn gaussian(x: f64, y: f64, height: f64, fwhm: f64) -> Self {
        Self {
            x,
            y,
            height,
            shape: ProfileShape::Gaussian { fwhm },
        }
    }

    pub fn moffat(x: f64, y: f64, height: f64, fwhm: f64, beta: f64) -> Self {
        Self {
            x,
            y,
            height,
            shape: ProfileShape::Moffat { fwhm, beta },
        }
    }

    fn value(&self, x: f64, y: f64) -> f64 {
        let dx = x - self.x;
        let dy = y - self.y;
        self.height * self.shape.evaluate(dx * dx + dy * dy)
    }
}

/// Unbinned `nx × ny` pixels starting at `(llx, lly)`: flat sky plus stars
/// sampled at pixel centres.
pub fn star_buffer(
    llx: usize,
    lly: usize,
    nx: usize,
    ny: usize,
    sky: f64,
    stars: &[Star],
) -> Buffer2<f32> {
    let mut pixels = Vec::with_capacity(nx * ny);
    for iy in 0..ny {
        for ix in 0..nx {
            let x = (llx + ix) as f64;
            let y = (lly + iy) as f64;
            let value = sky + stars.iter().map(|s| s.value(x, y)).sum::<f64>();
            pixels.push(value as f32);
        }
    }
    Buffer2::new(nx, ny, pixels)
}

pub fn star_window(
    llx: usize,
    lly: usize,
    nx: usize,
    ny: usize,
    sky: f64,
    stars: &[Star],
) -> Window {
    Window::new(llx, lly, 1, 1, star_buffer(llx, lly, nx, ny, sky, stars))
}

/// Adds Gaussian noise following the detector noise model.
pub fn add_detector_noise(pixels: &mut Buffer2<f32>, noise: &DetectorNoise, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for value in pixels.pixels_mut() {
        let sigma = noise.variance(*value as f64).sqrt();
        let u1: f64 = rng.random_range(1e-10f64..1.0);
        let u2: f64 = rng.random_range(0.0f64..1.0);
        let gauss = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        *value += (gauss * sigma) as f32;
    }
}

pub fn noisy_star_window(
    size: usize,
    sky: f64,
    stars: &[Star],
    noise: &DetectorNoise,
    seed: u64,
) -> Window {
    let mut pixels = star_buffer(0, 0, size, size, sky, stars);
    add_detector_noise(&mut pixels, noise, seed);
    Window::new(0, 0, 1, 1, pixels)
}

/// Frame whose detectors each hold one window.
pub fn frame_of(number: u64, timestamp: f64, windows: Vec<(&str, Window)>) -> Frame {
    let detectors = windows
        .into_iter()
        .map(|(name, window)| Detector::single(name, window))
        .collect();
    Frame::new(number, timestamp, detectors)
}
