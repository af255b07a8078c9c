//! Peak search inside the search box.

use common::Buffer2;
use glam::DVec2;

use crate::frame::Window;

pub const FWHM_TO_SIGMA: f64 = 2.354_82;

/// Separable Gaussian smoothing. Near the edges each output pixel is
/// normalised by the kernel weight that fell inside the buffer.
pub fn smooth(data: &Buffer2<f32>, fwhm: f64) -> Buffer2<f64> {
    let (width, height) = (data.width(), data.height());
    let values: Vec<f64> = data.iter().map(|&v| v as f64).collect();
    if fwhm <= 0.0 {
        return Buffer2::new(width, height, values);
    }

    let sigma = fwhm / FWHM_TO_SIGMA;
    let radius = (3.0 * sigma).ceil() as isize;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|i| (-0.5 * (i as f64 / sigma).powi(2)).exp())
        .collect();

    let convolve = |input: &[f64], len: usize, stride: usize, count: usize, step: usize| {
        let mut output = vec![0.0; input.len()];
        for line in 0..count {
            let base = line * step;
            for i in 0..len as isize {
                let mut sum = 0.0;
                let mut norm = 0.0;
                for (k, weight) in kernel.iter().enumerate() {
                    let j = i + k as isize - radius;
                    if j < 0 || j >= len as isize {
                        continue;
                    }
                    sum += weight * input[base + j as usize * stride];
                    norm += weight;
                }
                output[base + i as usize * stride] = sum / norm;
            }
        }
        output
    };

    let rows = convolve(&values, width, 1, height, width);
    let smoothed = convolve(&rows, height, width, width, 1);
    Buffer2::new(width, height, smoothed)
}

/// Position of the brightest smoothed pixel and its unsmoothed value.
///
/// Non-finite pixels never win. `None` when no pixel is finite.
pub fn brightest_pixel(window: &Window, smooth_fwhm: f64) -> Option<(DVec2, f64)> {
    let smoothed = smooth(window.data(), smooth_fwhm);
    let width = smoothed.width();
    let (index, _) = smoothed
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|(_, a), (_, b)| a.total_cmp(b))?;
    let (ix, iy) = (index % width, index / width);
    let value = window.data()[(ix, iy)] as f64;
    Some((DVec2::new(window.x(ix), window.y(iy)), value))
}
