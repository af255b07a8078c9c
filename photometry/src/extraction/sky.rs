//! Sky background from annulus pixels.

use crate::config::SkyMethod;
use crate::stats;

const CLIP_ITERATIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyEstimate {
    /// Background per pixel.
    pub level: f64,
    /// Pixel-to-pixel scatter of the background.
    pub sigma: f64,
    /// Pixels contributing to `level`.
    pub n: usize,
    pub rejected: usize,
}

impl SkyEstimate {
    /// Uncertainty of `level`.
    pub fn error(&self) -> f64 {
        self.sigma / (self.n as f64).sqrt()
    }
}

/// `None` when no finite pixel is available.
pub fn estimate_sky(values: &[f64], method: SkyMethod) -> Option<SkyEstimate> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    match method {
        SkyMethod::Median => {
            let n = finite.len();
            let (level, sigma) = stats::median_and_sigma_mut(&mut finite)?;
            Some(SkyEstimate {
                level,
                sigma,
                n,
                rejected: 0,
            })
        }
        SkyMethod::Clipped { threshold } => {
            let clipped = stats::clipped_mean(&finite, threshold, CLIP_ITERATIONS)?;
            Some(SkyEstimate {
                level: clipped.mean,
                sigma: clipped.sigma,
                n: clipped.kept,
                rejected: clipped.rejected,
            })
        }
    }
}
