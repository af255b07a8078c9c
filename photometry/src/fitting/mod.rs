//! Profile fitting with iterative outlier rejection.
//!
//! Pixels are weighted by the inverse of the detector noise model. After
//! each fit, pixels deviating by more than `reject_threshold` times the fit
//! RMS are dropped and the fit is repeated, up to `max_clip_iterations`
//! times. The RMS is floored at 1 so that a noise model which overestimates
//! the scatter never causes good pixels to be clipped.

mod linear_solver;
mod lm_optimizer;
mod profile;

pub use lm_optimizer::{LMConfig, LMModel, LMResult};
pub use profile::ProfileShape;

use glam::DVec2;

use crate::config::{DetectorNoise, ProfileKind, TrackingConfig};
use crate::frame::Window;
use lm_optimizer::{optimize, FitData};
use profile::{Bounds, GaussianModel, MoffatFixedModel, MoffatModel};

/// Pixel samples of a fit box with inverse-variance weights.
#[derive(Debug, Clone, Default)]
pub struct Samples {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub weight: Vec<f64>,
}

impl Samples {
    pub fn from_window(window: &Window, noise: &DetectorNoise) -> Self {
        let n = window.nx() * window.ny();
        let mut samples = Self {
            x: Vec::with_capacity(n),
            y: Vec::with_capacity(n),
            z: Vec::with_capacity(n),
            weight: Vec::with_capacity(n),
        };
        for (x, y, z) in window.pixels() {
            let variance = noise.variance(z);
            let weight = if z.is_finite() && variance > 0.0 {
                1.0 / variance
            } else {
                0.0
            };
            samples.x.push(x);
            samples.y.push(y);
            samples.z.push(z);
            samples.weight.push(weight);
        }
        samples
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Starting point of a fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileGuess {
    pub pos: DVec2,
    pub height: f64,
    pub fwhm: f64,
    /// Used only when the Moffat exponent is fitted.
    pub beta: f64,
    pub sky: f64,
}

#[derive(Debug, Clone)]
pub struct FitSettings {
    pub kind: ProfileKind,
    pub reject_threshold: f64,
    pub max_clip_iterations: usize,
    pub fwhm_bounds: (f64, f64),
    pub beta_bounds: (f64, f64),
    pub lm: LMConfig,
}

impl FitSettings {
    /// Hard parameter bounds are looser than the acceptance range, so that
    /// a star outside the range is fitted and then rejected rather than
    /// pinned to the boundary and accepted.
    pub fn from_tracking(config: &TrackingConfig) -> Self {
        Self {
            kind: config.profile,
            reject_threshold: config.reject_threshold,
            max_clip_iterations: config.max_clip_iterations,
            fwhm_bounds: (0.25 * config.fwhm_min, 2.0 * config.fwhm_max),
            beta_bounds: (0.5, config.beta_max),
            lm: LMConfig {
                max_iterations: config.fit_iterations,
                ..LMConfig::default()
            },
        }
    }

    fn bounds(&self) -> Bounds {
        Bounds {
            fwhm: self.fwhm_bounds,
            beta: self.beta_bounds,
            min_height: 0.01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileFit {
    pub pos: DVec2,
    pub height: f64,
    pub sky: f64,
    pub shape: ProfileShape,
    /// Reduced chi-squared over the pixels kept after clipping.
    pub chi2: f64,
    pub npix: usize,
    pub nrej: usize,
    pub converged: bool,
    pub iterations: usize,
}

impl ProfileFit {
    pub fn fwhm(&self) -> f64 {
        self.shape.fwhm()
    }

    pub fn beta(&self) -> Option<f64> {
        self.shape.beta()
    }

    pub fn is_finite(&self) -> bool {
        self.pos.is_finite()
            && self.height.is_finite()
            && self.sky.is_finite()
            && self.fwhm().is_finite()
            && self.beta().map_or(true, f64::is_finite)
    }
}

/// Fits the configured profile to `samples`.
///
/// Returns `None` when too few usable pixels remain to constrain the
/// parameters.
pub fn fit_profile(
    samples: &Samples,
    guess: &ProfileGuess,
    settings: &FitSettings,
) -> Option<ProfileFit> {
    let bounds = settings.bounds();
    let [x0, y0] = guess.pos.to_array();
    match settings.kind {
        ProfileKind::Gaussian => {
            let model = GaussianModel { bounds };
            let initial = [x0, y0, guess.height, guess.fwhm, guess.sky];
            let clipped = fit_with_clipping(&model, samples, initial, settings)?;
            let [x, y, height, fwhm, sky] = clipped.result.params;
            Some(clipped.into_fit(x, y, height, sky, ProfileShape::Gaussian { fwhm }))
        }
        ProfileKind::Moffat {
            beta,
            fit_beta: false,
        } => {
            let model = MoffatFixedModel { beta, bounds };
            let initial = [x0, y0, guess.height, guess.fwhm, guess.sky];
            let clipped = fit_with_clipping(&model, samples, initial, settings)?;
            let [x, y, height, fwhm, sky] = clipped.result.params;
            Some(clipped.into_fit(x, y, height, sky, ProfileShape::Moffat { fwhm, beta }))
        }
        ProfileKind::Moffat { fit_beta: true, .. } => {
            let model = MoffatModel { bounds };
            let initial = [x0, y0, guess.height, guess.fwhm, guess.beta, guess.sky];
            let clipped = fit_with_clipping(&model, samples, initial, settings)?;
            let [x, y, height, fwhm, beta, sky] = clipped.result.params;
            Some(clipped.into_fit(x, y, height, sky, ProfileShape::Moffat { fwhm, beta }))
        }
    }
}

struct ClippedFit<const N: usize> {
    result: LMResult<N>,
    npix: usize,
    nrej: usize,
}

impl<const N: usize> ClippedFit<N> {
    fn into_fit(self, x: f64, y: f64, height: f64, sky: f64, shape: ProfileShape) -> ProfileFit {
        ProfileFit {
            pos: DVec2::new(x, y),
            height,
            sky,
            shape,
            chi2: self.result.chi2 / (self.npix - N) as f64,
            npix: self.npix,
            nrej: self.nrej,
            converged: self.result.converged,
            iterations: self.result.iterations,
        }
    }
}

fn fit_with_clipping<const N: usize, M: LMModel<N>>(
    model: &M,
    samples: &Samples,
    initial: [f64; N],
    settings: &FitSettings,
) -> Option<ClippedFit<N>> {
    let mut weight = samples.weight.clone();
    let usable = weight.iter().filter(|&&w| w > 0.0).count();
    let mut params = initial;
    let mut pass = 0;

    loop {
        let npix = weight.iter().filter(|&&w| w > 0.0).count();
        if npix <= N {
            return None;
        }
        let data = FitData {
            x: &samples.x,
            y: &samples.y,
            z: &samples.z,
            weight: &weight,
        };
        let result = optimize(model, &data, params, &settings.lm);
        params = result.params;

        let done = |result| {
            Some(ClippedFit {
                result,
                npix,
                nrej: usable - npix,
            })
        };
        if pass == settings.max_clip_iterations {
            return done(result);
        }

        let rms = (result.chi2 / (npix - N) as f64).sqrt();
        let limit = settings.reject_threshold * rms.max(1.0);
        let mut clipped = 0;
        for i in 0..samples.len() {
            if weight[i] <= 0.0 {
                continue;
            }
            let residual = samples.z[i] - model.evaluate(samples.x[i], samples.y[i], &params);
            if (residual * weight[i].sqrt()).abs() > limit {
                weight[i] = 0.0;
                clipped += 1;
            }
        }
        if clipped == 0 {
            return done(result);
        }
        tracing::trace!("Clipped {clipped} pixels on pass {pass}, rms {rms:.3}");
        pass += 1;
    }
}

#[cfg(test)]
mod tests;
