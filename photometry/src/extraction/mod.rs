//! Flux extraction.
//!
//! Pixels are assigned by the centre-in-circle rule: a pixel belongs to the
//! target when its centre lies within the target radius and to the sky when
//! its centre lies in the annulus and outside every mask circle.
//!
//! Numerical trouble never panics: the result is flagged `invalid` with zero
//! flux and infinite error instead.

mod sky;

pub use sky::{estimate_sky, SkyEstimate};

use glam::DVec2;

use crate::aperture::{Aperture, ApertureId, ApertureSet};
use crate::config::{
    DetectorNoise, ExtractionConfig, ExtractionMethod, ProfileKind, RadiusMode, TrackingConfig,
};
use crate::fitting::ProfileShape;
use crate::flags::QualityFlags;
use crate::frame::{Detector, Window};
use crate::store::DetectorStore;
use crate::tracker::{FitStatus, TrackOutcome};

/// Target and sky radii used for one measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Radii {
    pub target: f64,
    pub sky_inner: f64,
    pub sky_outer: f64,
}

impl Radii {
    pub fn resolve(ap: &Aperture, mode: &RadiusMode, fwhm: f64) -> Self {
        match *mode {
            RadiusMode::Fixed => Self {
                target: ap.target_radius,
                sky_inner: ap.sky_inner,
                sky_outer: ap.sky_outer,
            },
            RadiusMode::Variable {
                target_scale,
                sky_inner_scale,
                sky_outer_scale,
                min_radius,
                max_radius,
            } => {
                let target = (target_scale * fwhm).clamp(min_radius, max_radius);
                let sky_inner = (sky_inner_scale * fwhm).max(target);
                let sky_outer = (sky_outer_scale * fwhm).max(sky_inner + 1.0);
                Self {
                    target,
                    sky_inner,
                    sky_outer,
                }
            }
        }
    }
}

/// Measurement of one aperture in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub id: ApertureId,
    /// Aperture centre used for the measurement.
    pub pos: DVec2,
    pub flux: f64,
    pub flux_err: f64,
    /// Background per pixel.
    pub sky: f64,
    pub sky_err: f64,
    pub nsky: usize,
    pub nsky_rejected: usize,
    /// Pixels inside the target radius.
    pub npix: usize,
    pub radii: Radii,
    pub fwhm: f64,
    pub beta: Option<f64>,
    /// Method actually used, after any fallback.
    pub method: ExtractionMethod,
    pub saturated: bool,
    /// False when the aperture's profile fit was rejected or skipped this frame.
    pub fit_ok: bool,
    pub flags: QualityFlags,
}

fn fit_ok(flags: QualityFlags) -> bool {
    !flags.intersects(QualityFlags::FIT_REJECTED | QualityFlags::NOT_TRACKED)
}

impl ExtractionResult {
    /// Zero flux with infinite error at the aperture's current position.
    pub fn invalid(id: ApertureId, ap: &Aperture, flags: QualityFlags) -> Self {
        Self {
            id,
            pos: ap.pos,
            flux: 0.0,
            flux_err: f64::INFINITY,
            sky: 0.0,
            sky_err: f64::INFINITY,
            nsky: 0,
            nsky_rejected: 0,
            npix: 0,
            radii: Radii {
                target: ap.target_radius,
                sky_inner: ap.sky_inner,
                sky_outer: ap.sky_outer,
            },
            fwhm: ap.fwhm,
            beta: ap.beta,
            method: ExtractionMethod::Simple,
            saturated: false,
            fit_ok: fit_ok(flags),
            flags: flags | QualityFlags::INVALID,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.flags.contains(QualityFlags::INVALID)
    }
}

struct TargetPixel {
    r2: f64,
    value: f64,
}

struct Collected {
    target: Vec<TargetPixel>,
    sky: Vec<f64>,
    saturated: bool,
    nonlinear: bool,
}

fn collect(window: &Window, ap: &Aperture, radii: &Radii, noise: &DetectorNoise) -> Collected {
    let mut collected = Collected {
        target: Vec::new(),
        sky: Vec::new(),
        saturated: false,
        nonlinear: false,
    };
    let c = ap.pos;
    let reach = radii.sky_outer.max(radii.target);
    let Some(region) = window.crop(c.x - reach, c.x + reach, c.y - reach, c.y + reach) else {
        return collected;
    };

    let target2 = radii.target * radii.target;
    let inner2 = radii.sky_inner * radii.sky_inner;
    let outer2 = radii.sky_outer * radii.sky_outer;
    for (x, y, value, raw) in region.pixels_with_raw() {
        let r2 = (x - c.x).powi(2) + (y - c.y).powi(2);
        if r2 <= target2 {
            collected.target.push(TargetPixel { r2, value });
            if raw >= noise.saturation {
                collected.saturated = true;
            } else if raw >= noise.nonlinear {
                collected.nonlinear = true;
            }
        } else if r2 > inner2 && r2 <= outer2 && !ap.masks.iter().any(|m| m.covers(c, x, y)) {
            collected.sky.push(value);
        }
    }
    collected
}

/// Plain sum of sky-subtracted counts.
fn simple_flux(target: &[TargetPixel], sky: &SkyEstimate, noise: &DetectorNoise) -> (f64, f64) {
    let n = target.len() as f64;
    let flux = target.iter().map(|p| p.value - sky.level).sum::<f64>();
    let variance = target.iter().map(|p| noise.variance(p.value)).sum::<f64>()
        + n * n * sky.error().powi(2);
    (flux, variance)
}

/// Profile-weighted flux. `None` when the profile cannot be normalised or
/// every weight vanishes.
fn optimal_flux(
    target: &[TargetPixel],
    sky: &SkyEstimate,
    shape: &ProfileShape,
    pixel_area: f64,
    noise: &DetectorNoise,
    initial: f64,
) -> Option<(f64, f64)> {
    let profile = target
        .iter()
        .map(|p| shape.normalised(p.r2).map(|value| value * pixel_area))
        .collect::<Option<Vec<f64>>>()?;

    let mut flux = initial;
    let mut variance = f64::INFINITY;
    for _ in 0..2 {
        let mut norm = 0.0;
        let mut sum = 0.0;
        let mut weights = 0.0;
        for (p, &prof) in target.iter().zip(&profile) {
            let v = noise.variance(sky.level + flux * prof);
            norm += prof * prof / v;
            sum += prof * (p.value - sky.level) / v;
            weights += prof / v;
        }
        if !(norm > 0.0) {
            return None;
        }
        flux = sum / norm;
        let weight_sum = weights / norm;
        variance = 1.0 / norm + weight_sum * weight_sum * sky.error().powi(2);
    }
    Some((flux, variance))
}

/// Extracts every aperture of one detector.
pub struct Extractor<'a> {
    detector: &'a Detector,
    config: &'a ExtractionConfig,
    noise: &'a DetectorNoise,
    /// Store mean FWHM, used for variable radii.
    mean_fwhm: f64,
    /// Store mean profile, used to weight apertures that were not fitted.
    mean_shape: Option<ProfileShape>,
}

impl<'a> Extractor<'a> {
    pub fn new(
        detector: &'a Detector,
        config: &'a ExtractionConfig,
        noise: &'a DetectorNoise,
        store: &DetectorStore,
        tracking: &TrackingConfig,
    ) -> Self {
        let mean_shape = store.fwhm.map(|fwhm| match tracking.profile {
            ProfileKind::Gaussian => ProfileShape::Gaussian { fwhm },
            ProfileKind::Moffat { beta, fit_beta } => ProfileShape::Moffat {
                fwhm,
                beta: if fit_beta { store.seed_beta(beta) } else { beta },
            },
        });
        Self {
            detector,
            config,
            noise,
            mean_fwhm: store.seed_fwhm(tracking.fwhm),
            mean_shape,
        }
    }

    /// One result per aperture, in aperture-set order. `outcomes` must be in
    /// the same order.
    pub fn extract(&self, apertures: &ApertureSet, outcomes: &[TrackOutcome]) -> Vec<ExtractionResult> {
        apertures
            .iter()
            .zip(outcomes)
            .map(|((&id, ap), outcome)| {
                debug_assert_eq!(id, outcome.id);
                self.extract_one(id, ap, outcome)
            })
            .collect()
    }

    pub fn extract_one(&self, id: ApertureId, ap: &Aperture, outcome: &TrackOutcome) -> ExtractionResult {
        let mut flags = QualityFlags::empty();
        if outcome.status.is_rejected() {
            flags.insert(QualityFlags::FIT_REJECTED);
        }
        if outcome.status == FitStatus::OutsideWindows {
            flags.insert(QualityFlags::NOT_TRACKED);
        }

        let window = ap
            .window
            .as_deref()
            .and_then(|name| self.detector.window(name))
            .or_else(|| self.detector.enclosing(ap.pos.x, ap.pos.y).map(|(_, w)| w));
        let Some(window) = window else {
            return ExtractionResult::invalid(id, ap, flags | QualityFlags::NOT_TRACKED);
        };

        let radii = Radii::resolve(ap, &self.config.radii, self.mean_fwhm);
        let collected = collect(window, ap, &radii, self.noise);
        if collected.target.is_empty() {
            return ExtractionResult::invalid(id, ap, flags);
        }
        let Some(sky) = estimate_sky(&collected.sky, self.config.sky) else {
            return ExtractionResult::invalid(id, ap, flags | QualityFlags::NO_SKY);
        };

        let edge = window.distance(ap.pos.x, ap.pos.y);
        if edge < radii.target {
            flags.insert(QualityFlags::TARGET_AT_EDGE);
        }
        if edge < radii.sky_outer {
            flags.insert(QualityFlags::SKY_AT_EDGE);
        }
        if collected.saturated {
            flags.insert(QualityFlags::SATURATED);
        }
        if collected.nonlinear {
            flags.insert(QualityFlags::NONLINEAR);
        }

        let (mut flux, mut variance) = simple_flux(&collected.target, &sky, self.noise);
        let mut method = ExtractionMethod::Simple;
        if self.config.method == ExtractionMethod::Optimal {
            let shape = match outcome.status {
                FitStatus::Accepted => outcome.shape,
                FitStatus::Linked | FitStatus::OutsideWindows => self.mean_shape,
                _ => None,
            };
            let optimal = shape.and_then(|shape| {
                optimal_flux(&collected.target, &sky, &shape, window.pixel_area(), self.noise, flux)
            });
            match optimal {
                Some((f, v)) => {
                    flux = f;
                    variance = v;
                    method = ExtractionMethod::Optimal;
                }
                None => flags.insert(QualityFlags::OPTIMAL_FALLBACK),
            }
        }

        if !(flux.is_finite() && variance.is_finite() && variance > 0.0) {
            tracing::debug!(
                "Detector {}, aperture {id}: non-finite flux or variance",
                self.detector.name
            );
            return ExtractionResult::invalid(id, ap, flags);
        }

        ExtractionResult {
            id,
            pos: ap.pos,
            flux,
            flux_err: variance.sqrt(),
            sky: sky.level,
            sky_err: sky.error(),
            nsky: sky.n,
            nsky_rejected: sky.rejected,
            npix: collected.target.len(),
            radii,
            fwhm: ap.fwhm,
            beta: ap.beta,
            method,
            saturated: collected.saturated,
            fit_ok: fit_ok(flags),
            flags,
        }
    }
}
