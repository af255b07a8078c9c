//! Reduction settings.
//!
//! Every section has working defaults, so a settings file only needs to
//! name what differs. Load with [`ReduceConfig::from_file`] and check with
//! [`ReduceConfig::validate`] before starting a run.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use common::log_setup::LogSettings;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::error::ConfigError;

/// Radial profile fitted to each star.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Display)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProfileKind {
    Gaussian,
    /// Moffat profile with exponent `beta`, optionally fitted per star.
    Moffat { beta: f64, fit_beta: bool },
}

impl Default for ProfileKind {
    fn default() -> Self {
        Self::Moffat {
            beta: 5.0,
            fit_beta: true,
        }
    }
}

/// Settings for the aperture tracker.
///
/// Distances are in unbinned detector pixels unless noted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Half-width of the box searched for the brightest smoothed pixel.
    pub search_half_width: f64,
    /// Half-width of the box used for profile fitting.
    pub fit_half_width: f64,
    /// FWHM of the Gaussian smoothing applied before the peak search, in
    /// binned pixels. Zero disables smoothing.
    pub smooth_fwhm: f64,
    pub profile: ProfileKind,
    /// Initial FWHM guess until the store holds a measured value.
    pub fwhm: f64,
    /// Accepted FWHM range.
    pub fwhm_min: f64,
    pub fwhm_max: f64,
    /// Upper bound on the fitted Moffat exponent.
    pub beta_max: f64,
    /// Minimum fitted peak height above sky, in counts.
    pub min_height: f64,
    /// Outlier rejection threshold in units of the fit RMS.
    pub reject_threshold: f64,
    pub max_clip_iterations: usize,
    /// Largest accepted move between the search start and the fitted position.
    pub max_shift: f64,
    /// Weight of the newest frame when blending into the shared store, in (0, 1].
    pub store_weight: f64,
    pub fit_iterations: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            search_half_width: 11.0,
            fit_half_width: 21.0,
            smooth_fwhm: 6.0,
            profile: ProfileKind::default(),
            fwhm: 6.0,
            fwhm_min: 1.5,
            fwhm_max: 20.0,
            beta_max: 20.0,
            min_height: 50.0,
            reject_threshold: 4.0,
            max_clip_iterations: 5,
            max_shift: 15.0,
            store_weight: 0.5,
            fit_iterations: 50,
        }
    }
}

impl TrackingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("tracking.search_half_width", self.search_half_width)?;
        positive("tracking.fit_half_width", self.fit_half_width)?;
        non_negative("tracking.smooth_fwhm", self.smooth_fwhm)?;
        positive("tracking.fwhm", self.fwhm)?;
        positive("tracking.fwhm_min", self.fwhm_min)?;
        if self.fwhm_max <= self.fwhm_min {
            return Err(ConfigError::invalid(
                "tracking.fwhm_max",
                format!("must exceed fwhm_min ({})", self.fwhm_min),
            ));
        }
        if let ProfileKind::Moffat { beta, .. } = self.profile {
            if !(beta > 0.0 && beta <= self.beta_max) {
                return Err(ConfigError::invalid(
                    "tracking.profile.beta",
                    format!("must be in (0, {}], got {beta}", self.beta_max),
                ));
            }
        }
        non_negative("tracking.min_height", self.min_height)?;
        positive("tracking.reject_threshold", self.reject_threshold)?;
        positive("tracking.max_shift", self.max_shift)?;
        if !(self.store_weight > 0.0 && self.store_weight <= 1.0) {
            return Err(ConfigError::invalid(
                "tracking.store_weight",
                format!("must be in (0, 1], got {}", self.store_weight),
            ));
        }
        if self.fit_iterations == 0 {
            return Err(ConfigError::invalid("tracking.fit_iterations", "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExtractionMethod {
    /// Straight sum of sky-subtracted counts inside the target radius.
    #[default]
    Simple,
    /// Profile-weighted sum, falling back to `Simple` when no accepted profile exists.
    Optimal,
}

/// How target and sky radii are chosen each frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RadiusMode {
    /// Use the radii stored on each aperture.
    Fixed,
    /// Scale radii with the current FWHM.
    Variable {
        target_scale: f64,
        sky_inner_scale: f64,
        sky_outer_scale: f64,
        min_radius: f64,
        max_radius: f64,
    },
}

impl Default for RadiusMode {
    fn default() -> Self {
        Self::Fixed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SkyMethod {
    Median,
    /// Iterative mean with rejection beyond `threshold` standard deviations.
    Clipped { threshold: f64 },
}

impl Default for SkyMethod {
    fn default() -> Self {
        Self::Clipped { threshold: 3.0 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub method: ExtractionMethod,
    pub radii: RadiusMode,
    pub sky: SkyMethod,
}

impl ExtractionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let RadiusMode::Variable {
            target_scale,
            sky_inner_scale,
            sky_outer_scale,
            min_radius,
            max_radius,
        } = self.radii
        {
            positive("extraction.radii.target_scale", target_scale)?;
            if sky_outer_scale <= sky_inner_scale {
                return Err(ConfigError::invalid(
                    "extraction.radii.sky_outer_scale",
                    "must exceed sky_inner_scale",
                ));
            }
            positive("extraction.radii.min_radius", min_radius)?;
            if max_radius < min_radius {
                return Err(ConfigError::invalid(
                    "extraction.radii.max_radius",
                    "must not be below min_radius",
                ));
            }
        }
        if let SkyMethod::Clipped { threshold } = self.sky {
            positive("extraction.sky.threshold", threshold)?;
        }
        Ok(())
    }
}

/// Noise and linearity properties of one detector, in counts (ADU).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorNoise {
    pub read_noise: f64,
    /// Electrons per count.
    pub gain: f64,
    pub saturation: f64,
    pub nonlinear: f64,
}

impl Default for DetectorNoise {
    fn default() -> Self {
        Self {
            read_noise: 3.0,
            gain: 1.0,
            saturation: 65535.0,
            nonlinear: 60000.0,
        }
    }
}

impl DetectorNoise {
    /// Variance in counts² of a pixel holding `counts`.
    #[inline]
    pub fn variance(&self, counts: f64) -> f64 {
        self.read_noise * self.read_noise + counts.max(0.0) / self.gain
    }

    fn validate(&self) -> Result<(), ConfigError> {
        positive("noise.read_noise", self.read_noise)?;
        positive("noise.gain", self.gain)?;
        positive("noise.saturation", self.saturation)?;
        positive("noise.nonlinear", self.nonlinear)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub default: DetectorNoise,
    /// Per-detector overrides keyed by detector name.
    pub detectors: HashMap<String, DetectorNoise>,
}

impl NoiseConfig {
    pub fn for_detector(&self, name: &str) -> &DetectorNoise {
        self.detectors.get(name).unwrap_or(&self.default)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default.validate()?;
        self.detectors.values().try_for_each(DetectorNoise::validate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Number of worker threads. 0 or 1 processes detectors serially.
    pub workers: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { workers: 1 }
    }
}

/// Quantity plotted by a light-curve series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Quantity {
    #[default]
    Flux,
    X,
    Y,
    Fwhm,
    /// Flux as a fraction of the highest flux the series has seen.
    Transmission,
}

/// One light-curve series: a target aperture, optionally divided by a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesDef {
    pub name: String,
    pub detector: String,
    pub target: u32,
    #[serde(default)]
    pub comparison: Option<u32>,
    #[serde(default)]
    pub quantity: Quantity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightCurveConfig {
    /// Time window kept in memory, in minutes. 0 keeps everything.
    pub keep_minutes: f64,
    pub series: Vec<SeriesDef>,
}

impl LightCurveConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("lightcurve.keep_minutes", self.keep_minutes)?;
        for def in &self.series {
            if def.comparison.is_some() && def.quantity != Quantity::Flux {
                return Err(ConfigError::invalid(
                    "lightcurve.series",
                    format!("series '{}' divides a {} by a comparison", def.name, def.quantity),
                ));
            }
        }
        Ok(())
    }
}

/// What to do while the frame source has nothing new.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    pub poll_interval_secs: f64,
    /// Give up after waiting this long without a new frame.
    pub max_wait_secs: f64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 1.0,
            max_wait_secs: 10.0,
        }
    }
}

impl WaitConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs_f64(self.max_wait_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("wait.poll_interval_secs", self.poll_interval_secs)?;
        non_negative("wait.max_wait_secs", self.max_wait_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReduceConfig {
    pub tracking: TrackingConfig,
    pub extraction: ExtractionConfig,
    pub noise: NoiseConfig,
    pub dispatch: DispatchConfig,
    pub lightcurve: LightCurveConfig,
    pub wait: WaitConfig,
    pub log: LogSettings,
}

impl ReduceConfig {
    /// Loads settings from a `.yaml`, `.yml` or `.json` file and validates them.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = common::load_file(path)?;
        config.validate()?;
        tracing::info!("Loaded reduction settings from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tracking.validate()?;
        self.extraction.validate()?;
        self.noise.validate()?;
        self.lightcurve.validate()?;
        self.wait.validate()
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be positive, got {value}")))
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must not be negative, got {value}")))
    }
}
