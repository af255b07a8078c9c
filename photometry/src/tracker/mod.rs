//! Per-frame aperture tracking.
//!
//! Reference apertures are fitted first, starting from their previous
//! positions. The mean shift of the accepted references is added to the
//! start position of every other unlinked aperture before it is fitted.
//! Linked apertures are never fitted: they move by the same amount as the
//! aperture they link to. A rejected fit leaves the aperture exactly where it
//! was, with its previous shape.

mod search;

pub use search::{brightest_pixel, smooth, FWHM_TO_SIGMA};

use std::collections::HashMap;

use glam::DVec2;
use strum_macros::Display;

use crate::aperture::{Aperture, ApertureId, ApertureSet};
use crate::config::{DetectorNoise, ProfileKind, TrackingConfig};
use crate::fitting::{fit_profile, FitSettings, ProfileFit, ProfileGuess, ProfileShape, Samples};
use crate::frame::{Detector, Window};
use crate::store::{AcceptedFit, DetectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FitStatus {
    Accepted,
    /// Moved with its link target; no fit attempted.
    Linked,
    /// Centre outside every window; no fit attempted.
    OutsideWindows,
    LowHeight,
    WidthOutOfRange,
    NearEdge,
    ShiftTooLarge,
    /// No usable fit: empty box, too few pixels or non-finite parameters.
    Failed,
}

impl FitStatus {
    pub fn is_rejected(self) -> bool {
        matches!(
            self,
            Self::LowHeight | Self::WidthOutOfRange | Self::NearEdge | Self::ShiftTooLarge | Self::Failed
        )
    }
}

/// Fit parameters reported alongside the tracking status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitDiagnostics {
    pub pos: DVec2,
    pub height: f64,
    pub fwhm: f64,
    pub beta: Option<f64>,
    pub sky: f64,
    pub chi2: f64,
    pub npix: usize,
    pub nrej: usize,
    /// Fitted position minus search start.
    pub shift: DVec2,
}

impl FitDiagnostics {
    fn new(fit: &ProfileFit, start: DVec2) -> Self {
        Self {
            pos: fit.pos,
            height: fit.height,
            fwhm: fit.fwhm(),
            beta: fit.beta(),
            sky: fit.sky,
            chi2: fit.chi2,
            npix: fit.npix,
            nrej: fit.nrej,
            shift: fit.pos - start,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackOutcome {
    pub id: ApertureId,
    pub status: FitStatus,
    pub fit: Option<FitDiagnostics>,
    /// Shape of the accepted fit, used for optimal weighting.
    pub shape: Option<ProfileShape>,
    /// Human-readable message when the fit was rejected.
    pub alert: Option<String>,
}

impl TrackOutcome {
    fn untracked(id: ApertureId, status: FitStatus) -> Self {
        Self {
            id,
            status,
            fit: None,
            shape: None,
            alert: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == FitStatus::Accepted
    }
}

struct Rejection {
    status: FitStatus,
    reason: String,
    fit: Option<ProfileFit>,
}

impl Rejection {
    fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: FitStatus::Failed,
            reason: reason.into(),
            fit: None,
        }
    }

    fn of(status: FitStatus, fit: ProfileFit, reason: String) -> Self {
        Self {
            status,
            reason,
            fit: Some(fit),
        }
    }
}

/// Tracks the apertures of one detector against one frame.
pub struct Tracker<'a> {
    detector: &'a Detector,
    config: &'a TrackingConfig,
    noise: &'a DetectorNoise,
    settings: FitSettings,
}

impl<'a> Tracker<'a> {
    pub fn new(detector: &'a Detector, config: &'a TrackingConfig, noise: &'a DetectorNoise) -> Self {
        Self {
            detector,
            config,
            noise,
            settings: FitSettings::from_tracking(config),
        }
    }

    /// Moves `apertures` to this frame's positions and feeds accepted fits
    /// into `store`. Outcomes come back in aperture-set order.
    pub fn track(&self, apertures: &mut ApertureSet, store: &mut DetectorStore) -> Vec<TrackOutcome> {
        let previous: HashMap<ApertureId, DVec2> =
            apertures.iter().map(|(&id, ap)| (id, ap.pos)).collect();
        let mut outcomes: HashMap<ApertureId, TrackOutcome> = HashMap::with_capacity(apertures.len());
        let mut accepted = Vec::new();

        let mut shifts = Vec::new();
        for (&id, ap) in apertures.iter_mut() {
            if !ap.reference || ap.is_linked() {
                continue;
            }
            let start = ap.pos;
            let outcome = self.track_one(id, ap, start, store);
            if outcome.is_accepted() {
                shifts.push(ap.pos - start);
                accepted.push(accepted_fit(id, ap));
            }
            outcomes.insert(id, outcome);
        }

        let shift = if shifts.is_empty() {
            DVec2::ZERO
        } else {
            shifts.iter().sum::<DVec2>() / shifts.len() as f64
        };
        if !shifts.is_empty() {
            tracing::debug!(
                "Detector {}: {} references, mean shift ({:.2}, {:.2})",
                self.detector.name,
                shifts.len(),
                shift.x,
                shift.y
            );
        }

        for (&id, ap) in apertures.iter_mut() {
            if ap.reference || ap.is_linked() {
                continue;
            }
            let start = ap.pos + shift;
            let outcome = self.track_one(id, ap, start, store);
            if outcome.is_accepted() {
                accepted.push(accepted_fit(id, ap));
            }
            outcomes.insert(id, outcome);
        }

        let moved: HashMap<ApertureId, DVec2> = apertures
            .iter()
            .map(|(&id, ap)| (id, ap.pos - previous[&id]))
            .collect();
        for (&id, ap) in apertures.iter_mut() {
            let Some(link) = ap.link else {
                continue;
            };
            ap.pos += moved.get(&link).copied().unwrap_or(DVec2::ZERO);
            ap.window = self.window_name(ap.pos);
            let status = if ap.window.is_some() {
                FitStatus::Linked
            } else {
                FitStatus::OutsideWindows
            };
            outcomes.insert(id, TrackOutcome::untracked(id, status));
        }

        store.record(&accepted, self.config.store_weight);

        apertures
            .keys()
            .filter_map(|id| outcomes.remove(id))
            .collect()
    }

    fn window_name(&self, pos: DVec2) -> Option<String> {
        self.detector
            .enclosing(pos.x, pos.y)
            .map(|(name, _)| name.clone())
    }

    fn track_one(
        &self,
        id: ApertureId,
        ap: &mut Aperture,
        start: DVec2,
        store: &DetectorStore,
    ) -> TrackOutcome {
        let Some((window_name, window)) = self.detector.enclosing(start.x, start.y) else {
            tracing::debug!(
                "Detector {}, aperture {id}: ({:.1}, {:.1}) outside every window, not tracked",
                self.detector.name,
                start.x,
                start.y
            );
            ap.window = self.window_name(ap.pos);
            let mut outcome = TrackOutcome::untracked(id, FitStatus::OutsideWindows);
            if ap.window.is_some() {
                // The shifted search start left the windows but the aperture did not.
                outcome.alert = Some(format!(
                    "detector {}, aperture {id}: search position ({:.1}, {:.1}) outside every window; position and shape retained",
                    self.detector.name, start.x, start.y
                ));
            }
            return outcome;
        };

        match self.measure(window, start, ap, store) {
            Ok(fit) => {
                ap.pos = fit.pos;
                ap.fwhm = fit.fwhm();
                ap.beta = fit.beta();
                ap.window = Some(window_name.clone());
                tracing::trace!(
                    "Detector {}, aperture {id}: ({:.2}, {:.2}) fwhm {:.2} height {:.1}",
                    self.detector.name,
                    fit.pos.x,
                    fit.pos.y,
                    fit.fwhm(),
                    fit.height
                );
                TrackOutcome {
                    id,
                    status: FitStatus::Accepted,
                    fit: Some(FitDiagnostics::new(&fit, start)),
                    shape: Some(fit.shape),
                    alert: None,
                }
            }
            Err(rejection) => {
                ap.window = self.window_name(ap.pos);
                let alert = format!(
                    "detector {}, aperture {id}: {}; position and shape retained",
                    self.detector.name, rejection.reason
                );
                tracing::debug!("{alert}");
                TrackOutcome {
                    id,
                    status: rejection.status,
                    fit: rejection.fit.map(|fit| FitDiagnostics::new(&fit, start)),
                    shape: None,
                    alert: Some(alert),
                }
            }
        }
    }

    fn measure(
        &self,
        window: &Window,
        start: DVec2,
        ap: &Aperture,
        store: &DetectorStore,
    ) -> Result<ProfileFit, Rejection> {
        let config = self.config;
        let hw = config.search_half_width;
        let search = window
            .crop(start.x - hw, start.x + hw, start.y - hw, start.y + hw)
            .ok_or_else(|| Rejection::failed("search box holds no pixels"))?;
        let (peak, peak_value) = brightest_pixel(&search, config.smooth_fwhm)
            .ok_or_else(|| Rejection::failed("search box holds no finite pixels"))?;

        let fw = config.fit_half_width;
        let fit_box = window
            .crop(peak.x - fw, peak.x + fw, peak.y - fw, peak.y + fw)
            .ok_or_else(|| Rejection::failed("fit box holds no pixels"))?;
        let sky = fit_box.median().unwrap_or(0.0);

        let guess = ProfileGuess {
            pos: peak,
            height: peak_value - sky,
            fwhm: seed_fwhm(store, ap, config),
            beta: store.seed_beta(default_beta(config.profile)),
            sky,
        };
        let samples = Samples::from_window(&fit_box, self.noise);
        let fit = fit_profile(&samples, &guess, &self.settings)
            .ok_or_else(|| Rejection::failed("too few usable pixels to fit"))?;

        if !fit.is_finite() {
            return Err(Rejection::failed("fit produced non-finite parameters"));
        }
        if fit.height < config.min_height {
            let reason = format!(
                "target lost, fit height {:.1} below threshold {:.1}",
                fit.height, config.min_height
            );
            return Err(Rejection::of(FitStatus::LowHeight, fit, reason));
        }
        let fwhm = fit.fwhm();
        if fwhm < config.fwhm_min || fwhm > config.fwhm_max {
            let reason = format!(
                "fitted FWHM {fwhm:.2} outside [{}, {}]",
                config.fwhm_min, config.fwhm_max
            );
            return Err(Rejection::of(FitStatus::WidthOutOfRange, fit, reason));
        }
        if window.distance(fit.pos.x, fit.pos.y) <= 1.0 {
            let reason = format!(
                "fitted position ({:.1}, {:.1}) within 1 pixel of the window edge",
                fit.pos.x, fit.pos.y
            );
            return Err(Rejection::of(FitStatus::NearEdge, fit, reason));
        }
        let shift = fit.pos.distance(start);
        if shift > config.max_shift {
            let reason = format!(
                "fitted position moved {shift:.1} pixels, limit {:.1}",
                config.max_shift
            );
            return Err(Rejection::of(FitStatus::ShiftTooLarge, fit, reason));
        }
        Ok(fit)
    }
}

fn accepted_fit(id: ApertureId, ap: &Aperture) -> AcceptedFit {
    AcceptedFit {
        id,
        pos: ap.pos,
        fwhm: ap.fwhm,
        beta: ap.beta,
    }
}

fn default_beta(kind: ProfileKind) -> f64 {
    match kind {
        ProfileKind::Moffat { beta, .. } => beta,
        ProfileKind::Gaussian => 0.0,
    }
}

/// Store mean first, then the aperture's own last value, then the setting.
fn seed_fwhm(store: &DetectorStore, ap: &Aperture, config: &TrackingConfig) -> f64 {
    let fallback = if ap.fwhm > 0.0 { ap.fwhm } else { config.fwhm };
    store.seed_fwhm(fallback)
}

#[cfg(test)]
mod tests;
