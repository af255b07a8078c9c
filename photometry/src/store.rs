//! Profile parameters shared between frames.
//!
//! Each detector owns one [`DetectorStore`]. The dispatcher hands a copy to
//! the worker processing that detector and writes the updated copy back
//! once the whole frame is done, so workers never share mutable state.

use std::collections::HashMap;

use glam::DVec2;

use crate::aperture::ApertureId;

/// An accepted profile fit, as fed into the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptedFit {
    pub id: ApertureId,
    pub pos: DVec2,
    pub fwhm: f64,
    pub beta: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectorStore {
    /// Blended mean FWHM over accepted fits, `None` until the first one.
    pub fwhm: Option<f64>,
    pub beta: Option<f64>,
    /// Last accepted position of every aperture that has ever been fitted.
    ///
    /// Read-only view for callers of [`crate::pipeline::Reducer::store`].
    /// Tracking itself starts from the aperture's own position, which a
    /// rejected fit leaves at this value.
    pub positions: HashMap<ApertureId, DVec2>,
    /// Frames that contributed at least one accepted fit.
    pub frames: usize,
}

impl DetectorStore {
    /// Initial FWHM for the next fit.
    pub fn seed_fwhm(&self, fallback: f64) -> f64 {
        self.fwhm.unwrap_or(fallback)
    }

    pub fn seed_beta(&self, fallback: f64) -> f64 {
        self.beta.unwrap_or(fallback)
    }

    /// `None` for apertures that were never fitted or only ever linked.
    pub fn last_good(&self, id: ApertureId) -> Option<DVec2> {
        self.positions.get(&id).copied()
    }

    /// Blends the frame's mean shape into the stored one.
    ///
    /// `weight` is the share of the new frame, so 1.0 replaces the stored
    /// values outright. Frames without accepted fits leave the store untouched.
    pub fn record(&mut self, fits: &[AcceptedFit], weight: f64) {
        if fits.is_empty() {
            return;
        }
        let mean_fwhm = fits.iter().map(|fit| fit.fwhm).sum::<f64>() / fits.len() as f64;
        self.fwhm = Some(blend(self.fwhm, mean_fwhm, weight));

        let betas: Vec<f64> = fits.iter().filter_map(|fit| fit.beta).collect();
        if !betas.is_empty() {
            let mean_beta = betas.iter().sum::<f64>() / betas.len() as f64;
            self.beta = Some(blend(self.beta, mean_beta, weight));
        }

        for fit in fits {
            self.positions.insert(fit.id, fit.pos);
        }
        self.frames += 1;
    }
}

fn blend(old: Option<f64>, new: f64, weight: f64) -> f64 {
    match old {
        Some(old) => old + weight * (new - old),
        None => new,
    }
}

/// Per-detector stores keyed by detector name.
#[derive(Debug, Clone, Default)]
pub struct Store {
    detectors: HashMap<String, DetectorStore>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, detector: &str) -> Option<&DetectorStore> {
        self.detectors.get(detector)
    }

    /// Copy of the detector's store, empty if nothing was recorded yet.
    pub fn snapshot(&self, detector: &str) -> DetectorStore {
        self.detectors.get(detector).cloned().unwrap_or_default()
    }

    pub fn replace(&mut self, detector: &str, store: DetectorStore) {
        self.detectors.insert(detector.to_string(), store);
    }
}
