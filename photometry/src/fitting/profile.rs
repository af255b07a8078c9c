//! Radial star profiles parameterised by FWHM.
//!
//! Gaussian: `h · exp(-a r²)` with `a = 4 ln 2 / fwhm²`.
//! Moffat: `h · (1 + a r²)^-β` with `a = 4 (2^(1/β) - 1) / fwhm²`.

use std::f64::consts::{LN_2, PI};

use super::lm_optimizer::LMModel;

/// Shape of a fitted profile, independent of position and height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProfileShape {
    Gaussian { fwhm: f64 },
    Moffat { fwhm: f64, beta: f64 },
}

impl ProfileShape {
    pub fn fwhm(&self) -> f64 {
        match *self {
            Self::Gaussian { fwhm } | Self::Moffat { fwhm, .. } => fwhm,
        }
    }

    pub fn beta(&self) -> Option<f64> {
        match *self {
            Self::Gaussian { .. } => None,
            Self::Moffat { beta, .. } => Some(beta),
        }
    }

    fn alpha(&self) -> f64 {
        match *self {
            Self::Gaussian { fwhm } => gaussian_alpha(fwhm),
            Self::Moffat { fwhm, beta } => moffat_alpha(fwhm, beta),
        }
    }

    /// Profile value at squared radius `r2`, normalised to 1 at the centre.
    pub fn evaluate(&self, r2: f64) -> f64 {
        let a = self.alpha();
        match *self {
            Self::Gaussian { .. } => (-a * r2).exp(),
            Self::Moffat { beta, .. } => (1.0 + a * r2).powf(-beta),
        }
    }

    /// Profile value at `r2` normalised to unit volume.
    ///
    /// `None` for a Moffat profile with `β <= 1`, whose volume diverges.
    pub fn normalised(&self, r2: f64) -> Option<f64> {
        let a = self.alpha();
        let norm = match *self {
            Self::Gaussian { .. } => a / PI,
            Self::Moffat { beta, .. } if beta > 1.0 => a * (beta - 1.0) / PI,
            Self::Moffat { .. } => return None,
        };
        Some(norm * self.evaluate(r2))
    }

    /// Total volume under a profile of unit height.
    pub fn volume(&self) -> Option<f64> {
        self.normalised(0.0).map(|peak| 1.0 / peak)
    }
}

#[inline]
fn gaussian_alpha(fwhm: f64) -> f64 {
    4.0 * LN_2 / (fwhm * fwhm)
}

#[inline]
fn moffat_alpha(fwhm: f64, beta: f64) -> f64 {
    4.0 * ((LN_2 / beta).exp() - 1.0) / (fwhm * fwhm)
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Bounds {
    pub fwhm: (f64, f64),
    pub beta: (f64, f64),
    pub min_height: f64,
}

impl Bounds {
    fn apply_common(&self, height: &mut f64, fwhm: &mut f64) {
        *height = height.max(self.min_height);
        *fwhm = fwhm.clamp(self.fwhm.0, self.fwhm.1);
    }
}

/// Parameters: `[x0, y0, height, fwhm, sky]`.
pub(crate) struct GaussianModel {
    pub bounds: Bounds,
}

impl LMModel<5> for GaussianModel {
    #[inline]
    fn evaluate(&self, x: f64, y: f64, params: &[f64; 5]) -> f64 {
        let [x0, y0, h, fwhm, sky] = *params;
        let dx = x - x0;
        let dy = y - y0;
        sky + h * (-gaussian_alpha(fwhm) * (dx * dx + dy * dy)).exp()
    }

    #[inline]
    fn jacobian_row(&self, x: f64, y: f64, params: &[f64; 5]) -> [f64; 5] {
        let [x0, y0, h, fwhm, _sky] = *params;
        let a = gaussian_alpha(fwhm);
        let dx = x - x0;
        let dy = y - y0;
        let r2 = dx * dx + dy * dy;
        let e = (-a * r2).exp();
        let hae2 = 2.0 * h * a * e;

        [
            hae2 * dx,
            hae2 * dy,
            e,
            hae2 * r2 / fwhm,
            1.0,
        ]
    }

    fn constrain(&self, params: &mut [f64; 5]) {
        let [_, _, h, fwhm, _] = params;
        self.bounds.apply_common(h, fwhm);
    }
}

/// Moffat profile with fixed exponent. Parameters: `[x0, y0, height, fwhm, sky]`.
pub(crate) struct MoffatFixedModel {
    pub beta: f64,
    pub bounds: Bounds,
}

impl LMModel<5> for MoffatFixedModel {
    #[inline]
    fn evaluate(&self, x: f64, y: f64, params: &[f64; 5]) -> f64 {
        let [x0, y0, h, fwhm, sky] = *params;
        let dx = x - x0;
        let dy = y - y0;
        let u = 1.0 + moffat_alpha(fwhm, self.beta) * (dx * dx + dy * dy);
        sky + h * u.powf(-self.beta)
    }

    #[inline]
    fn jacobian_row(&self, x: f64, y: f64, params: &[f64; 5]) -> [f64; 5] {
        let [x0, y0, h, fwhm, _sky] = *params;
        let beta = self.beta;
        let a = moffat_alpha(fwhm, beta);
        let dx = x - x0;
        let dy = y - y0;
        let r2 = dx * dx + dy * dy;
        let u = 1.0 + a * r2;
        let g = u.powf(-beta);
        let k = 2.0 * h * beta * a * g / u;

        [k * dx, k * dy, g, k * r2 / fwhm, 1.0]
    }

    fn constrain(&self, params: &mut [f64; 5]) {
        let [_, _, h, fwhm, _] = params;
        self.bounds.apply_common(h, fwhm);
    }
}

/// Moffat profile with free exponent. Parameters: `[x0, y0, height, fwhm, beta, sky]`.
pub(crate) struct MoffatModel {
    pub bounds: Bounds,
}

impl LMModel<6> for MoffatModel {
    #[inline]
    fn evaluate(&self, x: f64, y: f64, params: &[f64; 6]) -> f64 {
        let [x0, y0, h, fwhm, beta, sky] = *params;
        let dx = x - x0;
        let dy = y - y0;
        let u = 1.0 + moffat_alpha(fwhm, beta) * (dx * dx + dy * dy);
        sky + h * u.powf(-beta)
    }

    #[inline]
    fn jacobian_row(&self, x: f64, y: f64, params: &[f64; 6]) -> [f64; 6] {
        let [x0, y0, h, fwhm, beta, _sky] = *params;
        let a = moffat_alpha(fwhm, beta);
        let dx = x - x0;
        let dy = y - y0;
        let r2 = dx * dx + dy * dy;
        let u = 1.0 + a * r2;
        let g = u.powf(-beta);
        let k = 2.0 * h * beta * a * g / u;

        // a depends on beta through 2^(1/beta)
        let da_dbeta = -4.0 * (LN_2 / beta).exp() * LN_2 / (beta * beta * fwhm * fwhm);
        let dg_dbeta = g * (-u.ln() - beta * r2 * da_dbeta / u);

        [k * dx, k * dy, g, k * r2 / fwhm, h * dg_dbeta, 1.0]
    }

    fn constrain(&self, params: &mut [f64; 6]) {
        let [_, _, h, fwhm, beta, _] = params;
        self.bounds.apply_common(h, fwhm);
        *beta = beta.clamp(self.bounds.beta.0, self.bounds.beta.1);
    }
}
