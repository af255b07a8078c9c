//! Weighted Levenberg-Marquardt optimizer for profile fitting.

use super::linear_solver::solve;

#[derive(Debug, Clone)]
pub struct LMConfig {
    pub max_iterations: usize,
    /// Stop once the largest parameter change falls below this.
    pub convergence_threshold: f64,
    pub initial_lambda: f64,
    pub lambda_up: f64,
    pub lambda_down: f64,
}

impl Default for LMConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            convergence_threshold: 1e-8,
            initial_lambda: 0.001,
            lambda_up: 10.0,
            lambda_down: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LMResult<const N: usize> {
    pub params: [f64; N],
    /// Weighted sum of squared residuals at `params`.
    pub chi2: f64,
    pub converged: bool,
    pub iterations: usize,
}

/// A model with `N` free parameters.
pub trait LMModel<const N: usize> {
    fn evaluate(&self, x: f64, y: f64, params: &[f64; N]) -> f64;

    /// Partial derivatives of [`LMModel::evaluate`] with respect to each parameter.
    fn jacobian_row(&self, x: f64, y: f64, params: &[f64; N]) -> [f64; N];

    /// Applies parameter constraints after an update.
    fn constrain(&self, params: &mut [f64; N]);
}

/// Pixel samples with inverse-variance weights. Zero weight excludes a pixel.
#[derive(Debug, Clone, Copy)]
pub struct FitData<'a> {
    pub x: &'a [f64],
    pub y: &'a [f64],
    pub z: &'a [f64],
    pub weight: &'a [f64],
}

impl FitData<'_> {
    fn iter(&self) -> impl Iterator<Item = (f64, f64, f64, f64)> + '_ {
        self.x
            .iter()
            .zip(self.y)
            .zip(self.z)
            .zip(self.weight)
            .map(|(((&x, &y), &z), &w)| (x, y, z, w))
    }
}

pub fn optimize<const N: usize, M: LMModel<N>>(
    model: &M,
    data: &FitData<'_>,
    initial_params: [f64; N],
    config: &LMConfig,
) -> LMResult<N> {
    let mut params = initial_params;
    model.constrain(&mut params);
    let mut lambda = config.initial_lambda;
    let mut prev_chi2 = compute_chi2(model, data, &params);
    let mut converged = false;
    let mut iterations = 0;

    let n = data.x.len();
    let mut jacobian = Vec::with_capacity(n);
    let mut residuals = Vec::with_capacity(n);

    for iter in 0..config.max_iterations {
        iterations = iter + 1;

        fill_jacobian_residuals(model, data, &params, &mut jacobian, &mut residuals);
        let (hessian, gradient) = compute_hessian_gradient(&jacobian, &residuals, data.weight);

        let mut damped_hessian = hessian;
        for (i, row) in damped_hessian.iter_mut().enumerate() {
            row[i] *= 1.0 + lambda;
        }

        let Some(delta) = solve(&damped_hessian, &gradient) else {
            break;
        };

        let mut new_params = params;
        for (p, d) in new_params.iter_mut().zip(delta.iter()) {
            *p += d;
        }
        model.constrain(&mut new_params);

        let new_chi2 = compute_chi2(model, data, &new_params);

        if new_chi2 < prev_chi2 {
            params = new_params;
            lambda *= config.lambda_down;
            prev_chi2 = new_chi2;

            let max_delta = delta.iter().copied().fold(0.0f64, |a, d| a.max(d.abs()));
            if max_delta < config.convergence_threshold {
                converged = true;
                break;
            }
        } else {
            lambda *= config.lambda_up;
            if lambda > 1e10 {
                // No downhill step left: already at the minimum.
                converged = prev_chi2.is_finite();
                break;
            }
        }
    }

    LMResult {
        params,
        chi2: prev_chi2,
        converged,
        iterations,
    }
}

pub fn compute_chi2<const N: usize, M: LMModel<N>>(
    model: &M,
    data: &FitData<'_>,
    params: &[f64; N],
) -> f64 {
    data.iter()
        .filter(|&(_, _, _, w)| w > 0.0)
        .map(|(x, y, z, w)| {
            let residual = z - model.evaluate(x, y, params);
            w * residual * residual
        })
        .sum()
}

fn fill_jacobian_residuals<const N: usize, M: LMModel<N>>(
    model: &M,
    data: &FitData<'_>,
    params: &[f64; N],
    jacobian: &mut Vec<[f64; N]>,
    residuals: &mut Vec<f64>,
) {
    jacobian.clear();
    residuals.clear();

    for (x, y, z, _) in data.iter() {
        jacobian.push(model.jacobian_row(x, y, params));
        residuals.push(z - model.evaluate(x, y, params));
    }
}

/// Weighted normal equations: `Jᵀ W J` and `Jᵀ W r`.
///
/// Only the upper triangle is accumulated, then mirrored.
#[allow(clippy::needless_range_loop)]
pub fn compute_hessian_gradient<const N: usize>(
    jacobian: &[[f64; N]],
    residuals: &[f64],
    weights: &[f64],
) -> ([[f64; N]; N], [f64; N]) {
    let mut hessian = [[0.0f64; N]; N];
    let mut gradient = [0.0f64; N];

    for ((row, &r), &w) in jacobian.iter().zip(residuals).zip(weights) {
        if w <= 0.0 {
            continue;
        }
        for i in 0..N {
            let wi = w * row[i];
            gradient[i] += wi * r;
            for j in i..N {
                hessian[i][j] += wi * row[j];
            }
        }
    }

    for i in 1..N {
        for j in 0..i {
            hessian[i][j] = hessian[j][i];
        }
    }

    (hessian, gradient)
}
