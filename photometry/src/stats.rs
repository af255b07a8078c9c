//! Robust statistics over pixel samples.

/// For a normal distribution, σ ≈ 1.4826 × MAD.
pub const MAD_TO_SIGMA: f64 = 1.482_602_2;

/// Median via quickselect. Reorders `data`; `None` when empty.
pub fn median_mut(data: &mut [f64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    let len = data.len();
    let mid = len / 2;
    let (left, median, _) = data.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *median;
    if len % 2 == 1 {
        return Some(upper);
    }
    let lower = left.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(0.5 * (lower + upper))
}

/// Median and MAD-derived sigma. Reorders `data`.
pub fn median_and_sigma_mut(data: &mut [f64]) -> Option<(f64, f64)> {
    let median = median_mut(data)?;
    for v in data.iter_mut() {
        *v = (*v - median).abs();
    }
    let mad = median_mut(data)?;
    Some((median, mad * MAD_TO_SIGMA))
}

pub fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() == 1 {
        return Some((mean, 0.0));
    }
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0);
    Some((mean, var.sqrt()))
}

/// Result of iterative sigma clipping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClippedStats {
    pub mean: f64,
    pub sigma: f64,
    pub kept: usize,
    pub rejected: usize,
}

/// Mean and standard deviation after repeatedly removing values more than
/// `kappa` standard deviations from the mean. Stops when nothing changes.
pub fn clipped_mean(values: &[f64], kappa: f64, max_iterations: usize) -> Option<ClippedStats> {
    let mut kept: Vec<f64> = values.to_vec();
    let (mut mean, mut sigma) = mean_and_std(&kept)?;

    for _ in 0..max_iterations {
        if sigma <= 0.0 {
            break;
        }
        let limit = kappa * sigma;
        let before = kept.len();
        kept.retain(|v| (v - mean).abs() <= limit);
        if kept.len() == before {
            break;
        }
        (mean, sigma) = mean_and_std(&kept)?;
    }

    Some(ClippedStats {
        mean,
        sigma,
        kept: kept.len(),
        rejected: values.len() - kept.len(),
    })
}
