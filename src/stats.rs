//! Small numeric helpers shared by the scoring, elasticity and validation code.
//!
//! Every function here returns a documented fallback (usually 0.0) for empty
//! or zero-variance input instead of NaN.

use std::cmp::Ordering;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

pub fn median(values: &[f64]) -> f64 {
    let sorted = sorted(values);
    percentile_sorted(&sorted, 0.5)
}

pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    sorted
}

/// Linearly interpolated percentile of an ascending slice, `q` in [0, 1].
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        len => {
            let rank = q.clamp(0.0, 1.0) * (len - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let fraction = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r2: f64,
    pub ss_res: f64,
    pub ss_tot: f64,
    /// Sum of squared deviations of x from its mean.
    pub sxx: f64,
}

/// Ordinary least squares of `ys` on `xs`. Returns `None` when there are fewer
/// than two points or `xs` has no variance.
pub fn linear_fit(xs: &[f64], ys: &[f64]) -> Option<LinearFit> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let xs = &xs[..n];
    let ys = &ys[..n];
    let x_mean = mean(xs);
    let y_mean = mean(ys);

    let sxx: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();
    if sxx <= f64::EPSILON {
        return None;
    }
    let sxy: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (x - x_mean) * (y - y_mean))
        .sum();

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    let ss_res: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (y - (slope * x + intercept)).powi(2))
        .sum();
    let ss_tot: f64 = ys.iter().map(|y| (y - y_mean).powi(2)).sum();

    Some(LinearFit {
        slope,
        intercept,
        r2: r_squared(ss_res, ss_tot),
        ss_res,
        ss_tot,
        sxx,
    })
}

/// 1 - SSres/SStot, defined as 0 when the observed data has no variance.
pub fn r_squared(ss_res: f64, ss_tot: f64) -> f64 {
    if ss_tot <= f64::EPSILON {
        0.0
    } else {
        1.0 - ss_res / ss_tot
    }
}

/// Trend of `values` against positions 1..=n.
pub fn index_trend(values: &[f64]) -> Option<LinearFit> {
    let xs: Vec<f64> = (1..=values.len()).map(|i| i as f64).collect();
    linear_fit(&xs, values)
}

pub fn correlation(xs: &[f64], ys: &[f64]) -> f64 {
    if xs.len() != ys.len() || xs.is_empty() {
        return 0.0;
    }
    let x_mean = mean(xs);
    let y_mean = mean(ys);
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        sxy += (x - x_mean) * (y - y_mean);
        sxx += (x - x_mean).powi(2);
        syy += (y - y_mean).powi(2);
    }
    let denominator = (sxx * syy).sqrt();
    if denominator <= f64::EPSILON {
        0.0
    } else {
        sxy / denominator
    }
}

/// Standard deviation of period-over-period relative changes. Steps from a
/// zero value are skipped.
pub fn relative_volatility(values: &[f64]) -> f64 {
    let returns: Vec<f64> = values
        .windows(2)
        .filter(|pair| pair[0].abs() > f64::EPSILON)
        .map(|pair| (pair[1] - pair[0]) / pair[0])
        .collect();
    std_dev(&returns)
}

/// Callers reject NaN before clamping; it is never mapped to a score.
pub fn clamp_score(value: f64) -> f64 {
    debug_assert!(!value.is_nan(), "NaN reached clamp_score");
    value.clamp(0.0, 100.0)
}
