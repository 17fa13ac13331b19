//! Short-horizon projection of the index.
//!
//! Two models are blended. The trend model extends the linear trend of the
//! Kalman-filtered values. The lag model regresses each raw value on its
//! recent lags and moving averages and is rolled forward recursively. Interval
//! half-width grows with the square root of the horizon and scales with the
//! week-over-week volatility of the raw series.

use chrono::Duration;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::models::{ForecastComponents, ForecastPoint, SmoothedPoint};
use crate::stats::{clamp_score, index_trend, mean};

pub const MAX_HORIZON_WEEKS: u32 = 12;

const TREND_WEIGHT: f64 = 0.6;
const LAG_WEIGHT: f64 = 0.4;
/// Shortest raw history the lag model is fitted on.
const MIN_LAG_POINTS: usize = 5;
/// Ridge penalty relative to the mean feature variance. Lag features are
/// collinear (trend is lag1 - lag2), so plain least squares is singular.
const RIDGE: f64 = 1e-6;

pub fn z_for_level(confidence_level: f64) -> Result<f64> {
    match (confidence_level * 100.0).round() as u32 {
        90 => Ok(1.645),
        95 => Ok(1.96),
        99 => Ok(2.576),
        _ => Err(EngineError::invalid(
            "confidence_level",
            format!("supported levels are 0.90, 0.95 and 0.99, got {confidence_level}"),
        )),
    }
}

/// `raw` is the unfiltered index the smoothed series was built from, one
/// value per smoothed point.
pub fn project(
    smoothed: &[SmoothedPoint],
    raw: &[f64],
    horizon_weeks: u32,
    confidence_level: f64,
) -> Result<Vec<ForecastPoint>> {
    if !(1..=MAX_HORIZON_WEEKS).contains(&horizon_weeks) {
        return Err(EngineError::invalid(
            "horizon_weeks",
            format!("must be between 1 and {MAX_HORIZON_WEEKS}"),
        ));
    }
    let z = z_for_level(confidence_level)?;
    let Some(last) = smoothed.last() else {
        return Err(EngineError::invalid("smoothed", "at least one point is required"));
    };
    if raw.len() != smoothed.len() {
        return Err(EngineError::DimensionMismatch {
            observed: raw.len(),
            predicted: smoothed.len(),
        });
    }
    if let Some(position) = raw.iter().position(|v| !v.is_finite()) {
        return Err(EngineError::invalid(
            format!("raw[{position}]"),
            "values must be finite",
        ));
    }

    let values: Vec<f64> = smoothed.iter().map(|point| point.value).collect();
    let slope = index_trend(&values).map(|fit| fit.slope).unwrap_or(0.0);
    let volatility = rms_relative_change(raw);
    let lag_path = lag_regression_path(raw, horizon_weeks as usize);
    let (trend_weight, lag_weight) = match lag_path {
        Some(_) => (TREND_WEIGHT, LAG_WEIGHT),
        None => (1.0, 0.0),
    };
    debug!(slope, volatility, horizon_weeks, lag_model = lag_path.is_some(), "projecting index");

    Ok((1..=horizon_weeks)
        .map(|step| {
            let h = step as f64;
            let trend = clamp_score(last.value + slope * h);
            let trend_confidence = (1.0 - 0.1 * h).max(0.5);
            let lag = lag_path.as_ref().map(|path| path[step as usize - 1]);

            let (value, confidence) = match lag {
                Some(lag) => (
                    trend * trend_weight + lag * lag_weight,
                    trend_confidence * trend_weight + (1.0 - 0.15 * h).max(0.4) * lag_weight,
                ),
                None => (trend, trend_confidence),
            };
            let margin = z * volatility * h.sqrt() * value;
            ForecastPoint {
                step,
                target_at: last.observed_at + Duration::weeks(step as i64),
                value,
                confidence,
                lower: clamp_score(value - margin),
                upper: clamp_score(value + margin),
                components: ForecastComponents {
                    trend,
                    lag_regression: lag,
                    trend_weight,
                    lag_weight,
                },
            }
        })
        .collect())
}

/// Features for predicting the value at `position` from the points before it:
/// lag1, lag2, 3- and 5-point moving averages, last change. Windows shorten
/// near the start of the series.
fn lag_features(series: &[f64], position: usize) -> [f64; 5] {
    let lag1 = series[position - 1];
    let lag2 = series[position - 2];
    let ma3 = mean(&series[position.saturating_sub(3)..position]);
    let ma5 = mean(&series[position.saturating_sub(5)..position]);
    [lag1, lag2, ma3, ma5, lag1 - lag2]
}

/// Fits the lag model on `raw` and rolls it `horizon` steps forward, feeding
/// each prediction back in as the newest lag. None when history is too short.
fn lag_regression_path(raw: &[f64], horizon: usize) -> Option<Vec<f64>> {
    if raw.len() < MIN_LAG_POINTS {
        return None;
    }
    let rows: Vec<[f64; 5]> = (2..raw.len()).map(|i| lag_features(raw, i)).collect();
    let targets = &raw[2..];
    let model = fit_ridge(&rows, targets)?;

    let mut extended = raw.to_vec();
    for _ in 0..horizon {
        let features = lag_features(&extended, extended.len());
        extended.push(clamp_score(model.predict(&features)));
    }
    Some(extended.split_off(raw.len()))
}

#[derive(Debug, Clone, Copy)]
struct LagModel {
    intercept: f64,
    coefficients: [f64; 5],
}

impl LagModel {
    fn predict(&self, features: &[f64; 5]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(features)
                .map(|(c, x)| c * x)
                .sum::<f64>()
    }
}

/// Ridge regression on centered data; the intercept is not penalized.
fn fit_ridge(rows: &[[f64; 5]], targets: &[f64]) -> Option<LagModel> {
    let n = rows.len() as f64;
    let mut x_mean = [0.0; 5];
    for row in rows {
        for (m, x) in x_mean.iter_mut().zip(row) {
            *m += x / n;
        }
    }
    let y_mean = mean(targets);

    let mut gram = [[0.0; 5]; 5];
    let mut rhs = [0.0; 5];
    for (row, y) in rows.iter().zip(targets) {
        let centered: Vec<f64> = row.iter().zip(&x_mean).map(|(x, m)| x - m).collect();
        for j in 0..5 {
            rhs[j] += centered[j] * (y - y_mean);
            for k in 0..5 {
                gram[j][k] += centered[j] * centered[k];
            }
        }
    }
    let scale = (0..5).map(|j| gram[j][j]).sum::<f64>() / 5.0;
    let penalty = RIDGE * scale + f64::EPSILON;
    for (j, row) in gram.iter_mut().enumerate() {
        row[j] += penalty;
    }

    let coefficients = solve(gram, rhs)?;
    let intercept = y_mean
        - coefficients
            .iter()
            .zip(&x_mean)
            .map(|(c, m)| c * m)
            .sum::<f64>();
    Some(LagModel {
        intercept,
        coefficients,
    })
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: [[f64; 5]; 5], mut b: [f64; 5]) -> Option<[f64; 5]> {
    for col in 0..5 {
        let pivot = (col..5).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..5 {
            let factor = a[row][col] / a[col][col];
            for k in col..5 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = [0.0; 5];
    for row in (0..5).rev() {
        let tail: f64 = (row + 1..5).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

fn rms_relative_change(values: &[f64]) -> f64 {
    let changes: Vec<f64> = values
        .windows(2)
        .filter(|pair| pair[0].abs() > f64::EPSILON)
        .map(|pair| (pair[1] - pair[0]) / pair[0])
        .collect();
    if changes.is_empty() {
        return 0.0;
    }
    (changes.iter().map(|c| c * c).sum::<f64>() / changes.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn series(values: &[f64]) -> Vec<SmoothedPoint> {
        let start = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(week, value)| SmoothedPoint {
                observed_at: start + Duration::weeks(week as i64),
                value: *value,
                variance: 0.7,
            })
            .collect()
    }

    #[test]
    fn short_history_uses_trend_alone() {
        let values = [50.0, 52.0, 54.0, 56.0];
        let forecast = project(&series(&values), &values, 4, 0.95).unwrap();
        assert_eq!(forecast.len(), 4);
        assert!((forecast[0].value - 58.0).abs() < 1e-9);
        assert!((forecast[3].value - 64.0).abs() < 1e-9);
        assert!((forecast[0].confidence - 0.9).abs() < 1e-12);
        assert!((forecast[3].confidence - 0.6).abs() < 1e-12);
        assert_eq!(forecast[0].components.lag_regression, None);
        assert_eq!(forecast[0].components.trend_weight, 1.0);
        assert_eq!(
            forecast[1].target_at,
            Utc.with_ymd_and_hms(2026, 7, 6, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn ensemble_blends_trend_and_lag_models() {
        let values: Vec<f64> = (0..12).map(|i| 50.0 + 2.0 * i as f64).collect();
        let forecast = project(&series(&values), &values, 3, 0.95).unwrap();
        for point in &forecast {
            let c = point.components;
            assert_eq!((c.trend_weight, c.lag_weight), (0.6, 0.4));
            let lag = c.lag_regression.unwrap();
            assert!((point.value - (0.6 * c.trend + 0.4 * lag)).abs() < 1e-9);
            // the lag model continues an exact line
            let expected = 72.0 + 2.0 * point.step as f64;
            assert!((lag - expected).abs() < 0.05, "step {} lag {lag}", point.step);
        }
        let h1 = 0.6 * 0.9 + 0.4 * 0.85;
        assert!((forecast[0].confidence - h1).abs() < 1e-12);
        let h3 = 0.6 * 0.7 + 0.4 * 0.55;
        assert!((forecast[2].confidence - h3).abs() < 1e-12);
    }

    #[test]
    fn lag_model_confidence_floors_at_point_four() {
        let values: Vec<f64> = (0..8).map(|i| 60.0 + (i % 2) as f64).collect();
        let forecast = project(&series(&values), &values, 12, 0.95).unwrap();
        let last = forecast.last().unwrap();
        assert!((last.confidence - (0.6 * 0.5 + 0.4 * 0.4)).abs() < 1e-12);
    }

    #[test]
    fn intervals_widen_with_horizon() {
        let values = [50.0, 55.0, 51.0, 56.0];
        let forecast = project(&series(&values), &values, 6, 0.95).unwrap();
        let widths: Vec<f64> = forecast.iter().map(|p| p.upper - p.lower).collect();
        for point in &forecast {
            assert!(point.lower <= point.value && point.value <= point.upper);
            assert!(point.confidence >= 0.5);
        }
        assert!(widths[1] > widths[0]);
    }

    #[test]
    fn flat_history_has_zero_width() {
        let values = [70.0; 6];
        let forecast = project(&series(&values), &values, 2, 0.9).unwrap();
        assert!((forecast[1].value - 70.0).abs() < 1e-9);
        assert_eq!(forecast[1].components.lag_regression, Some(70.0));
        assert_eq!(forecast[1].lower, forecast[1].upper);
    }

    #[test]
    fn volatility_comes_from_raw_values() {
        let smooth = [60.0, 60.0, 60.0];
        let noisy = [55.0, 66.0, 60.0];
        let calm = project(&series(&smooth), &smooth, 1, 0.95).unwrap();
        let wide = project(&series(&smooth), &noisy, 1, 0.95).unwrap();
        assert_eq!(calm[0].value, wide[0].value);
        assert_eq!(calm[0].lower, calm[0].upper);
        assert!(wide[0].upper - wide[0].lower > 1.0);
    }

    #[test]
    fn rejects_bad_inputs() {
        let values = [50.0, 51.0];
        let points = series(&values);
        assert!(project(&points, &values, 0, 0.95).is_err());
        assert!(project(&points, &values, 13, 0.95).is_err());
        assert!(project(&points, &values, 4, 0.5).is_err());
        assert!(project(&[], &[], 4, 0.95).is_err());
        assert!(matches!(
            project(&points, &[50.0], 4, 0.95),
            Err(EngineError::DimensionMismatch { .. })
        ));
        assert!(project(&points, &[50.0, f64::NAN], 4, 0.95).is_err());
    }
}
