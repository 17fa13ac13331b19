//! One-dimensional Kalman smoothing of weekly index observations.
//!
//! The index is modelled as a random walk observed with noise:
//! - state: x_t = x_{t-1} + w_t, w ~ N(0, q)
//! - observation: z_t = x_t + v_t, v ~ N(0, r)
//!
//! The filter only runs forward, so each smoothed value depends on the
//! observations at or before its timestamp.

use tracing::debug;

use crate::config::SmootherConfig;
use crate::error::{EngineError, Result};
use crate::models::{Observation, SmoothedPoint, SmoothedSeries};
use crate::stats::clamp_score;

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    /// Posterior estimate
    x: f64,
    /// Posterior error covariance
    p: f64,
    q: f64,
    r: f64,
}

impl KalmanFilter {
    pub fn new(initial: f64, initial_covariance: f64, q: f64, r: f64) -> Self {
        Self {
            x: initial,
            p: initial_covariance,
            q,
            r,
        }
    }

    /// Predict then update with one measurement. Returns the new estimate.
    pub fn step(&mut self, z: f64) -> f64 {
        let x_pred = self.x;
        let p_pred = self.p + self.q;

        let k = p_pred / (p_pred + self.r);
        self.x = x_pred + k * (z - x_pred);
        self.p = (1.0 - k) * p_pred;
        self.x
    }

    pub fn covariance(&self) -> f64 {
        self.p
    }
}

#[derive(Debug, Clone)]
pub struct Smoother {
    config: SmootherConfig,
}

impl Smoother {
    pub fn new(config: SmootherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SmootherConfig {
        &self.config
    }

    pub fn smooth(&self, series: &[Observation]) -> Result<SmoothedSeries> {
        if series.is_empty() {
            return Err(EngineError::invalid("series", "at least one observation is required"));
        }
        if let Some(pair) = series
            .windows(2)
            .find(|pair| pair[1].observed_at < pair[0].observed_at)
        {
            return Err(EngineError::invalid(
                "series",
                format!(
                    "observations must be in ascending time order ({} precedes {})",
                    pair[0].observed_at, pair[1].observed_at
                ),
            ));
        }

        let values: Vec<f64> = series.iter().map(|obs| obs.index).collect();
        let filtered = self.smooth_values(&values)?;

        Ok(series
            .iter()
            .zip(filtered)
            .map(|(obs, (value, variance))| SmoothedPoint {
                observed_at: obs.observed_at,
                value,
                variance,
            })
            .collect())
    }

    /// Filters raw values, returning `(estimate, covariance)` per point.
    pub fn smooth_values(&self, values: &[f64]) -> Result<Vec<(f64, f64)>> {
        if let Some(position) = values.iter().position(|value| !value.is_finite()) {
            return Err(EngineError::invalid(
                "series",
                format!("value at position {position} is not finite"),
            ));
        }
        let Some(&first) = values.first() else {
            return Err(EngineError::invalid("series", "at least one value is required"));
        };
        if values.len() == 1 {
            debug!("single observation, returning it unsmoothed");
            return Ok(vec![(first, self.config.initial_covariance)]);
        }

        let mut filter = KalmanFilter::new(
            first,
            self.config.initial_covariance,
            self.config.process_noise,
            self.config.measurement_noise,
        );
        Ok(values
            .iter()
            .map(|z| {
                let estimate = filter.step(*z);
                (estimate, filter.covariance())
            })
            .collect())
    }

    /// Smooths a series whose noise is correlated with the primary index by
    /// applying the primary's correction scaled by the configured correlation.
    ///
    /// This is an approximation, not a joint multivariate filter: the
    /// secondary series has no state or covariance of its own.
    pub fn smooth_correlated(
        &self,
        primary_raw: &[f64],
        primary_smoothed: &[f64],
        secondary: &[f64],
    ) -> Result<Vec<f64>> {
        if primary_raw.len() != primary_smoothed.len() || primary_raw.len() != secondary.len() {
            return Err(EngineError::invalid(
                "secondary",
                format!(
                    "series lengths differ (raw {}, smoothed {}, secondary {})",
                    primary_raw.len(),
                    primary_smoothed.len(),
                    secondary.len()
                ),
            ));
        }
        if let Some(position) = secondary.iter().position(|value| !value.is_finite()) {
            return Err(EngineError::invalid(
                "secondary",
                format!("value at position {position} is not finite"),
            ));
        }
        let rho = self.config.correlation;
        Ok(secondary
            .iter()
            .zip(primary_raw.iter().zip(primary_smoothed))
            .map(|(value, (raw, smoothed))| clamp_score(value + rho * (smoothed - raw)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn weekly(values: &[f64]) -> Vec<Observation> {
        let start = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(week, index)| Observation {
                observed_at: start + Duration::weeks(week as i64),
                index: *index,
                search: None,
                answer_engine: None,
                geo: None,
                revenue_at_risk: None,
            })
            .collect()
    }

    fn total_change(before: &[f64], after: &[f64]) -> f64 {
        before.iter().zip(after).map(|(a, b)| (a - b).abs()).sum()
    }

    #[test]
    fn single_observation_is_returned_unchanged() {
        let smoother = Smoother::new(SmootherConfig::default());
        let smoothed = smoother.smooth(&weekly(&[63.0])).unwrap();
        assert_eq!(smoothed.len(), 1);
        assert_eq!(smoothed[0].value, 63.0);
    }

    #[test]
    fn first_step_matches_hand_computation() {
        let smoother = Smoother::new(SmootherConfig::default());
        let out = smoother.smooth_values(&[60.0, 70.0]).unwrap();
        // p1 = (1 - 1.2/3.2) * 1.2 = 0.75; p_pred = 0.95; k = 0.95 / 2.95
        assert_eq!(out[0].0, 60.0);
        assert!((out[0].1 - 0.75).abs() < 1e-12);
        let k = 0.95 / 2.95;
        assert!((out[1].0 - (60.0 + k * 10.0)).abs() < 1e-12);
        assert!((out[1].1 - (1.0 - k) * 0.95).abs() < 1e-12);
    }

    #[test]
    fn output_preserves_length_and_order() {
        let smoother = Smoother::new(SmootherConfig::default());
        let input = weekly(&[50.0, 55.0, 52.0, 61.0, 58.0]);
        let smoothed = smoother.smooth(&input).unwrap();
        assert_eq!(smoothed.len(), input.len());
        for (point, obs) in smoothed.iter().zip(&input) {
            assert_eq!(point.observed_at, obs.observed_at);
            assert!(point.variance > 0.0);
        }
    }

    #[test]
    fn estimates_do_not_look_ahead() {
        let smoother = Smoother::new(SmootherConfig::default());
        let full = smoother.smooth_values(&[50.0, 54.0, 49.0, 90.0]).unwrap();
        let prefix = smoother.smooth_values(&[50.0, 54.0, 49.0]).unwrap();
        for (a, b) in full.iter().zip(&prefix) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn resmoothing_moves_values_less_than_the_first_pass() {
        let raw = [52.0, 61.0, 48.0, 66.0, 50.0, 63.0, 47.0, 64.0, 55.0, 60.0];
        for (q, r) in [(0.01, 10.0), (0.05, 2.0), (0.2, 2.0), (0.5, 4.0), (1.0, 1.0), (2.0, 0.5)] {
            let smoother = Smoother::new(SmootherConfig {
                process_noise: q,
                measurement_noise: r,
                ..SmootherConfig::default()
            });
            let once: Vec<f64> = smoother.smooth_values(&raw).unwrap().iter().map(|p| p.0).collect();
            let twice: Vec<f64> = smoother.smooth_values(&once).unwrap().iter().map(|p| p.0).collect();
            assert!(
                total_change(&once, &twice) < total_change(&raw, &once),
                "q={q} r={r}"
            );
        }
    }

    #[test]
    fn rejects_empty_and_unordered_series() {
        let smoother = Smoother::new(SmootherConfig::default());
        assert!(smoother.smooth(&[]).is_err());
        let mut series = weekly(&[50.0, 51.0]);
        series.swap(0, 1);
        assert!(matches!(
            smoother.smooth(&series),
            Err(EngineError::InvalidInput { .. })
        ));
    }

    #[test]
    fn correlated_series_follow_primary_correction() {
        let smoother = Smoother::new(SmootherConfig::default());
        let raw = [60.0, 70.0];
        let smoothed = [60.0, 64.0];
        let ati = [55.0, 68.0];
        let out = smoother.smooth_correlated(&raw, &smoothed, &ati).unwrap();
        assert_eq!(out[0], 55.0);
        assert!((out[1] - (68.0 - 0.85 * 6.0)).abs() < 1e-12);
        assert!(smoother.smooth_correlated(&raw, &smoothed, &[1.0]).is_err());
        assert!(smoother
            .smooth_correlated(&raw, &smoothed, &[55.0, f64::NAN])
            .is_err());
    }
}
