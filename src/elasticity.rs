//! Dollars-per-point sensitivity of revenue at risk to the visibility index.
//!
//! The interval uses a fixed z critical value regardless of sample size.
//! Small samples are handled by lowering the reported confidence rather than
//! switching to t critical values.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{ElasticityConfig, ELASTICITY_CONFIDENCE_CEILING};
use crate::error::{EngineError, Result};
use crate::models::{ConfidenceLabel, ElasticityEstimate};
use crate::stats::{linear_fit, mean};

#[derive(Debug, Clone)]
pub struct ElasticityEstimator {
    config: ElasticityConfig,
}

impl ElasticityEstimator {
    pub fn new(config: ElasticityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ElasticityConfig {
        &self.config
    }

    /// Fits revenue at risk against index value over the trailing window.
    pub fn estimate(&self, history: &[(f64, f64)]) -> ElasticityEstimate {
        let window = match self.config.window {
            0 => history,
            size => &history[history.len().saturating_sub(size)..],
        };
        let points: Vec<(f64, f64)> = window
            .iter()
            .copied()
            .filter(|(index, revenue)| index.is_finite() && revenue.is_finite())
            .collect();
        if points.len() < window.len() {
            warn!(
                dropped = window.len() - points.len(),
                "ignoring non-finite elasticity history points"
            );
        }

        let xs: Vec<f64> = points.iter().map(|(index, _)| *index).collect();
        let ys: Vec<f64> = points.iter().map(|(_, revenue)| *revenue).collect();
        let Some(fit) = linear_fit(&xs, &ys) else {
            debug!(points = points.len(), "not enough index variation for elasticity");
            return insufficient(points.len());
        };

        let n = points.len();
        let residual_variance = if n > 2 {
            fit.ss_res / (n - 2) as f64
        } else {
            0.0
        };
        let slope_error = (residual_variance / fit.sxx).sqrt();
        let usd_per_point = fit.slope.abs();
        let margin = self.config.z_critical * slope_error;
        let confidence = self.confidence(n, residual_variance, &ys);

        ElasticityEstimate {
            usd_per_point,
            confidence_interval: [(usd_per_point - margin).max(0.0), usd_per_point + margin],
            r2: fit.r2.clamp(0.0, 1.0),
            confidence,
            confidence_label: ConfidenceLabel::from_confidence(confidence),
            sample_size: n,
            version: 0,
            computed_at: None,
        }
    }

    /// Rises with sample size and falls with the residual spread relative to
    /// the revenue level. Capped at `max_confidence`, never above 0.95.
    fn confidence(&self, n: usize, residual_variance: f64, revenue: &[f64]) -> f64 {
        let sample_factor = n as f64 / (n as f64 + 4.0);
        let level = mean(&revenue.iter().map(|r| r.abs()).collect::<Vec<_>>());
        let spread = residual_variance.sqrt();
        let relative_spread = if level > f64::EPSILON {
            spread / level
        } else if spread > f64::EPSILON {
            1.0
        } else {
            0.0
        };
        let cap = self.config.max_confidence.min(ELASTICITY_CONFIDENCE_CEILING);
        let mut confidence = cap * sample_factor / (1.0 + relative_spread);
        if n < self.config.small_sample_threshold {
            confidence *= self.config.small_sample_penalty;
        }
        confidence.clamp(0.0, cap)
    }

    /// Widens the interval around the point estimate, for use when an upstream
    /// signal is flagged unstable.
    pub fn widen(&self, estimate: &ElasticityEstimate) -> ElasticityEstimate {
        let factor = self.config.instability_widening;
        let [lower, upper] = estimate.confidence_interval;
        let point = estimate.usd_per_point;
        ElasticityEstimate {
            confidence_interval: [
                (point - (point - lower) * factor).max(0.0),
                point + (upper - point) * factor,
            ],
            ..estimate.clone()
        }
    }
}

fn insufficient(sample_size: usize) -> ElasticityEstimate {
    ElasticityEstimate {
        usd_per_point: 0.0,
        confidence_interval: [0.0, 0.0],
        r2: 0.0,
        confidence: 0.0,
        confidence_label: ConfidenceLabel::Insufficient,
        sample_size,
        version: 0,
        computed_at: None,
    }
}

/// Append-only history of (index, revenue at risk) pairs with a versioned
/// estimate recorded on every append or forced recompute.
#[derive(Debug, Clone)]
pub struct ElasticityLedger {
    estimator: ElasticityEstimator,
    history: Vec<(f64, f64)>,
    records: Vec<ElasticityEstimate>,
    base_version: u32,
}

impl ElasticityLedger {
    pub fn new(estimator: ElasticityEstimator) -> Self {
        Self {
            estimator,
            history: Vec::new(),
            records: Vec::new(),
            base_version: 0,
        }
    }

    /// Continues a ledger persisted elsewhere: new records are numbered after
    /// `last_version`.
    pub fn resume(estimator: ElasticityEstimator, history: Vec<(f64, f64)>, last_version: u32) -> Self {
        Self {
            estimator,
            history,
            records: Vec::new(),
            base_version: last_version,
        }
    }

    pub fn append(
        &mut self,
        index: f64,
        revenue_at_risk: f64,
        as_of: DateTime<Utc>,
    ) -> Result<&ElasticityEstimate> {
        if !index.is_finite() || !(0.0..=100.0).contains(&index) {
            return Err(EngineError::invalid("index", format!("must be within [0, 100], got {index}")));
        }
        if !revenue_at_risk.is_finite() {
            return Err(EngineError::invalid("revenue_at_risk", "must be finite"));
        }
        self.history.push((index, revenue_at_risk));
        Ok(self.record(as_of))
    }

    pub fn force_recompute(&mut self, as_of: DateTime<Utc>) -> &ElasticityEstimate {
        info!(points = self.history.len(), "forced elasticity recompute");
        self.record(as_of)
    }

    fn record(&mut self, as_of: DateTime<Utc>) -> &ElasticityEstimate {
        let mut estimate = self.estimator.estimate(&self.history);
        estimate.version = self.base_version + self.records.len() as u32 + 1;
        estimate.computed_at = Some(as_of);
        self.records.push(estimate);
        &self.records[self.records.len() - 1]
    }

    pub fn latest(&self) -> Option<&ElasticityEstimate> {
        self.records.last()
    }

    pub fn records(&self) -> &[ElasticityEstimate] {
        &self.records
    }

    pub fn history(&self) -> &[(f64, f64)] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> ElasticityEstimator {
        ElasticityEstimator::new(ElasticityConfig::default())
    }

    #[test]
    fn perfect_line_has_full_fit_and_zero_width() {
        let history: Vec<(f64, f64)> = (0..8)
            .map(|i| {
                let index = 50.0 + i as f64 * 2.5;
                (index, 20_000.0 - 180.0 * index)
            })
            .collect();
        let estimate = estimator().estimate(&history);
        assert!((estimate.usd_per_point - 180.0).abs() < 1e-6);
        assert!((estimate.r2 - 1.0).abs() < 1e-9);
        let [lower, upper] = estimate.confidence_interval;
        assert!((upper - lower).abs() < 1e-6);
    }

    #[test]
    fn two_points_give_finite_estimate() {
        let estimate = estimator().estimate(&[(60.0, 12_000.0), (70.0, 10_500.0)]);
        assert!(estimate.usd_per_point.is_finite());
        assert!((estimate.usd_per_point - 150.0).abs() < 1e-9);
        assert!(estimate.confidence <= 0.95);
        assert!(estimate.confidence > 0.0);
        assert_eq!(estimate.confidence_label, ConfidenceLabel::Low);
    }

    #[test]
    fn fewer_than_two_points_is_insufficient_not_an_error() {
        for history in [vec![], vec![(60.0, 9_000.0)]] {
            let estimate = estimator().estimate(&history);
            assert!(estimate.is_insufficient());
            assert_eq!(estimate.usd_per_point, 0.0);
            assert_eq!(estimate.confidence, 0.0);
            assert_eq!(estimate.confidence_interval, [0.0, 0.0]);
        }
    }

    #[test]
    fn constant_index_is_insufficient() {
        let estimate = estimator().estimate(&[(60.0, 9_000.0), (60.0, 9_500.0), (60.0, 8_800.0)]);
        assert!(estimate.is_insufficient());
    }

    #[test]
    fn noisy_history_keeps_interval_ordered() {
        let history = [
            (52.0, 14_100.0),
            (55.0, 13_200.0),
            (54.0, 13_900.0),
            (58.0, 12_400.0),
            (61.0, 12_600.0),
            (63.0, 11_300.0),
            (62.0, 11_900.0),
            (66.0, 10_800.0),
        ];
        let estimate = estimator().estimate(&history);
        let [lower, upper] = estimate.confidence_interval;
        assert!(lower <= upper);
        assert!(upper - lower > 0.0);
        assert!(estimate.r2 > 0.8 && estimate.r2 < 1.0);
    }

    #[test]
    fn confidence_grows_with_data_and_shrinks_with_noise() {
        let config = ElasticityConfig {
            window: 0,
            ..ElasticityConfig::default()
        };
        let estimator = ElasticityEstimator::new(config);
        let line = |n: usize, noise: f64| -> Vec<(f64, f64)> {
            (0..n)
                .map(|i| {
                    let index = 40.0 + i as f64;
                    let wobble = if i % 2 == 0 { noise } else { -noise };
                    (index, 10_000.0 - 100.0 * index + wobble)
                })
                .collect()
        };
        let small = estimator.estimate(&line(4, 200.0));
        let large = estimator.estimate(&line(24, 200.0));
        let noisy = estimator.estimate(&line(24, 2_000.0));
        assert!(large.confidence > small.confidence);
        assert!(large.confidence > noisy.confidence);
        assert!(large.confidence <= 0.95);
    }

    #[test]
    fn confidence_never_exceeds_ceiling_even_when_configured_higher() {
        let estimator = ElasticityEstimator::new(ElasticityConfig {
            window: 0,
            max_confidence: 1.0,
            ..ElasticityConfig::default()
        });
        let exact: Vec<(f64, f64)> = (0..200)
            .map(|i| {
                let index = i as f64 / 2.0;
                (index, 20_000.0 - 150.0 * index)
            })
            .collect();
        let estimate = estimator.estimate(&exact);
        assert!(estimate.confidence <= 0.95);
        assert!((estimate.confidence - 0.95 * 200.0 / 204.0).abs() < 1e-9);
    }

    #[test]
    fn window_limits_the_fit_to_recent_points() {
        let mut history: Vec<(f64, f64)> = (0..10).map(|i| (40.0 + i as f64, 500.0)).collect();
        history.extend((0..8).map(|i| {
            let index = 60.0 + i as f64;
            (index, 9_000.0 - 50.0 * index)
        }));
        let estimate = estimator().estimate(&history);
        assert_eq!(estimate.sample_size, 8);
        assert!((estimate.usd_per_point - 50.0).abs() < 1e-6);
    }

    #[test]
    fn widening_keeps_point_estimate_centered() {
        let estimator = estimator();
        let estimate = ElasticityEstimate {
            usd_per_point: 100.0,
            confidence_interval: [80.0, 120.0],
            r2: 0.9,
            confidence: 0.6,
            confidence_label: ConfidenceLabel::Medium,
            sample_size: 8,
            version: 0,
            computed_at: None,
        };
        let widened = estimator.widen(&estimate);
        assert_eq!(widened.confidence_interval, [70.0, 130.0]);
        assert_eq!(widened.usd_per_point, 100.0);
    }

    #[test]
    fn ledger_versions_every_recompute() {
        let mut ledger = ElasticityLedger::new(estimator());
        let now = Utc::now();
        assert!(ledger.append(60.0, 11_000.0, now).unwrap().is_insufficient());
        let second = ledger.append(65.0, 10_000.0, now).unwrap();
        assert_eq!(second.version, 2);
        assert!((second.usd_per_point - 200.0).abs() < 1e-9);
        let forced = ledger.force_recompute(now).clone();
        assert_eq!(forced.version, 3);
        assert_eq!(ledger.records().len(), 3);
        assert_eq!(ledger.history().len(), 2);
        assert!(ledger.append(140.0, 1.0, now).is_err());
        assert_eq!(ledger.latest().map(|e| e.version), Some(3));
    }

    #[test]
    fn resumed_ledger_continues_numbering() {
        let history = vec![(60.0, 11_000.0), (65.0, 10_000.0)];
        let mut ledger = ElasticityLedger::resume(estimator(), history, 7);
        let next = ledger.append(70.0, 9_000.0, Utc::now()).unwrap();
        assert_eq!(next.version, 8);
        assert_eq!(next.sample_size, 3);
    }
}
