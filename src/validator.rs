use tracing::{debug, warn};

use crate::config::ValidationConfig;
use crate::error::{EngineError, Result};
use crate::models::{
    BenchmarkResult, BenchmarkStatus, Calibration, CoverageReport, Interval, ResidualSummary,
    ValidationReport,
};
use crate::stats::{correlation, mean, r_squared, std_dev};

#[derive(Debug, Clone)]
pub struct ModelValidator {
    config: ValidationConfig,
}

impl ModelValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Goodness of fit of `predicted` against `observed` for one period
    /// (usually a month such as `2026-09`).
    pub fn validate(&self, observed: &[f64], predicted: &[f64], period: &str) -> Result<ValidationReport> {
        check_pairs(("observed", observed), ("predicted", predicted))?;
        let n = observed.len() as f64;

        let residuals: Vec<f64> = observed.iter().zip(predicted).map(|(o, p)| o - p).collect();
        let ss_res: f64 = residuals.iter().map(|r| r * r).sum();
        let observed_mean = mean(observed);
        let ss_tot: f64 = observed.iter().map(|o| (o - observed_mean).powi(2)).sum();

        let rmse = (ss_res / n).sqrt();
        let mae = residuals.iter().map(|r| r.abs()).sum::<f64>() / n;

        let percentage_errors: Vec<f64> = observed
            .iter()
            .zip(&residuals)
            .filter(|(o, _)| o.abs() > f64::EPSILON)
            .map(|(o, r)| (r / o).abs())
            .collect();
        if percentage_errors.len() < observed.len() {
            debug!(
                skipped = observed.len() - percentage_errors.len(),
                "skipping zero observations in MAPE"
            );
        }
        let mape = mean(&percentage_errors) * 100.0;
        let r2 = r_squared(ss_res, ss_tot);

        Ok(ValidationReport {
            rmse,
            mae,
            mape,
            r2,
            confidence: fit_confidence(r2, observed.len()),
            sample_size: observed.len(),
            month: period.to_string(),
            residuals: summarize_residuals(&residuals),
        })
    }

    /// Share of observations inside their paired interval, compared against
    /// the nominal coverage the intervals claim.
    pub fn coverage(&self, observed: &[f64], intervals: &[Interval], nominal: f64) -> Result<CoverageReport> {
        if observed.len() != intervals.len() {
            return Err(EngineError::DimensionMismatch {
                observed: observed.len(),
                predicted: intervals.len(),
            });
        }
        if observed.is_empty() {
            return Err(EngineError::invalid("observed", "at least one point is required"));
        }
        if let Some(position) = observed.iter().position(|v| !v.is_finite()) {
            return Err(EngineError::invalid(
                format!("observed[{position}]"),
                "values must be finite",
            ));
        }
        if !(0.0..=1.0).contains(&nominal) {
            return Err(EngineError::invalid("nominal", "must be within [0, 1]"));
        }
        if let Some(position) = intervals.iter().position(|i| !(i.lower <= i.upper)) {
            return Err(EngineError::invalid(
                format!("intervals[{position}]"),
                "lower bound exceeds upper bound",
            ));
        }

        let hits = observed
            .iter()
            .zip(intervals)
            .filter(|(o, i)| **o >= i.lower && **o <= i.upper)
            .count();
        let coverage = hits as f64 / observed.len() as f64;
        let average_width =
            intervals.iter().map(|i| i.upper - i.lower).sum::<f64>() / intervals.len() as f64;

        let calibration = if coverage + self.config.coverage_tolerance < nominal {
            Calibration::Overconfident
        } else if coverage > nominal + self.config.coverage_tolerance {
            Calibration::Underconfident
        } else {
            Calibration::Calibrated
        };
        if calibration != Calibration::Calibrated {
            warn!(coverage, nominal, ?calibration, "interval coverage off nominal");
        }

        Ok(CoverageReport {
            coverage,
            average_width,
            nominal,
            calibration,
            sample_size: observed.len(),
        })
    }

    pub fn benchmarks(&self, report: &ValidationReport) -> Vec<BenchmarkResult> {
        let status = |pass: bool| {
            if pass {
                BenchmarkStatus::Pass
            } else {
                BenchmarkStatus::Fail
            }
        };
        vec![
            BenchmarkResult {
                metric: "rmse".to_string(),
                actual: report.rmse,
                target: self.config.rmse_target,
                status: status(report.rmse <= self.config.rmse_target),
            },
            BenchmarkResult {
                metric: "r2".to_string(),
                actual: report.r2,
                target: self.config.r2_target,
                status: status(report.r2 >= self.config.r2_target),
            },
            BenchmarkResult {
                metric: "mape".to_string(),
                actual: report.mape,
                target: self.config.mape_target,
                status: status(report.mape <= self.config.mape_target),
            },
        ]
    }

    /// Pearson correlation of predicted index values with revenue at risk.
    pub fn revenue_correlation(&self, predicted: &[f64], revenue_at_risk: &[f64]) -> Result<f64> {
        check_pairs(("predicted", predicted), ("revenue_at_risk", revenue_at_risk))?;
        Ok(correlation(predicted, revenue_at_risk))
    }
}

fn check_pairs(left: (&str, &[f64]), right: (&str, &[f64])) -> Result<()> {
    let ((left_name, left), (right_name, right)) = (left, right);
    if left.len() != right.len() {
        return Err(EngineError::DimensionMismatch {
            observed: left.len(),
            predicted: right.len(),
        });
    }
    if left.is_empty() {
        return Err(EngineError::invalid(left_name, "at least one point is required"));
    }
    for (name, values) in [(left_name, left), (right_name, right)] {
        if let Some(position) = values.iter().position(|v| !v.is_finite()) {
            return Err(EngineError::invalid(
                format!("{name}[{position}]"),
                "values must be finite",
            ));
        }
    }
    Ok(())
}

fn fit_confidence(r2: f64, sample_size: usize) -> f64 {
    let n = sample_size as f64;
    (r2.clamp(0.0, 1.0) * n / (n + 4.0)).min(0.95)
}

fn summarize_residuals(residuals: &[f64]) -> ResidualSummary {
    let n = residuals.len() as f64;
    let avg = mean(residuals);
    let sd = std_dev(residuals);

    let share = |limit: f64| {
        residuals.iter().filter(|r| (*r - avg).abs() <= limit * sd).count() as f64 / n
    };
    let normality_score = if sd <= f64::EPSILON {
        1.0
    } else {
        ((share(1.0) * 0.68 + share(2.0) * 0.95 + share(3.0) * 0.997) / 2.627).clamp(0.0, 1.0)
    };

    let tier = |keep: &dyn Fn(f64) -> bool| residuals.iter().filter(|r| keep(r.abs())).count() as f64 / n;

    ResidualSummary {
        mean: avg,
        std_dev: sd,
        normality_score,
        within_2: tier(&|r| r < 2.0),
        within_5: tier(&|r| (2.0..5.0).contains(&r)),
        beyond_5: tier(&|r| r >= 5.0),
    }
}
