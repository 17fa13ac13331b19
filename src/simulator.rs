//! Monte Carlo projection of scenario actions onto the pulse composite.
//!
//! Each trial realizes every action independently: the realized fraction of
//! the stated lift is drawn from N(confidence, sigma), clamped to [0, 1], and
//! scaled by the action's magnitude. The reported expected score is the median
//! trial outcome, which is robust to the pile-up at the 0/100 clamps.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution as _, Normal};
use tracing::{debug, info};

use crate::config::SimulationConfig;
use crate::error::{EngineError, Result};
use crate::models::{BaselineSignals, Distribution, Roi, ScenarioAction, ScenarioResult, Signal};
use crate::scorer::CompositeScorer;
use crate::stats::{clamp_score, percentile_sorted, sorted};

#[derive(Debug, Clone)]
pub struct ScenarioSimulator {
    scorer: CompositeScorer,
    config: SimulationConfig,
}

impl ScenarioSimulator {
    pub fn new(scorer: CompositeScorer, config: SimulationConfig) -> Self {
        Self { scorer, config }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Runs the simulation with a fresh generator seeded from `seed`.
    pub fn simulate_seeded(
        &self,
        baseline: &BaselineSignals,
        actions: &[ScenarioAction],
        trials: usize,
        dollars_per_point: Option<f64>,
        seed: u64,
    ) -> Result<ScenarioResult> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.simulate(baseline, actions, trials, dollars_per_point, &mut rng)
    }

    /// `dollars_per_point` is normally the current elasticity estimate; the
    /// configured default is used when it is absent.
    pub fn simulate<R: Rng + ?Sized>(
        &self,
        baseline: &BaselineSignals,
        actions: &[ScenarioAction],
        trials: usize,
        dollars_per_point: Option<f64>,
        rng: &mut R,
    ) -> Result<ScenarioResult> {
        validate_inputs(baseline, actions, trials)?;

        let mut baseline = *baseline;
        for signal in Signal::ALL {
            baseline.set(signal, clamp_score(baseline.get(signal)));
        }
        let current_score = self.scorer.pulse_score(&baseline)?;

        let mut samplers = Vec::with_capacity(actions.len());
        for action in actions {
            let normal = Normal::new(action.confidence, self.config.realization_std_dev)
                .map_err(|err| EngineError::invalid("realization_std_dev", err.to_string()))?;
            samplers.push((action, normal));
        }

        let mut outcomes = Vec::with_capacity(trials);
        let mut signal_outcomes: BTreeMap<Signal, Vec<f64>> = Signal::ALL
            .iter()
            .map(|signal| (*signal, Vec::with_capacity(trials)))
            .collect();

        for _ in 0..trials {
            let mut trial = baseline;
            for (action, normal) in &samplers {
                let fraction = normal.sample(rng).clamp(0.0, 1.0);
                let signal = action.action_type.signal();
                let lifted = clamp_score(trial.get(signal) + fraction * action.magnitude);
                trial.set(signal, lifted);
            }
            outcomes.push(self.scorer.pulse_score(&trial)?);
            for (signal, values) in signal_outcomes.iter_mut() {
                values.push(trial.get(*signal));
            }
        }

        let outcomes = sorted(&outcomes);
        let distribution = Distribution {
            min: outcomes[0],
            p25: percentile_sorted(&outcomes, 0.25),
            median: percentile_sorted(&outcomes, 0.5),
            p75: percentile_sorted(&outcomes, 0.75),
            max: outcomes[outcomes.len() - 1],
        };
        let expected_score = distribution.median;
        let improvement = expected_score - current_score;
        let confidence = weighted_confidence(actions);

        let expected_signals = signal_outcomes
            .into_iter()
            .map(|(signal, values)| {
                (
                    signal.as_str().to_string(),
                    percentile_sorted(&sorted(&values), 0.5),
                )
            })
            .collect();

        let roi = self.roi(actions, improvement, dollars_per_point);
        let recommendations = self.recommendations(improvement, confidence, roi.as_ref());

        debug!(?distribution, "scenario distribution");
        info!(
            trials,
            actions = actions.len(),
            current_score,
            expected_score,
            improvement,
            "scenario simulated"
        );

        Ok(ScenarioResult {
            scenario_id: uuid::Builder::from_random_bytes(rng.gen()).into_uuid(),
            current_score,
            expected_score,
            improvement,
            confidence,
            expected_signals,
            distribution,
            roi,
            recommendations,
            trials,
        })
    }

    fn roi(
        &self,
        actions: &[ScenarioAction],
        improvement: f64,
        dollars_per_point: Option<f64>,
    ) -> Option<Roi> {
        let costs: Vec<f64> = actions.iter().filter_map(|action| action.cost).collect();
        if costs.is_empty() {
            return None;
        }
        let total_cost: f64 = costs.iter().sum();
        let rate = dollars_per_point
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .unwrap_or(self.config.dollars_per_point);
        let expected_value = improvement * rate;
        if total_cost <= 0.0 {
            return Some(Roi {
                total_cost,
                expected_value,
                roi_percent: 0.0,
            });
        }
        Some(Roi {
            total_cost,
            expected_value,
            roi_percent: (expected_value - total_cost) / total_cost * 100.0,
        })
    }

    fn recommendations(&self, improvement: f64, confidence: f64, roi: Option<&Roi>) -> Vec<String> {
        let mut recommendations = Vec::new();
        if improvement > self.config.high_impact_threshold {
            recommendations.push(format!(
                "High impact: expected +{improvement:.1} points, prioritize these actions"
            ));
        } else if improvement > self.config.moderate_impact_threshold {
            recommendations.push(format!(
                "Moderate impact: expected +{improvement:.1} points, schedule alongside current work"
            ));
        } else {
            recommendations.push(format!(
                "Low impact: expected {improvement:+.1} points, consider higher-leverage actions"
            ));
        }
        if let Some(roi) = roi {
            if roi.total_cost > 0.0 && roi.roi_percent < 0.0 {
                recommendations.push(format!(
                    "Projected value ${:.0} does not cover cost ${:.0}",
                    roi.expected_value, roi.total_cost
                ));
            }
        }
        if confidence < self.config.confidence_warning_floor {
            recommendations.push(format!(
                "Low confidence ({:.0}%): outcomes may vary widely from the projection",
                confidence * 100.0
            ));
        }
        recommendations
    }
}

/// Magnitude-weighted mean confidence, falling back to the plain mean when
/// every magnitude is zero.
fn weighted_confidence(actions: &[ScenarioAction]) -> f64 {
    let total_magnitude: f64 = actions.iter().map(|a| a.magnitude.abs()).sum();
    if total_magnitude > f64::EPSILON {
        actions
            .iter()
            .map(|a| a.confidence * a.magnitude.abs())
            .sum::<f64>()
            / total_magnitude
    } else {
        actions.iter().map(|a| a.confidence).sum::<f64>() / actions.len() as f64
    }
}

fn validate_inputs(
    baseline: &BaselineSignals,
    actions: &[ScenarioAction],
    trials: usize,
) -> Result<()> {
    if trials == 0 {
        return Err(EngineError::invalid("trials", "must be at least 1"));
    }
    if actions.is_empty() {
        return Err(EngineError::invalid("actions", "at least one action is required"));
    }
    for signal in Signal::ALL {
        if !baseline.get(signal).is_finite() {
            return Err(EngineError::invalid(
                format!("baseline.{}", signal.as_str()),
                "must be finite",
            ));
        }
    }
    for (position, action) in actions.iter().enumerate() {
        if !action.magnitude.is_finite() {
            return Err(EngineError::invalid(
                format!("actions[{position}].magnitude"),
                "must be finite",
            ));
        }
        if !(0.0..=1.0).contains(&action.confidence) {
            return Err(EngineError::invalid(
                format!("actions[{position}].confidence"),
                format!("must be within [0, 1], got {}", action.confidence),
            ));
        }
        if let Some(cost) = action.cost {
            if !cost.is_finite() || cost < 0.0 {
                return Err(EngineError::invalid(
                    format!("actions[{position}].cost"),
                    "must be a non-negative number",
                ));
            }
        }
    }
    Ok(())
}
