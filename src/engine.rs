//! Wires the components into the scoring pipeline:
//! observations → smoother → scorer (+ geo readiness) → elasticity, with the
//! stability monitor gating the geo adjustment.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::EngineConfig;
use crate::elasticity::ElasticityEstimator;
use crate::error::{EngineError, Result};
use crate::models::{
    BaselineSignals, CompositeScore, ElasticityEstimate, GeoSnapshot, Observation,
    ScenarioAction, ScenarioResult, SmoothedSeries, StabilityReport, SubScores,
};
use crate::scorer::CompositeScorer;
use crate::simulator::ScenarioSimulator;
use crate::smoother::Smoother;
use crate::stability::StabilityMonitor;
use crate::trend::{self, TrendAnalysis};
use crate::validator::ModelValidator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub smoothed: SmoothedSeries,
    /// One score per observation, computed from smoothed sub-scores.
    pub scores: Vec<CompositeScore>,
    pub stability: StabilityReport,
    pub elasticity: ElasticityEstimate,
    pub trend: Option<TrendAnalysis>,
    /// Set when the geo signal is unstable and the latest score should be
    /// treated as provisional.
    pub provisional: bool,
}

impl PipelineOutput {
    pub fn latest_score(&self) -> Option<&CompositeScore> {
        self.scores.last()
    }
}

#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    smoother: Smoother,
    scorer: CompositeScorer,
    elasticity: ElasticityEstimator,
    simulator: ScenarioSimulator,
    validator: ModelValidator,
    stability: StabilityMonitor,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let scorer = CompositeScorer::new(config.scoring.clone())?;
        Ok(Self {
            smoother: Smoother::new(config.smoother.clone()),
            simulator: ScenarioSimulator::new(scorer.clone(), config.simulation.clone()),
            scorer,
            elasticity: ElasticityEstimator::new(config.elasticity.clone()),
            validator: ModelValidator::new(config.validation.clone()),
            stability: StabilityMonitor::new(config.stability.clone()),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn smoother(&self) -> &Smoother {
        &self.smoother
    }

    pub fn scorer(&self) -> &CompositeScorer {
        &self.scorer
    }

    pub fn elasticity(&self) -> &ElasticityEstimator {
        &self.elasticity
    }

    pub fn simulator(&self) -> &ScenarioSimulator {
        &self.simulator
    }

    pub fn validator(&self) -> &ModelValidator {
        &self.validator
    }

    pub fn stability(&self) -> &StabilityMonitor {
        &self.stability
    }

    #[instrument(skip_all, fields(observations = history.len(), geo_snapshots = geo_history.len()))]
    pub fn run(&self, history: &[Observation], geo_history: &[GeoSnapshot]) -> Result<PipelineOutput> {
        check_inputs(history, geo_history)?;
        let smoothed = self.smoother.smooth(history)?;

        let raw_index: Vec<f64> = history.iter().map(|obs| obs.index).collect();
        let smoothed_index: Vec<f64> = smoothed.iter().map(|point| point.value).collect();
        let channel = |pick: fn(&SubScores) -> f64| -> Result<Vec<f64>> {
            let raw: Vec<f64> = history.iter().map(|obs| pick(&obs.sub_scores())).collect();
            self.smoother.smooth_correlated(&raw_index, &smoothed_index, &raw)
        };
        let search = channel(|s| s.search)?;
        let answer_engine = channel(|s| s.answer_engine)?;
        let geo = channel(|s| s.geo)?;

        let mut geo_sorted: Vec<&GeoSnapshot> = geo_history.iter().collect();
        geo_sorted.sort_by_key(|snapshot| snapshot.computed_at);

        let scores: Vec<CompositeScore> = history
            .iter()
            .enumerate()
            .map(|(i, obs)| {
                let sub_scores = SubScores {
                    search: search[i],
                    answer_engine: answer_engine[i],
                    geo: geo[i],
                };
                let geo_signal = geo_sorted
                    .iter()
                    .rev()
                    .find(|snapshot| snapshot.computed_at <= obs.observed_at)
                    .map(|snapshot| &snapshot.signal);
                self.scorer.score(&sub_scores, geo_signal)
            })
            .collect::<Result<_>>()?;

        let stability = self.stability.check_stability(geo_history);
        let provisional = !stability.is_stable;

        let pairs: Vec<(f64, f64)> = history
            .iter()
            .zip(&scores)
            .filter_map(|(obs, score)| obs.revenue_at_risk.map(|revenue| (score.aiv, revenue)))
            .collect();
        let elasticity = self.stabilize_elasticity(self.elasticity.estimate(&pairs), provisional);

        let aiv_series: Vec<f64> = scores.iter().map(|score| score.aiv).collect();
        let revenue: Vec<f64> = pairs.iter().map(|(_, revenue)| *revenue).collect();
        let trend = trend::analyze(&aiv_series, &revenue);

        info!(
            latest_aiv = aiv_series.last().copied().unwrap_or_default(),
            usd_per_point = elasticity.usd_per_point,
            provisional,
            "pipeline complete"
        );

        Ok(PipelineOutput {
            smoothed,
            scores,
            stability,
            elasticity,
            trend,
            provisional,
        })
    }

    /// Widens the interval of a usable estimate when the geo signal is
    /// unstable. Estimates without a fit pass through unchanged.
    pub fn stabilize_elasticity(
        &self,
        estimate: ElasticityEstimate,
        provisional: bool,
    ) -> ElasticityEstimate {
        if provisional && !estimate.is_insufficient() {
            warn!("geo signal unstable, widening elasticity interval");
            return self.elasticity.widen(&estimate);
        }
        estimate
    }

    /// Runs a scenario, pricing improvement with the elasticity estimate when
    /// one with usable confidence is available.
    pub fn simulate<R: Rng + ?Sized>(
        &self,
        baseline: &BaselineSignals,
        actions: &[ScenarioAction],
        trials: Option<usize>,
        elasticity: Option<&ElasticityEstimate>,
        rng: &mut R,
    ) -> Result<ScenarioResult> {
        let trials = trials.unwrap_or(self.config.simulation.trials);
        let dollars_per_point = elasticity
            .filter(|estimate| !estimate.is_insufficient())
            .map(|estimate| estimate.usd_per_point);
        self.simulator
            .simulate(baseline, actions, trials, dollars_per_point, rng)
    }
}

/// Non-finite values are rejected rather than clamped, and the raw index must
/// already lie in [0, 100].
fn check_inputs(history: &[Observation], geo_history: &[GeoSnapshot]) -> Result<()> {
    for (position, obs) in history.iter().enumerate() {
        if let Some(field) = obs.non_finite_field() {
            return Err(EngineError::invalid(
                format!("history[{position}].{field}"),
                "must be finite",
            ));
        }
        if !(0.0..=100.0).contains(&obs.index) {
            return Err(EngineError::invalid(
                format!("history[{position}].index"),
                format!("must be within [0, 100], got {}", obs.index),
            ));
        }
    }
    for (position, snapshot) in geo_history.iter().enumerate() {
        if let Some(field) = snapshot.signal.non_finite_field() {
            return Err(EngineError::invalid(
                format!("geo_history[{position}].{field}"),
                "must be finite",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::models::{ActionType, GeoSignal};

    fn history() -> Vec<Observation> {
        let start = Utc.with_ymd_and_hms(2026, 5, 4, 0, 0, 0).unwrap();
        let raw = [58.0, 61.0, 57.0, 63.0, 62.0, 66.0, 64.0, 69.0, 67.0, 71.0];
        raw.iter()
            .enumerate()
            .map(|(week, index)| Observation {
                observed_at: start + Duration::weeks(week as i64),
                index: *index,
                search: Some(index - 4.0),
                answer_engine: Some(index + 3.0),
                geo: None,
                revenue_at_risk: Some(30_000.0 - 250.0 * index),
            })
            .collect()
    }

    fn geo_snapshots(checklists: &[(i64, f64)]) -> Vec<GeoSnapshot> {
        let start = Utc.with_ymd_and_hms(2026, 5, 4, 0, 0, 0).unwrap();
        checklists
            .iter()
            .map(|(day, checklist)| GeoSnapshot {
                computed_at: start + Duration::days(*day),
                signal: GeoSignal {
                    checklist_score: *checklist,
                    aio_exposure_pct: 35.0,
                    topical_depth_score: 60.0,
                    knowledge_graph_present: true,
                    knowledge_graph_completeness: 70.0,
                    mention_velocity: 9.0,
                    extractability_score: 58.0,
                },
            })
            .collect()
    }

    #[test]
    fn pipeline_produces_one_score_per_observation() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let history = history();
        let output = engine.run(&history, &geo_snapshots(&[(50, 60.0), (60, 64.0)])).unwrap();
        assert_eq!(output.smoothed.len(), history.len());
        assert_eq!(output.scores.len(), history.len());
        assert!(!output.provisional);
        assert!(output.scores.iter().all(|s| (0.0..=100.0).contains(&s.aiv)));
        // only observations after the first snapshot carry the geo adjustment
        assert!(!output.scores[0].geo_adjusted);
        assert!(output.latest_score().unwrap().geo_adjusted);
        assert!(output.elasticity.usd_per_point > 0.0);
        assert!(output.trend.is_some());
    }

    #[test]
    fn unstable_geo_marks_output_provisional_and_widens_interval() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let history = history();
        // snapshots land after the last observation so both runs score identically
        let stable = engine.run(&history, &geo_snapshots(&[(64, 60.0), (70, 62.0)])).unwrap();
        let unstable = engine.run(&history, &geo_snapshots(&[(64, 60.0), (70, 85.0)])).unwrap();
        assert!(!stable.provisional);
        assert!(unstable.provisional);
        assert_eq!(stable.scores, unstable.scores);
        assert_eq!(stable.elasticity.usd_per_point, unstable.elasticity.usd_per_point);
        let width = |e: &ElasticityEstimate| e.confidence_interval[1] - e.confidence_interval[0];
        assert!(width(&unstable.elasticity) >= width(&stable.elasticity));
    }

    #[test]
    fn provisional_flag_widens_only_usable_estimates() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let pairs = [
            (60.0, 20_000.0),
            (62.0, 19_800.0),
            (65.0, 19_000.0),
            (66.0, 19_100.0),
            (70.0, 18_000.0),
            (72.0, 17_900.0),
        ];
        let estimate = engine.elasticity().estimate(&pairs);
        let width = |e: &ElasticityEstimate| e.confidence_interval[1] - e.confidence_interval[0];

        let kept = engine.stabilize_elasticity(estimate.clone(), false);
        assert_eq!(kept, estimate);
        let widened = engine.stabilize_elasticity(estimate.clone(), true);
        assert_eq!(widened.usd_per_point, estimate.usd_per_point);
        assert!(width(&widened) > width(&estimate));

        let empty = engine.elasticity().estimate(&pairs[..1]);
        assert_eq!(engine.stabilize_elasticity(empty.clone(), true), empty);
    }

    #[test]
    fn non_finite_inputs_are_rejected() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let mut history = history();
        history[3].search = Some(f64::NAN);
        assert_eq!(
            engine.run(&history, &[]).unwrap_err(),
            EngineError::invalid("history[3].search", "must be finite")
        );

        let mut history = self::history();
        history[1].revenue_at_risk = Some(f64::NAN);
        assert_eq!(
            engine.run(&history, &[]).unwrap_err(),
            EngineError::invalid("history[1].revenue_at_risk", "must be finite")
        );

        let mut snapshots = geo_snapshots(&[(50, 60.0), (60, 64.0)]);
        snapshots[1].signal.topical_depth_score = f64::NAN;
        assert_eq!(
            engine.run(&self::history(), &snapshots).unwrap_err(),
            EngineError::invalid("geo_history[1].topical_depth_score", "must be finite")
        );
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        for bad in [104.0, -1.0] {
            let mut history = history();
            history[2].index = bad;
            let err = engine.run(&history, &[]).unwrap_err();
            assert!(matches!(err, EngineError::InvalidInput { ref field, .. } if field == "history[2].index"));
        }
    }

    #[test]
    fn empty_history_is_invalid() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        assert!(engine.run(&[], &[]).is_err());
    }

    #[test]
    fn bad_config_fails_construction() {
        let mut config = EngineConfig::default();
        config.scoring.aiv.weights[0].1 = 0.5;
        assert!(matches!(
            Engine::new(config),
            Err(EngineError::WeightSum { .. })
        ));
    }

    #[test]
    fn scenario_end_to_end() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let baseline = BaselineSignals {
            aiv: 60.0,
            ati: 55.0,
            zero_click: 50.0,
            ugc_health: 60.0,
            geo_trust: 55.0,
        };
        let actions = [ScenarioAction {
            action_type: ActionType::ImproveAiv,
            magnitude: 10.0,
            confidence: 0.8,
            timeframe_days: 30,
            cost: Some(2_500.0),
        }];
        let mut rng = StdRng::seed_from_u64(2026);
        let result = engine
            .simulate(&baseline, &actions, Some(2000), None, &mut rng)
            .unwrap();

        let baseline_score = engine.scorer().pulse_score(&baseline).unwrap();
        let d = result.distribution;
        assert_eq!(result.current_score, baseline_score);
        assert!(d.median > baseline_score);
        assert!(d.p25 <= d.median && d.median <= d.p75);
        for value in [d.min, d.p25, d.median, d.p75, d.max, result.expected_score] {
            assert!((0.0..=100.0).contains(&value));
        }
        assert!(result.roi.is_some());
    }
}
