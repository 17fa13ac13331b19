use std::collections::BTreeMap;

use tracing::debug;

use crate::config::{ScoringConfig, WeightTable};
use crate::error::{EngineError, Result};
use crate::models::{BaselineSignals, CompositeScore, GeoSignal, Signal, SubScores};
use crate::stats::clamp_score;

const AIV_COMPONENTS: &[&str] = &["search", "answer_engine", "geo"];
const CRS_COMPONENTS: &[&str] = &["aiv", "ati"];
const GEO_COMPONENTS: &[&str] = &["checklist", "aio_exposure", "topical_depth", "knowledge_graph"];
const PULSE_COMPONENTS: &[&str] = &["aiv", "ati", "zero_click", "ugc_health", "geo_trust"];

const GEO_READINESS_KEY: &str = "geo_readiness";

#[derive(Debug, Clone)]
pub struct CompositeScorer {
    config: ScoringConfig,
}

impl CompositeScorer {
    /// Builds a scorer, rejecting any weight table that does not sum to 1.0
    /// or names a component the scorer cannot supply.
    pub fn new(config: ScoringConfig) -> Result<Self> {
        check_table(&config.aiv, AIV_COMPONENTS)?;
        check_table(&config.ati, AIV_COMPONENTS)?;
        check_table(&config.crs, CRS_COMPONENTS)?;
        check_table(&config.geo_readiness, GEO_COMPONENTS)?;
        check_table(&config.pulse, PULSE_COMPONENTS)?;
        for (field, weight) in [
            ("visibility_geo_weight", config.visibility_geo_weight),
            ("revenue_risk_geo_weight", config.revenue_risk_geo_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(EngineError::invalid(field, "must be within [0, 1]"));
            }
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Rejects non-finite inputs; finite values outside [0, 100] are clamped.
    pub fn score(&self, sub_scores: &SubScores, geo: Option<&GeoSignal>) -> Result<CompositeScore> {
        if let Some(field) = sub_scores.non_finite_field() {
            return Err(EngineError::invalid(field, "sub-score must be finite"));
        }
        let sub_value = |component: &str| match component {
            "search" => clamp_score(sub_scores.search),
            "answer_engine" => clamp_score(sub_scores.answer_engine),
            "geo" => clamp_score(sub_scores.geo),
            _ => 0.0,
        };

        let mut breakdown = weighted(&self.config.aiv, sub_value);
        let mut base: f64 = breakdown.values().sum();

        let readiness = geo.map(|signal| self.geo_readiness(signal)).transpose()?;
        if let Some(readiness) = readiness {
            let geo_weight = self.config.visibility_geo_weight;
            for contribution in breakdown.values_mut() {
                *contribution *= 1.0 - geo_weight;
            }
            breakdown.insert(GEO_READINESS_KEY.to_string(), readiness * geo_weight);
            base = breakdown.values().sum();
            debug!(readiness, adjusted = base, "applied geo readiness adjustment");
        }

        let aiv = clamp_score(base);
        let ati = clamp_score(weighted(&self.config.ati, sub_value).values().sum());
        let crs_value = |component: &str| match component {
            "aiv" => aiv,
            "ati" => ati,
            _ => 0.0,
        };
        let crs = clamp_score(weighted(&self.config.crs, crs_value).values().sum());

        Ok(CompositeScore {
            aiv,
            ati,
            crs,
            revenue_risk: self.blend_revenue_risk(100.0 - crs, readiness),
            weights_version: self.config.aiv.version.clone(),
            geo_adjusted: geo.is_some(),
            breakdown,
        })
    }

    /// Geo readiness composite in [0, 100]. Knowledge graph completeness only
    /// counts when a knowledge graph panel is present.
    pub fn geo_readiness(&self, signal: &GeoSignal) -> Result<f64> {
        if let Some(field) = signal.non_finite_field() {
            return Err(EngineError::invalid(
                format!("geo.{field}"),
                "geo signal values must be finite",
            ));
        }
        let value = |component: &str| match component {
            "checklist" => clamp_score(signal.checklist_score),
            "aio_exposure" => clamp_score(signal.aio_exposure_pct),
            "topical_depth" => clamp_score(signal.topical_depth_score),
            "knowledge_graph" if signal.knowledge_graph_present => {
                clamp_score(signal.knowledge_graph_completeness)
            }
            _ => 0.0,
        };
        Ok(clamp_score(weighted(&self.config.geo_readiness, value).values().sum()))
    }

    /// Readiness lowers risk, so the blended term is `100 - readiness`.
    fn blend_revenue_risk(&self, base_risk: f64, readiness: Option<f64>) -> f64 {
        let base_risk = clamp_score(base_risk);
        match readiness {
            Some(readiness) => {
                let geo_weight = self.config.revenue_risk_geo_weight;
                clamp_score(base_risk * (1.0 - geo_weight) + (100.0 - readiness) * geo_weight)
            }
            None => base_risk,
        }
    }

    /// Composite over the scenario signals.
    pub fn pulse_score(&self, signals: &BaselineSignals) -> Result<f64> {
        for signal in Signal::ALL {
            if !signals.get(signal).is_finite() {
                return Err(EngineError::invalid(
                    format!("baseline.{}", signal.as_str()),
                    "must be finite",
                ));
            }
        }
        let value = |component: &str| match component {
            "aiv" => clamp_score(signals.aiv),
            "ati" => clamp_score(signals.ati),
            "zero_click" => clamp_score(signals.zero_click),
            "ugc_health" => clamp_score(signals.ugc_health),
            "geo_trust" => clamp_score(signals.geo_trust),
            _ => 0.0,
        };
        Ok(clamp_score(weighted(&self.config.pulse, value).values().sum()))
    }
}

fn weighted(table: &WeightTable, value: impl Fn(&str) -> f64) -> BTreeMap<String, f64> {
    table
        .weights
        .iter()
        .map(|(component, weight)| (component.clone(), value(component) * weight))
        .collect()
}

fn check_table(table: &WeightTable, allowed: &[&str]) -> Result<()> {
    table.validate()?;
    if let Some((component, _)) = table
        .weights
        .iter()
        .find(|(component, _)| !allowed.contains(&component.as_str()))
    {
        return Err(EngineError::invalid(
            format!("{}.{}", table.name, component),
            format!("unknown component, expected one of {}", allowed.join(", ")),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> CompositeScorer {
        CompositeScorer::new(ScoringConfig::default()).expect("default weights are valid")
    }

    fn geo(checklist: f64) -> GeoSignal {
        GeoSignal {
            checklist_score: checklist,
            aio_exposure_pct: 40.0,
            topical_depth_score: 70.0,
            knowledge_graph_present: true,
            knowledge_graph_completeness: 80.0,
            mention_velocity: 12.0,
            extractability_score: 65.0,
        }
    }

    #[test]
    fn weighted_sum_matches_weight_table() {
        let score = scorer().score(
            &SubScores {
                search: 60.0,
                answer_engine: 70.0,
                geo: 80.0,
            },
            None,
        )
        .unwrap();
        let expected = 60.0 * 0.30 + 70.0 * 0.35 + 80.0 * 0.35;
        assert!((score.aiv - expected).abs() < 1e-9);
        assert_eq!(score.ati, 70.0);
        assert!((score.crs - (expected + 70.0) / 2.0).abs() < 1e-9);
        assert!(!score.geo_adjusted);
    }

    #[test]
    fn breakdown_sums_to_score() {
        let score = scorer().score(
            &SubScores {
                search: 45.0,
                answer_engine: 88.0,
                geo: 61.0,
            },
            Some(&geo(72.0)),
        )
        .unwrap();
        let total: f64 = score.breakdown.values().sum();
        assert!((total - score.aiv).abs() < 1e-9);
        assert!(score.breakdown.contains_key("geo_readiness"));
    }

    #[test]
    fn geo_adjustment_blends_with_fixed_weight() {
        let scorer = scorer();
        let sub = SubScores {
            search: 50.0,
            answer_engine: 50.0,
            geo: 50.0,
        };
        let signal = geo(90.0);
        let readiness = scorer.geo_readiness(&signal).unwrap();
        let expected_readiness = 90.0 * 0.6 + 40.0 * 0.2 + 70.0 * 0.1 + 80.0 * 0.1;
        assert!((readiness - expected_readiness).abs() < 1e-9);

        let adjusted = scorer.score(&sub, Some(&signal)).unwrap();
        assert!((adjusted.aiv - (50.0 * 0.85 + readiness * 0.15)).abs() < 1e-9);
    }

    #[test]
    fn missing_knowledge_graph_contributes_nothing() {
        let scorer = scorer();
        let mut signal = geo(50.0);
        let with_graph = scorer.geo_readiness(&signal).unwrap();
        signal.knowledge_graph_present = false;
        let without_graph = scorer.geo_readiness(&signal).unwrap();
        assert!((with_graph - without_graph - 8.0).abs() < 1e-9);
    }

    #[test]
    fn outputs_stay_in_range_for_out_of_range_inputs() {
        let scorer = scorer();
        for (search, answer_engine, geo_value) in [
            (-40.0, 250.0, 100.0),
            (0.0, 0.0, 0.0),
            (100.0, 100.0, 100.0),
            (1e9, -1e9, 50.0),
        ] {
            let sub = SubScores {
                search,
                answer_engine,
                geo: geo_value,
            };
            for signal in [None, Some(geo(140.0)), Some(geo(-5.0))] {
                let score = scorer.score(&sub, signal.as_ref()).unwrap();
                for value in [score.aiv, score.ati, score.crs, score.revenue_risk] {
                    assert!((0.0..=100.0).contains(&value));
                }
            }
        }
    }

    #[test]
    fn invalid_weights_fail_at_construction() {
        let mut config = ScoringConfig::default();
        config.aiv = WeightTable::new("aiv", "bad", &[("search", 0.5), ("geo", 0.35)]);
        assert!(matches!(
            CompositeScorer::new(config),
            Err(EngineError::WeightSum { .. })
        ));

        let mut config = ScoringConfig::default();
        config.pulse = WeightTable::new("pulse", "bad", &[("aiv", 0.5), ("reviews", 0.5)]);
        assert!(matches!(
            CompositeScorer::new(config),
            Err(EngineError::InvalidInput { .. })
        ));
    }

    #[test]
    fn readiness_lowers_revenue_risk() {
        let scorer = scorer();
        let sub = SubScores {
            search: 60.0,
            answer_engine: 60.0,
            geo: 60.0,
        };
        let plain = scorer.score(&sub, None).unwrap();
        assert!((plain.revenue_risk - (100.0 - plain.crs)).abs() < 1e-9);

        let ready = scorer.score(&sub, Some(&geo(95.0))).unwrap();
        let readiness = scorer.geo_readiness(&geo(95.0)).unwrap();
        let expected = (100.0 - ready.crs) * 0.8 + (100.0 - readiness) * 0.2;
        assert!((ready.revenue_risk - expected).abs() < 1e-9);
        assert!(ready.revenue_risk < 100.0 - ready.crs);
    }

    #[test]
    fn non_finite_inputs_are_rejected() {
        let scorer = scorer();
        let sub = SubScores {
            search: f64::NAN,
            answer_engine: 80.0,
            geo: 80.0,
        };
        assert_eq!(
            scorer.score(&sub, None).unwrap_err(),
            EngineError::invalid("search", "sub-score must be finite")
        );

        let finite = SubScores { search: 80.0, ..sub };
        let mut signal = geo(60.0);
        signal.aio_exposure_pct = f64::INFINITY;
        let err = scorer.score(&finite, Some(&signal)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { ref field, .. } if field == "geo.aio_exposure_pct"));

        let mut signals = BaselineSignals {
            aiv: 60.0,
            ati: 55.0,
            zero_click: 50.0,
            ugc_health: 60.0,
            geo_trust: 55.0,
        };
        signals.ugc_health = f64::NAN;
        assert!(scorer.pulse_score(&signals).is_err());
    }

    #[test]
    fn pulse_score_uses_signal_weights() {
        let signals = BaselineSignals {
            aiv: 60.0,
            ati: 55.0,
            zero_click: 50.0,
            ugc_health: 60.0,
            geo_trust: 55.0,
        };
        let expected = 60.0 * 0.30 + 55.0 * 0.25 + 50.0 * 0.15 + 60.0 * 0.15 + 55.0 * 0.15;
        assert!((scorer().pulse_score(&signals).unwrap() - expected).abs() < 1e-9);
    }
}
