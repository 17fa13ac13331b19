use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

const WEIGHT_SUM_EPSILON: f64 = 1e-6;

/// A named, versioned set of component weights. Weights must sum to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightTable {
    pub name: String,
    pub version: String,
    pub weights: Vec<(String, f64)>,
}

impl WeightTable {
    pub fn new(name: &str, version: &str, weights: &[(&str, f64)]) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            weights: weights
                .iter()
                .map(|(component, weight)| (component.to_string(), *weight))
                .collect(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.weights.is_empty() {
            return Err(EngineError::invalid(&self.name, "weight table is empty"));
        }
        for (component, weight) in &self.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(EngineError::invalid(
                    format!("{}.{}", self.name, component),
                    format!("weight must be a non-negative number, got {weight}"),
                ));
            }
        }
        let sum: f64 = self.weights.iter().map(|(_, weight)| weight).sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
            return Err(EngineError::WeightSum {
                index: self.name.clone(),
                sum,
            });
        }
        Ok(())
    }

    pub fn weight(&self, component: &str) -> f64 {
        self.weights
            .iter()
            .find(|(name, _)| name == component)
            .map(|(_, weight)| *weight)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    pub process_noise: f64,
    pub measurement_noise: f64,
    pub initial_covariance: f64,
    /// Share of the primary series' correction applied to correlated series.
    pub correlation: f64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            process_noise: 0.2,
            measurement_noise: 2.0,
            initial_covariance: 1.0,
            correlation: 0.85,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub aiv: WeightTable,
    pub ati: WeightTable,
    pub crs: WeightTable,
    pub geo_readiness: WeightTable,
    pub pulse: WeightTable,
    pub visibility_geo_weight: f64,
    pub revenue_risk_geo_weight: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            aiv: WeightTable::new(
                "aiv",
                "v1",
                &[("search", 0.30), ("answer_engine", 0.35), ("geo", 0.35)],
            ),
            ati: WeightTable::new("ati", "v1", &[("answer_engine", 1.0)]),
            crs: WeightTable::new("crs", "v1", &[("aiv", 0.5), ("ati", 0.5)]),
            geo_readiness: WeightTable::new(
                "geo_readiness",
                "v1",
                &[
                    ("checklist", 0.6),
                    ("aio_exposure", 0.2),
                    ("topical_depth", 0.1),
                    ("knowledge_graph", 0.1),
                ],
            ),
            pulse: WeightTable::new(
                "pulse",
                "v1",
                &[
                    ("aiv", 0.30),
                    ("ati", 0.25),
                    ("zero_click", 0.15),
                    ("ugc_health", 0.15),
                    ("geo_trust", 0.15),
                ],
            ),
            visibility_geo_weight: 0.15,
            revenue_risk_geo_weight: 0.20,
        }
    }
}

/// Upper bound on any elasticity confidence, whatever the configuration.
pub const ELASTICITY_CONFIDENCE_CEILING: f64 = 0.95;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticityConfig {
    /// Trailing points used for the fit. 0 uses the whole history.
    pub window: usize,
    pub z_critical: f64,
    pub small_sample_threshold: usize,
    pub small_sample_penalty: f64,
    pub max_confidence: f64,
    /// Interval widening applied when the geo signal is unstable.
    pub instability_widening: f64,
}

impl Default for ElasticityConfig {
    fn default() -> Self {
        Self {
            window: 8,
            z_critical: 1.96,
            small_sample_threshold: 8,
            small_sample_penalty: 0.75,
            max_confidence: 0.95,
            instability_widening: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub trials: usize,
    pub realization_std_dev: f64,
    pub dollars_per_point: f64,
    pub high_impact_threshold: f64,
    pub moderate_impact_threshold: f64,
    pub confidence_warning_floor: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            trials: 1000,
            realization_std_dev: 0.15,
            dollars_per_point: 150.0,
            high_impact_threshold: 15.0,
            moderate_impact_threshold: 5.0,
            confidence_warning_floor: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub lookback_days: i64,
    pub max_checklist_change: f64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            lookback_days: 14,
            max_checklist_change: 15.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub rmse_target: f64,
    pub r2_target: f64,
    /// Percent, matching `ValidationReport::mape`.
    pub mape_target: f64,
    /// Allowed gap between observed and nominal coverage before flagging.
    pub coverage_tolerance: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            rmse_target: 3.0,
            r2_target: 0.75,
            mape_target: 8.0,
            coverage_tolerance: 0.05,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub smoother: SmootherConfig,
    pub scoring: ScoringConfig,
    pub elasticity: ElasticityConfig,
    pub simulation: SimulationConfig,
    pub stability: StabilityConfig,
    pub validation: ValidationConfig,
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let smoother = &self.smoother;
        positive("smoother.process_noise", smoother.process_noise)?;
        positive("smoother.measurement_noise", smoother.measurement_noise)?;
        positive("smoother.initial_covariance", smoother.initial_covariance)?;
        unit_interval("smoother.correlation", smoother.correlation)?;

        let scoring = &self.scoring;
        for table in [
            &scoring.aiv,
            &scoring.ati,
            &scoring.crs,
            &scoring.geo_readiness,
            &scoring.pulse,
        ] {
            table.validate()?;
        }
        unit_interval("scoring.visibility_geo_weight", scoring.visibility_geo_weight)?;
        unit_interval(
            "scoring.revenue_risk_geo_weight",
            scoring.revenue_risk_geo_weight,
        )?;

        let elasticity = &self.elasticity;
        positive("elasticity.z_critical", elasticity.z_critical)?;
        unit_interval("elasticity.small_sample_penalty", elasticity.small_sample_penalty)?;
        if !(0.0..=ELASTICITY_CONFIDENCE_CEILING).contains(&elasticity.max_confidence) {
            return Err(EngineError::invalid(
                "elasticity.max_confidence",
                format!(
                    "must be within [0, {ELASTICITY_CONFIDENCE_CEILING}], got {}",
                    elasticity.max_confidence
                ),
            ));
        }
        if elasticity.instability_widening < 1.0 {
            return Err(EngineError::invalid(
                "elasticity.instability_widening",
                "must be at least 1.0",
            ));
        }

        let simulation = &self.simulation;
        if simulation.trials == 0 {
            return Err(EngineError::invalid("simulation.trials", "must be at least 1"));
        }
        positive("simulation.realization_std_dev", simulation.realization_std_dev)?;
        if !simulation.dollars_per_point.is_finite() || simulation.dollars_per_point < 0.0 {
            return Err(EngineError::invalid(
                "simulation.dollars_per_point",
                "must be a non-negative number",
            ));
        }
        if simulation.moderate_impact_threshold > simulation.high_impact_threshold {
            return Err(EngineError::invalid(
                "simulation.moderate_impact_threshold",
                "must not exceed high_impact_threshold",
            ));
        }

        if self.stability.lookback_days < 1 {
            return Err(EngineError::invalid(
                "stability.lookback_days",
                "must be at least 1",
            ));
        }
        positive(
            "stability.max_checklist_change",
            self.stability.max_checklist_change,
        )?;

        unit_interval(
            "validation.coverage_tolerance",
            self.validation.coverage_tolerance,
        )?;
        Ok(())
    }
}

fn positive(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(EngineError::invalid(field, format!("must be positive, got {value}")))
    }
}

fn unit_interval(field: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(EngineError::invalid(field, format!("must be within [0, 1], got {value}")))
    }
}
