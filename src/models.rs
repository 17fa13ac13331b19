use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub observed_at: DateTime<Utc>,
    pub index: f64,
    pub search: Option<f64>,
    pub answer_engine: Option<f64>,
    pub geo: Option<f64>,
    pub revenue_at_risk: Option<f64>,
}

impl Observation {
    pub fn sub_scores(&self) -> SubScores {
        SubScores {
            search: self.search.unwrap_or(self.index),
            answer_engine: self.answer_engine.unwrap_or(self.index),
            geo: self.geo.unwrap_or(self.index),
        }
    }

    /// Name of the first numeric field holding NaN or an infinity.
    pub fn non_finite_field(&self) -> Option<&'static str> {
        [
            ("index", Some(self.index)),
            ("search", self.search),
            ("answer_engine", self.answer_engine),
            ("geo", self.geo),
            ("revenue_at_risk", self.revenue_at_risk),
        ]
        .into_iter()
        .find(|(_, value)| value.is_some_and(|v| !v.is_finite()))
        .map(|(field, _)| field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothedPoint {
    pub observed_at: DateTime<Utc>,
    pub value: f64,
    pub variance: f64,
}

pub type SmoothedSeries = Vec<SmoothedPoint>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub search: f64,
    pub answer_engine: f64,
    pub geo: f64,
}

impl SubScores {
    pub fn non_finite_field(&self) -> Option<&'static str> {
        [
            ("search", self.search),
            ("answer_engine", self.answer_engine),
            ("geo", self.geo),
        ]
        .into_iter()
        .find(|(_, value)| !value.is_finite())
        .map(|(field, _)| field)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    pub aiv: f64,
    pub ati: f64,
    pub crs: f64,
    /// Revenue-risk index: `100 - crs`, blended with geo readiness when a
    /// geo signal is available.
    pub revenue_risk: f64,
    pub weights_version: String,
    pub geo_adjusted: bool,
    /// Weighted contribution of each component to `aiv`.
    pub breakdown: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoSignal {
    pub checklist_score: f64,
    pub aio_exposure_pct: f64,
    pub topical_depth_score: f64,
    pub knowledge_graph_present: bool,
    pub knowledge_graph_completeness: f64,
    pub mention_velocity: f64,
    pub extractability_score: f64,
}

impl GeoSignal {
    pub fn non_finite_field(&self) -> Option<&'static str> {
        [
            ("checklist_score", self.checklist_score),
            ("aio_exposure_pct", self.aio_exposure_pct),
            ("topical_depth_score", self.topical_depth_score),
            ("knowledge_graph_completeness", self.knowledge_graph_completeness),
            ("mention_velocity", self.mention_velocity),
            ("extractability_score", self.extractability_score),
        ]
        .into_iter()
        .find(|(_, value)| !value.is_finite())
        .map(|(field, _)| field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoSnapshot {
    pub computed_at: DateTime<Utc>,
    pub signal: GeoSignal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLabel {
    High,
    Medium,
    Low,
    Insufficient,
}

impl ConfidenceLabel {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.7 {
            Self::High
        } else if confidence >= 0.4 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Insufficient => "insufficient",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElasticityEstimate {
    pub usd_per_point: f64,
    pub confidence_interval: [f64; 2],
    pub r2: f64,
    pub confidence: f64,
    pub confidence_label: ConfidenceLabel,
    pub sample_size: usize,
    /// Zero until the estimate is recorded in a ledger.
    pub version: u32,
    pub computed_at: Option<DateTime<Utc>>,
}

impl ElasticityEstimate {
    pub fn is_insufficient(&self) -> bool {
        self.confidence_label == ConfidenceLabel::Insufficient
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ImproveAiv,
    ImproveAti,
    ImproveZeroClick,
    ImproveUgc,
    ImproveGeo,
}

impl ActionType {
    pub fn signal(self) -> Signal {
        match self {
            Self::ImproveAiv => Signal::Aiv,
            Self::ImproveAti => Signal::Ati,
            Self::ImproveZeroClick => Signal::ZeroClick,
            Self::ImproveUgc => Signal::UgcHealth,
            Self::ImproveGeo => Signal::GeoTrust,
        }
    }
}

/// Sub-signals a scenario action can move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Aiv,
    Ati,
    ZeroClick,
    UgcHealth,
    GeoTrust,
}

impl Signal {
    pub const ALL: [Signal; 5] = [
        Signal::Aiv,
        Signal::Ati,
        Signal::ZeroClick,
        Signal::UgcHealth,
        Signal::GeoTrust,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aiv => "aiv",
            Self::Ati => "ati",
            Self::ZeroClick => "zero_click",
            Self::UgcHealth => "ugc_health",
            Self::GeoTrust => "geo_trust",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineSignals {
    pub aiv: f64,
    pub ati: f64,
    pub zero_click: f64,
    pub ugc_health: f64,
    pub geo_trust: f64,
}

impl BaselineSignals {
    pub fn get(&self, signal: Signal) -> f64 {
        match signal {
            Signal::Aiv => self.aiv,
            Signal::Ati => self.ati,
            Signal::ZeroClick => self.zero_click,
            Signal::UgcHealth => self.ugc_health,
            Signal::GeoTrust => self.geo_trust,
        }
    }

    pub fn set(&mut self, signal: Signal, value: f64) {
        match signal {
            Signal::Aiv => self.aiv = value,
            Signal::Ati => self.ati = value,
            Signal::ZeroClick => self.zero_click = value,
            Signal::UgcHealth => self.ugc_health = value,
            Signal::GeoTrust => self.geo_trust = value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub magnitude: f64,
    pub confidence: f64,
    #[serde(default)]
    pub timeframe_days: u32,
    #[serde(default)]
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub min: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub total_cost: f64,
    pub expected_value: f64,
    pub roi_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_id: Uuid,
    pub current_score: f64,
    pub expected_score: f64,
    pub improvement: f64,
    pub confidence: f64,
    pub expected_signals: BTreeMap<String, f64>,
    pub distribution: Distribution,
    pub roi: Option<Roi>,
    pub recommendations: Vec<String>,
    pub trials: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResidualSummary {
    pub mean: f64,
    pub std_dev: f64,
    pub normality_score: f64,
    /// Share of residuals with |r| < 2.
    pub within_2: f64,
    /// Share with 2 <= |r| < 5.
    pub within_5: f64,
    /// Share with |r| >= 5.
    pub beyond_5: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub rmse: f64,
    pub mae: f64,
    pub mape: f64,
    pub r2: f64,
    pub confidence: f64,
    pub sample_size: usize,
    pub month: String,
    pub residuals: ResidualSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Calibration {
    Calibrated,
    Overconfident,
    Underconfident,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub coverage: f64,
    pub average_width: f64,
    pub nominal: f64,
    pub calibration: Calibration,
    pub sample_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub metric: String,
    pub actual: f64,
    pub target: f64,
    pub status: BenchmarkStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityReport {
    pub is_stable: bool,
    pub max_change: f64,
    pub recommendation: String,
    pub insufficient_data: bool,
    pub snapshots_considered: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub step: u32,
    pub target_at: DateTime<Utc>,
    pub value: f64,
    pub confidence: f64,
    pub lower: f64,
    pub upper: f64,
    pub components: ForecastComponents,
}

/// Per-model predictions behind an ensemble forecast point. The lag model is
/// absent when history is too short to fit it, and its weight is then zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastComponents {
    pub trend: f64,
    pub lag_regression: Option<f64>,
    pub trend_weight: f64,
    pub lag_weight: f64,
}
