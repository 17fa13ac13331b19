use serde::{Deserialize, Serialize};

use crate::stats::{correlation, index_trend, mean, median, relative_volatility, std_dev};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Significance {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    UpwardTrend,
    DownwardTrend,
    HighVolatility,
    LowVolatility,
    RecentAcceleration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesTrend {
    pub direction: Direction,
    pub slope: f64,
    pub intercept: f64,
    pub r2: f64,
    pub significance: Significance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Momentum {
    pub current: f64,
    pub average: f64,
    pub accelerating: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub aiv: SeriesTrend,
    pub revenue: Option<SeriesTrend>,
    pub volatility: f64,
    pub aiv_revenue_correlation: Option<f64>,
    pub patterns: Vec<Pattern>,
    pub momentum: Momentum,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    pub current: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub std_dev: f64,
    pub total_change: f64,
}

/// Needs at least three index values. `revenue` is ignored unless it has the
/// same length as `aiv`.
pub fn analyze(aiv: &[f64], revenue: &[f64]) -> Option<TrendAnalysis> {
    if aiv.len() < 3 {
        return None;
    }
    let revenue = (revenue.len() == aiv.len()).then_some(revenue);

    Some(TrendAnalysis {
        aiv: series_trend(aiv),
        revenue: revenue.map(series_trend),
        volatility: relative_volatility(aiv),
        aiv_revenue_correlation: revenue.map(|rev| correlation(aiv, rev)),
        patterns: patterns(aiv),
        momentum: momentum(aiv),
    })
}

pub fn summarize(values: &[f64]) -> Option<SummaryStatistics> {
    let (first, last) = (values.first()?, values.last()?);
    Some(SummaryStatistics {
        current: *last,
        mean: mean(values),
        min: values.iter().cloned().fold(f64::INFINITY, f64::min),
        max: values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        median: median(values),
        std_dev: std_dev(values),
        total_change: last - first,
    })
}

fn series_trend(values: &[f64]) -> SeriesTrend {
    let (slope, intercept, r2) = index_trend(values)
        .map(|fit| (fit.slope, fit.intercept, fit.r2))
        .unwrap_or((0.0, mean(values), 0.0));
    let direction = if slope > 0.1 {
        Direction::Increasing
    } else if slope < -0.1 {
        Direction::Decreasing
    } else {
        Direction::Stable
    };
    let significance = if r2 > 0.7 {
        Significance::High
    } else if r2 > 0.4 {
        Significance::Medium
    } else {
        Significance::Low
    };
    SeriesTrend {
        direction,
        slope,
        intercept,
        r2,
        significance,
    }
}

fn patterns(values: &[f64]) -> Vec<Pattern> {
    let mut patterns = Vec::new();
    let third = values.len() / 3;
    if third > 0 {
        let first_avg = mean(&values[..third]);
        let last_avg = mean(&values[values.len() - third..]);
        if last_avg > first_avg * 1.1 {
            patterns.push(Pattern::UpwardTrend);
        } else if last_avg < first_avg * 0.9 {
            patterns.push(Pattern::DownwardTrend);
        }
    }

    let volatility = relative_volatility(values);
    if volatility > 0.15 {
        patterns.push(Pattern::HighVolatility);
    } else if volatility < 0.05 {
        patterns.push(Pattern::LowVolatility);
    }

    if let [.., a, b, c, d] = values {
        if (d - c).abs() > (b - a).abs() * 1.5 {
            patterns.push(Pattern::RecentAcceleration);
        }
    }
    patterns
}

/// Change over the last three points against the three before them.
fn momentum(values: &[f64]) -> Momentum {
    let span = |window: &[f64]| match window {
        [first, .., last] => last - first,
        _ => 0.0,
    };
    let n = values.len();
    let current = span(&values[n.saturating_sub(3)..]);
    let average = span(&values[n.saturating_sub(6)..n.saturating_sub(3)]);
    Momentum {
        current,
        average,
        accelerating: current > average,
    }
}
