use std::fmt::Write;

use chrono::{DateTime, Utc};

use aiv_forecast::models::ForecastPoint;
use aiv_forecast::trend::{self, Pattern};
use aiv_forecast::PipelineOutput;

fn pattern_label(pattern: Pattern) -> &'static str {
    match pattern {
        Pattern::UpwardTrend => "upward trend",
        Pattern::DownwardTrend => "downward trend",
        Pattern::HighVolatility => "high volatility",
        Pattern::LowVolatility => "low volatility",
        Pattern::RecentAcceleration => "recent acceleration",
    }
}

pub fn build_report(
    tenant: &str,
    generated_at: DateTime<Utc>,
    output: &PipelineOutput,
    forecast: &[ForecastPoint],
) -> String {
    let mut report = String::new();

    let _ = writeln!(report, "# AI Visibility Forecast Report");
    let _ = writeln!(
        report,
        "Generated for {} on {}",
        tenant,
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(report);
    let _ = writeln!(report, "## Current Scores");

    match output.latest_score() {
        Some(score) => {
            let _ = writeln!(
                report,
                "- AIV {:.1} / ATI {:.1} / CRS {:.1} (weights {})",
                score.aiv, score.ati, score.crs, score.weights_version
            );
            let _ = writeln!(report, "- Revenue risk index {:.1}", score.revenue_risk);
            for (component, contribution) in &score.breakdown {
                let _ = writeln!(report, "  - {component}: {contribution:.2}");
            }
            if output.provisional {
                let _ = writeln!(report, "- Provisional: geo readiness is unstable.");
            }
        }
        None => {
            let _ = writeln!(report, "No observations recorded for this tenant.");
        }
    }

    let _ = writeln!(report);
    let _ = writeln!(report, "## Geo Stability");
    let _ = writeln!(
        report,
        "- Max checklist change {:.1} across {} snapshots",
        output.stability.max_change, output.stability.snapshots_considered
    );
    let _ = writeln!(report, "- {}", output.stability.recommendation);

    let elasticity = &output.elasticity;
    let _ = writeln!(report);
    let _ = writeln!(report, "## Revenue Elasticity");
    if elasticity.is_insufficient() {
        let _ = writeln!(
            report,
            "Not enough revenue history to estimate elasticity ({} points).",
            elasticity.sample_size
        );
    } else {
        let _ = writeln!(
            report,
            "- ${:.0} per index point (interval ${:.0} to ${:.0})",
            elasticity.usd_per_point,
            elasticity.confidence_interval[0],
            elasticity.confidence_interval[1]
        );
        let _ = writeln!(
            report,
            "- r² {:.2}, confidence {:.2} ({}) over {} points",
            elasticity.r2,
            elasticity.confidence,
            elasticity.confidence_label.as_str(),
            elasticity.sample_size
        );
    }

    let aiv: Vec<f64> = output.scores.iter().map(|score| score.aiv).collect();
    let _ = writeln!(report);
    let _ = writeln!(report, "## Trend");
    match (&output.trend, trend::summarize(&aiv)) {
        (Some(analysis), Some(summary)) => {
            let _ = writeln!(
                report,
                "- AIV {:?} at {:+.2} per week (r² {:.2}, {:?} significance)",
                analysis.aiv.direction, analysis.aiv.slope, analysis.aiv.r2, analysis.aiv.significance
            );
            let _ = writeln!(
                report,
                "- Range {:.1} to {:.1}, mean {:.1}, median {:.1}, total change {:+.1}",
                summary.min, summary.max, summary.mean, summary.median, summary.total_change
            );
            if let Some(correlation) = analysis.aiv_revenue_correlation {
                let _ = writeln!(report, "- AIV/revenue correlation {correlation:.2}");
            }
            if !analysis.patterns.is_empty() {
                let labels: Vec<&str> = analysis.patterns.iter().map(|p| pattern_label(*p)).collect();
                let _ = writeln!(report, "- Patterns: {}", labels.join(", "));
            }
        }
        _ => {
            let _ = writeln!(report, "Not enough history for trend analysis.");
        }
    }

    let _ = writeln!(report);
    let _ = writeln!(report, "## Forecast");
    if forecast.is_empty() {
        let _ = writeln!(report, "No forecast available.");
    } else {
        for point in forecast {
            let _ = writeln!(
                report,
                "- {}: {:.1} ({:.1} to {:.1}, confidence {:.2})",
                point.target_at.format("%Y-%m-%d"),
                point.value,
                point.lower,
                point.upper,
                point.confidence
            );
        }
    }

    report
}
