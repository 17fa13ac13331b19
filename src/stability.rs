use chrono::Duration;
use tracing::{debug, warn};

use crate::config::StabilityConfig;
use crate::models::{GeoSnapshot, StabilityReport};

#[derive(Debug, Clone)]
pub struct StabilityMonitor {
    config: StabilityConfig,
}

impl StabilityMonitor {
    pub fn new(config: StabilityConfig) -> Self {
        Self { config }
    }

    /// Flags swings in the geo checklist score. The lookback window is anchored
    /// on the newest snapshot, so the check does not depend on the wall clock.
    pub fn check_stability(&self, recent: &[GeoSnapshot]) -> StabilityReport {
        let mut snapshots: Vec<&GeoSnapshot> = recent.iter().collect();
        snapshots.sort_by_key(|snapshot| snapshot.computed_at);

        if let Some(newest) = snapshots.last().map(|s| s.computed_at) {
            let cutoff = newest - Duration::days(self.config.lookback_days);
            snapshots.retain(|snapshot| snapshot.computed_at >= cutoff);
        }

        if snapshots.len() < 2 {
            debug!(snapshots = snapshots.len(), "not enough geo snapshots for stability check");
            return StabilityReport {
                is_stable: true,
                max_change: 0.0,
                recommendation: format!(
                    "Insufficient data: need at least 2 geo snapshots within {} days",
                    self.config.lookback_days
                ),
                insufficient_data: true,
                snapshots_considered: snapshots.len(),
            };
        }

        let max_change = snapshots
            .windows(2)
            .map(|pair| (pair[1].signal.checklist_score - pair[0].signal.checklist_score).abs())
            .fold(0.0, f64::max);
        let is_stable = max_change <= self.config.max_checklist_change;

        let recommendation = if is_stable {
            "Geo readiness is stable; composite score can be trusted".to_string()
        } else {
            warn!(
                max_change,
                threshold = self.config.max_checklist_change,
                "geo checklist swing exceeds threshold"
            );
            format!(
                "Geo checklist moved {max_change:.1} points within {} days; treat the composite as provisional and widen confidence intervals",
                self.config.lookback_days
            )
        };

        StabilityReport {
            is_stable,
            max_change,
            recommendation,
            insufficient_data: false,
            snapshots_considered: snapshots.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::models::GeoSignal;

    fn snapshot(day: u32, checklist: f64) -> GeoSnapshot {
        GeoSnapshot {
            computed_at: Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap(),
            signal: GeoSignal {
                checklist_score: checklist,
                aio_exposure_pct: 30.0,
                topical_depth_score: 60.0,
                knowledge_graph_present: false,
                knowledge_graph_completeness: 0.0,
                mention_velocity: 4.0,
                extractability_score: 55.0,
            },
        }
    }

    fn monitor() -> StabilityMonitor {
        StabilityMonitor::new(StabilityConfig::default())
    }

    #[test]
    fn large_swing_is_unstable() {
        let report = monitor().check_stability(&[snapshot(1, 50.0), snapshot(9, 70.0)]);
        assert!(!report.is_stable);
        assert_eq!(report.max_change, 20.0);
        assert!(!report.insufficient_data);
    }

    #[test]
    fn small_swing_is_stable() {
        let report = monitor().check_stability(&[snapshot(1, 50.0), snapshot(9, 58.0)]);
        assert!(report.is_stable);
        assert_eq!(report.max_change, 8.0);
    }

    #[test]
    fn change_at_threshold_is_stable() {
        let report = monitor().check_stability(&[snapshot(1, 50.0), snapshot(5, 65.0)]);
        assert!(report.is_stable);
    }

    #[test]
    fn single_snapshot_is_stable_by_default() {
        let report = monitor().check_stability(&[snapshot(1, 50.0)]);
        assert!(report.is_stable);
        assert!(report.insufficient_data);
        assert!(report.recommendation.starts_with("Insufficient data"));
    }

    #[test]
    fn snapshots_outside_lookback_are_ignored() {
        let report = monitor().check_stability(&[snapshot(1, 20.0), snapshot(20, 60.0), snapshot(27, 62.0)]);
        assert!(report.is_stable);
        assert_eq!(report.snapshots_considered, 2);
    }

    #[test]
    fn order_of_input_does_not_matter() {
        let report = monitor().check_stability(&[snapshot(12, 52.0), snapshot(4, 50.0), snapshot(8, 75.0)]);
        assert!(!report.is_stable);
        assert_eq!(report.max_change, 25.0);
    }
}
