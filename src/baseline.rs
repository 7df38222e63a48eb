//! Traffic baselines and anomaly detection
//!
//! The weekly learning job folds the last 14 days of inbound rate into one
//! cell per `(interface, hour_of_day, day_of_week)`. Cell confidence is
//! `min(sample_count / 28, 1.0)`; two weeks offer at most two samples per
//! hour-of-week slot per 5-minute step, and cells under 0.5 confidence are
//! ignored by the online check. The online check compares the current rate
//! against its matching cell and raises a severity-scaled anomaly alert
//! when the z-score passes 3.

use chrono::{Datelike, Timelike};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::alerts::{EvaluatorError, RULE_TRAFFIC_ANOMALY};
use crate::domain_types::{Confidence, RuleName, Severity};
use crate::storage::{
    AlertStore, BaselineCell, BaselineStore, Interface, InterfaceStore, NewAlert,
};
use crate::time_provider::SharedTimeProvider;
use crate::timeseries::Timeseries;

/// Learning window
const LEARNING_DAYS: i64 = 14;
/// Expected samples per cell over the window (two weeks, one per week-hour,
/// at the 5m learning step that is 12 points per hour x 2 occurrences = 24,
/// padded to 28 to keep confidence conservative)
const FULL_CELL_SAMPLES: f64 = 28.0;
/// Cells below this confidence never fire anomalies
const MIN_CONFIDENCE: f64 = 0.5;
/// Z-score threshold for raising an anomaly
const ANOMALY_Z: f64 = 3.0;

/// Counters from one learning pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LearnSummary {
    /// Interfaces visited
    pub interfaces: usize,
    /// Cells written
    pub cells: usize,
    /// Interfaces skipped on error
    pub errors: usize,
}

/// Baseline learning and anomaly checking
pub struct BaselineEngine {
    interfaces: Arc<dyn InterfaceStore>,
    baselines: Arc<dyn BaselineStore>,
    alerts: Arc<dyn AlertStore>,
    timeseries: Arc<dyn Timeseries>,
    clock: SharedTimeProvider,
}

impl BaselineEngine {
    /// Wires the engine to its stores
    #[must_use]
    pub fn new(
        interfaces: Arc<dyn InterfaceStore>,
        baselines: Arc<dyn BaselineStore>,
        alerts: Arc<dyn AlertStore>,
        timeseries: Arc<dyn Timeseries>,
        clock: SharedTimeProvider,
    ) -> Self {
        Self {
            interfaces,
            baselines,
            alerts,
            timeseries,
            clock,
        }
    }

    fn rate_expr(interface: &Interface) -> String {
        format!(
            "rate(if_hc_in_octets{{device_id=\"{}\",if_index=\"{}\"}}[5m]) * 8 / 1000000",
            interface.device_id, interface.if_index
        )
    }

    /// Weekly learning pass over every critical interface
    ///
    /// # Errors
    ///
    /// Returns an error when the critical-interface listing fails; TS and
    /// per-interface failures are absorbed into the summary.
    #[instrument(skip(self))]
    pub async fn learn(&self) -> Result<LearnSummary, EvaluatorError> {
        let interfaces = self.interfaces.list_critical().await?;
        let now = self.clock.now_utc();
        let start = now - chrono::Duration::days(LEARNING_DAYS);

        let mut summary = LearnSummary::default();
        for interface in &interfaces {
            summary.interfaces += 1;
            let series = match self
                .timeseries
                .query_range(
                    &Self::rate_expr(interface),
                    start,
                    now,
                    Duration::from_secs(3600),
                )
                .await
            {
                Ok(series) => series,
                Err(e) => {
                    summary.errors += 1;
                    warn!(interface_id = %interface.id, error = %e, "baseline query failed");
                    continue;
                }
            };

            let points: Vec<(i64, f64)> = series.into_iter().flat_map(|s| s.points).collect();
            let cells = fold_into_cells(interface, &points);
            for cell in &cells {
                if let Err(e) = self.baselines.upsert_cell(cell, now).await {
                    summary.errors += 1;
                    warn!(interface_id = %interface.id, error = %e, "baseline upsert failed");
                } else {
                    summary.cells += 1;
                }
            }
        }

        info!(
            interfaces = summary.interfaces,
            cells = summary.cells,
            errors = summary.errors,
            "baseline learning finished"
        );
        Ok(summary)
    }

    /// Online anomaly check across critical interfaces
    ///
    /// # Errors
    ///
    /// Returns an error when the critical-interface listing fails.
    #[instrument(skip(self))]
    pub async fn check_anomalies(&self) -> Result<usize, EvaluatorError> {
        let interfaces = self.interfaces.list_critical().await?;
        let now = self.clock.now_utc();
        let hour = u8::try_from(now.hour()).unwrap_or(0);
        let dow = u8::try_from(now.weekday().num_days_from_monday()).unwrap_or(0);

        let mut raised = 0usize;
        for interface in &interfaces {
            let Some(cell) = self.baselines.get_cell(interface.id, hour, dow).await? else {
                continue;
            };
            if cell.confidence.as_f64() < MIN_CONFIDENCE {
                continue;
            }

            let current = match self
                .timeseries
                .query_instant(&Self::rate_expr(interface), now)
                .await
            {
                Ok(results) => results.first().map(|r| r.value),
                Err(e) => {
                    debug!(interface_id = %interface.id, error = %e, "anomaly query failed");
                    None
                }
            };
            let Some(current) = current else { continue };

            let Some(z) = z_score(current, cell.mean_in_mbps, cell.stddev_in_mbps) else {
                continue;
            };

            let rule = RuleName::try_new(RULE_TRAFFIC_ANOMALY).expect("built-in rule name");
            if z.abs() > ANOMALY_Z {
                let label = interface
                    .snapshot
                    .if_name
                    .clone()
                    .unwrap_or_else(|| format!("ifIndex {}", interface.if_index));
                let outcome = self
                    .alerts
                    .create_if_absent(&NewAlert {
                        device_id: interface.device_id,
                        rule_name: rule,
                        severity: anomaly_severity(z),
                        message: format!(
                            "Traffic on {label} is {current:.1} Mbps, {z:.1} sigma from the \
                             learned {:.1} Mbps baseline",
                            cell.mean_in_mbps
                        ),
                        value: Some(format!("{current:.1}Mbps")),
                        threshold: Some(format!("{:.1}±{:.1}Mbps", cell.mean_in_mbps, cell.stddev_in_mbps)),
                        triggered_at: now,
                    })
                    .await?;
                if matches!(outcome, crate::storage::AlertInsertOutcome::Created(_)) {
                    raised += 1;
                }
            } else {
                self.alerts
                    .resolve_by_rule(interface.device_id, &rule, now)
                    .await?;
            }
        }
        Ok(raised)
    }
}

/// Buckets rate points into `(hour, dow)` cells and computes their stats
#[must_use]
pub fn fold_into_cells(interface: &Interface, points: &[(i64, f64)]) -> Vec<BaselineCell> {
    use std::collections::HashMap;

    let mut buckets: HashMap<(u8, u8), Vec<f64>> = HashMap::new();
    for (epoch, value) in points {
        let ts = crate::database::from_epoch(*epoch);
        let hour = u8::try_from(ts.hour()).unwrap_or(0);
        let dow = u8::try_from(ts.weekday().num_days_from_monday()).unwrap_or(0);
        buckets.entry((hour, dow)).or_default().push(*value);
    }

    let mut cells: Vec<BaselineCell> = buckets
        .into_iter()
        .map(|((hour, dow), values)| {
            let (mean, stddev, min, max) = series_stats(&values);
            let count = i64::try_from(values.len()).unwrap_or(i64::MAX);
            BaselineCell {
                interface_id: interface.id,
                hour_of_day: hour,
                day_of_week: dow,
                mean_in_mbps: mean,
                stddev_in_mbps: stddev,
                min_in_mbps: min,
                max_in_mbps: max,
                sample_count: count,
                confidence: Confidence::clamped(values.len() as f64 / FULL_CELL_SAMPLES),
            }
        })
        .collect();
    cells.sort_by_key(|c| (c.day_of_week, c.hour_of_day));
    cells
}

/// Mean, population standard deviation, min, and max of a series
#[must_use]
pub fn series_stats(values: &[f64]) -> (f64, f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (mean, variance.sqrt(), min, max)
}

/// Z-score of an observation against a cell; `None` when the cell has no
/// spread to measure against
#[must_use]
pub fn z_score(value: f64, mean: f64, stddev: f64) -> Option<f64> {
    if stddev <= f64::EPSILON {
        return None;
    }
    Some((value - mean) / stddev)
}

/// Severity scales with how far outside the envelope the traffic sits
#[must_use]
pub fn anomaly_severity(z: f64) -> Severity {
    let magnitude = z.abs();
    if magnitude >= 5.0 {
        Severity::Critical
    } else if magnitude >= 4.0 {
        Severity::High
    } else {
        Severity::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::{DeviceId, IfIndex, InterfaceId};
    use crate::storage::{InterfaceClassification, InterfaceSnapshot};

    fn test_interface() -> Interface {
        Interface {
            id: InterfaceId::generate(),
            device_id: DeviceId::generate(),
            if_index: IfIndex::new(1),
            snapshot: InterfaceSnapshot::default(),
            classification: InterfaceClassification::default(),
            connected_to_device_id: None,
            connected_to_interface_id: None,
            lldp_neighbor_name: None,
            lldp_neighbor_port: None,
            last_seen: None,
        }
    }

    #[test]
    fn test_should_compute_series_stats_when_values_vary() {
        let (mean, stddev, min, max) = series_stats(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((mean - 5.0).abs() < f64::EPSILON);
        assert!((stddev - 2.0).abs() < 1e-9);
        assert!((min - 2.0).abs() < f64::EPSILON);
        assert!((max - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_should_scale_severity_with_z_magnitude() {
        assert_eq!(anomaly_severity(3.2), Severity::Medium);
        assert_eq!(anomaly_severity(-4.5), Severity::High);
        assert_eq!(anomaly_severity(5.1), Severity::Critical);
    }

    #[test]
    fn test_should_refuse_z_score_when_cell_has_no_spread() {
        assert!(z_score(10.0, 10.0, 0.0).is_none());
        let z = z_score(13.0, 10.0, 1.5).expect("spread exists");
        assert!((z - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_should_bucket_points_by_hour_and_weekday_when_folding() {
        use chrono::TimeZone;
        let interface = test_interface();
        // 2025-01-06 is a Monday.
        let monday_nine = chrono::Utc
            .with_ymd_and_hms(2025, 1, 6, 9, 0, 0)
            .unwrap()
            .timestamp();
        let monday_nine_thirty = chrono::Utc
            .with_ymd_and_hms(2025, 1, 6, 9, 30, 0)
            .unwrap()
            .timestamp();
        let tuesday_nine = chrono::Utc
            .with_ymd_and_hms(2025, 1, 7, 9, 0, 0)
            .unwrap()
            .timestamp();

        let cells = fold_into_cells(
            &interface,
            &[(monday_nine, 100.0), (monday_nine_thirty, 120.0), (tuesday_nine, 80.0)],
        );
        assert_eq!(cells.len(), 2);

        let monday_cell = cells.iter().find(|c| c.day_of_week == 0).expect("monday");
        assert_eq!(monday_cell.hour_of_day, 9);
        assert_eq!(monday_cell.sample_count, 2);
        assert!((monday_cell.mean_in_mbps - 110.0).abs() < f64::EPSILON);
        assert!(monday_cell.confidence.as_f64() < MIN_CONFIDENCE);
    }
}
