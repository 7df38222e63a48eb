//! Interface metrics worker
//!
//! Two duties on two cadences: the fast path refreshes operational and
//! admin status for every interface of a batch (so the evaluator sees
//! link-down conditions within a minute), and the slow path queries the
//! time-series store for 24 hours of rates and error counters, folding
//! them into the per-interface summary row that list endpoints serve.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain_types::DeviceId;
use crate::probe::oids;
use crate::probe::snmp::table_index;
use crate::probe::{ProbeError, SnmpClient};
use crate::storage::{DeviceStore, Interface, InterfaceStore, InterfaceSummary};
use crate::time_provider::SharedTimeProvider;
use crate::timeseries::{Timeseries, step_for_range};
use crate::workers::SnmpAccess;

/// Devices polled concurrently on the status path
const BATCH_CONCURRENCY: usize = 8;
/// Summary window
const SUMMARY_WINDOW: Duration = Duration::from_secs(24 * 3600);

/// Counters from one status batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusBatchSummary {
    /// Devices refreshed
    pub devices: usize,
    /// Interface rows updated
    pub interfaces: usize,
    /// Devices skipped on error
    pub errors: usize,
}

/// Counters from one summary pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryPassSummary {
    /// Interfaces summarized
    pub summarized: usize,
    /// Interfaces skipped on error
    pub errors: usize,
}

/// The interface metrics worker
pub struct InterfaceMetricsWorker {
    devices: Arc<dyn DeviceStore>,
    interfaces: Arc<dyn InterfaceStore>,
    snmp: Arc<dyn SnmpClient>,
    timeseries: Arc<dyn Timeseries>,
    access: SnmpAccess,
    clock: SharedTimeProvider,
}

impl InterfaceMetricsWorker {
    /// Wires the worker to its collaborators
    #[must_use]
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        interfaces: Arc<dyn InterfaceStore>,
        snmp: Arc<dyn SnmpClient>,
        timeseries: Arc<dyn Timeseries>,
        access: SnmpAccess,
        clock: SharedTimeProvider,
    ) -> Self {
        Self {
            devices,
            interfaces,
            snmp,
            timeseries,
            access,
            clock,
        }
    }

    /// Refreshes oper/admin status for one batch of devices
    pub async fn run_status_batch(&self, batch: &[DeviceId]) -> StatusBatchSummary {
        let mut summary = StatusBatchSummary::default();

        let results = stream::iter(batch.iter().copied())
            .map(|id| self.refresh_device_status(id))
            .buffer_unordered(BATCH_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        for result in results {
            match result {
                Ok(Some(count)) => {
                    summary.devices += 1;
                    summary.interfaces += count;
                }
                Ok(None) => {}
                Err(e) => {
                    summary.errors += 1;
                    debug!(error = %e, "device skipped this status cycle");
                }
            }
        }

        info!(
            devices = summary.devices,
            interfaces = summary.interfaces,
            errors = summary.errors,
            "interface status batch finished"
        );
        summary
    }

    async fn refresh_device_status(&self, id: DeviceId) -> Result<Option<usize>, ProbeError> {
        let device = match self.devices.get_device(id).await {
            Ok(Some(device)) if device.enabled => device,
            Ok(_) => return Ok(None),
            Err(e) => {
                warn!(device_id = %id, error = %e, "device load failed before status refresh");
                return Ok(None);
            }
        };
        let rows = match self.interfaces.list_for_device(device.id).await {
            Ok(rows) if !rows.is_empty() => rows,
            Ok(_) => return Ok(None),
            Err(e) => {
                warn!(device_ip = %device.ip, error = %e, "interface listing failed");
                return Ok(None);
            }
        };

        let target = self.access.target_for(&device)?;
        let mut oper: HashMap<u32, i64> = HashMap::new();
        for (dotted, value) in self.snmp.walk(&target, oids::IF_OPER_STATUS).await? {
            if let (Some(index), Some(status)) =
                (table_index(&dotted, oids::IF_OPER_STATUS), value.as_i64())
            {
                oper.insert(index, status);
            }
        }
        let mut admin: HashMap<u32, i64> = HashMap::new();
        for (dotted, value) in self
            .snmp
            .walk(&target, oids::IF_ADMIN_STATUS)
            .await
            .unwrap_or_default()
        {
            if let (Some(index), Some(status)) =
                (table_index(&dotted, oids::IF_ADMIN_STATUS), value.as_i64())
            {
                admin.insert(index, status);
            }
        }

        let seen_at = self.clock.now_utc();
        let mut updated = 0usize;
        for row in &rows {
            let index = row.if_index.as_u32();
            let new_oper = oper.get(&index).copied();
            if new_oper.is_none() && !admin.contains_key(&index) {
                continue;
            }
            match self
                .interfaces
                .update_status(row.id, admin.get(&index).copied(), new_oper, seen_at)
                .await
            {
                Ok(()) => updated += 1,
                Err(e) => warn!(interface_id = %row.id, error = %e, "status update failed"),
            }
        }
        Ok(Some(updated))
    }

    /// Recomputes the 24h summary row for every critical interface
    pub async fn summarize_all(&self) -> SummaryPassSummary {
        let interfaces = match self.interfaces.list_critical().await {
            Ok(interfaces) => interfaces,
            Err(e) => {
                warn!(error = %e, "summary pass skipped: critical listing failed");
                return SummaryPassSummary::default();
            }
        };

        let mut summary = SummaryPassSummary::default();
        let now = self.clock.now_utc();
        for interface in &interfaces {
            match self.summarize_interface(interface, now).await {
                Ok(()) => summary.summarized += 1,
                Err(e) => {
                    summary.errors += 1;
                    debug!(interface_id = %interface.id, error = %e, "summary skipped");
                }
            }
        }

        info!(
            summarized = summary.summarized,
            errors = summary.errors,
            "interface summary pass finished"
        );
        summary
    }

    async fn summarize_interface(
        &self,
        interface: &Interface,
        now: DateTime<Utc>,
    ) -> Result<(), crate::error::MonitorError> {
        let start = now
            - chrono::Duration::from_std(SUMMARY_WINDOW).unwrap_or_else(|_| chrono::Duration::hours(24));
        let step = step_for_range(SUMMARY_WINDOW);
        let selector = format!(
            "{{device_id=\"{}\",if_index=\"{}\"}}",
            interface.device_id, interface.if_index
        );

        let rate_mbps = |metric: &str| {
            format!("rate({metric}{selector}[5m]) * 8 / 1000000")
        };
        let in_series = self
            .timeseries
            .query_range(&rate_mbps("if_hc_in_octets"), start, now, step)
            .await?;
        let out_series = self
            .timeseries
            .query_range(&rate_mbps("if_hc_out_octets"), start, now, step)
            .await?;

        let in_points: Vec<f64> = in_series
            .iter()
            .flat_map(|s| s.points.iter().map(|(_, v)| *v))
            .collect();
        let out_points: Vec<f64> = out_series
            .iter()
            .flat_map(|s| s.points.iter().map(|(_, v)| *v))
            .collect();

        let counter_total = |metric: &str| {
            let expr = format!("increase({metric}{selector}[24h])");
            async move {
                match self.timeseries.query_instant(&expr, now).await {
                    Ok(results) => results.first().map_or(0i64, |r| {
                        #[allow(clippy::cast_possible_truncation)]
                        let v = r.value.max(0.0) as i64;
                        v
                    }),
                    Err(_) => 0,
                }
            }
        };

        let summary = InterfaceSummary {
            avg_in_mbps: mean(&in_points),
            avg_out_mbps: mean(&out_points),
            max_in_mbps: max(&in_points),
            max_out_mbps: max(&out_points),
            total_gb: total_gb(&in_points, &out_points, step),
            in_errors: counter_total("if_in_errors").await,
            out_errors: counter_total("if_out_errors").await,
            in_discards: counter_total("if_in_discards").await,
            out_discards: counter_total("if_out_discards").await,
        };

        self.interfaces
            .upsert_summary(interface.id, &summary, now)
            .await?;
        Ok(())
    }
}

fn mean(points: &[f64]) -> f64 {
    if points.is_empty() {
        0.0
    } else {
        points.iter().sum::<f64>() / points.len() as f64
    }
}

fn max(points: &[f64]) -> f64 {
    points.iter().copied().fold(0.0, f64::max)
}

/// Integrates Mbps rate points over the step into transferred gigabytes
fn total_gb(in_points: &[f64], out_points: &[f64], step: Duration) -> f64 {
    let megabits: f64 = in_points.iter().chain(out_points).sum::<f64>() * step.as_secs_f64();
    megabits / 8.0 / 1000.0
}
