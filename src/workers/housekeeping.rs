//! Housekeeping worker
//!
//! Daily retention sweep: ping samples, resolved alerts, and status-history
//! rows past their windows are deleted. Active alerts are never touched.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Retention;
use crate::storage::{AlertStore, DeviceStore};
use crate::time_provider::SharedTimeProvider;

/// Counters from one cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    /// Ping rows removed
    pub ping_rows: u64,
    /// Resolved alert rows removed
    pub alert_rows: u64,
    /// Status-history rows removed
    pub history_rows: u64,
}

/// The housekeeping worker
pub struct HousekeepingWorker {
    devices: Arc<dyn DeviceStore>,
    alerts: Arc<dyn AlertStore>,
    retention: Retention,
    clock: SharedTimeProvider,
}

impl HousekeepingWorker {
    /// Wires the worker to its collaborators
    #[must_use]
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        alerts: Arc<dyn AlertStore>,
        retention: Retention,
        clock: SharedTimeProvider,
    ) -> Self {
        Self {
            devices,
            alerts,
            retention,
            clock,
        }
    }

    /// Runs one retention sweep
    pub async fn run(&self) -> CleanupSummary {
        let now = self.clock.now_utc();
        let mut summary = CleanupSummary::default();

        match self
            .devices
            .prune_ping_results(now - self.retention.ping_samples.as_duration())
            .await
        {
            Ok(removed) => summary.ping_rows = removed,
            Err(e) => warn!(error = %e, "ping retention sweep failed"),
        }

        match self
            .alerts
            .prune_resolved(now - self.retention.resolved_alerts.as_duration())
            .await
        {
            Ok(removed) => summary.alert_rows = removed,
            Err(e) => warn!(error = %e, "alert retention sweep failed"),
        }

        match self
            .devices
            .prune_status_history(now - self.retention.status_history.as_duration())
            .await
        {
            Ok(removed) => summary.history_rows = removed,
            Err(e) => warn!(error = %e, "status-history retention sweep failed"),
        }

        info!(
            ping_rows = summary.ping_rows,
            alert_rows = summary.alert_rows,
            history_rows = summary.history_rows,
            "housekeeping finished"
        );
        summary
    }
}
