//! Beat scheduler
//!
//! A single task owns every periodic timer. Probe ticks ask the device
//! store for the enabled set, slice it into disjoint batches, and hand the
//! batches to the dispatcher; housekeeping ticks enqueue their work item
//! directly. Missed ticks are skipped: after a stall the newest tick wins,
//! so the queues never absorb a backlog of stale cycles.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tracing::{debug, info, warn};

use crate::config::Cadences;
use crate::dispatcher::{Dispatcher, WorkItem, plan_batches};
use crate::domain_types::DeviceId;
use crate::storage::DeviceStore;

/// Which batched probe cycle a tick drives
#[derive(Debug, Clone, Copy)]
enum ProbeCycle {
    Ping,
    Snmp,
    InterfaceStatus,
    Discovery,
}

/// The beat task
pub struct Scheduler {
    cadences: Cadences,
    dispatcher: Arc<Dispatcher>,
    devices: Arc<dyn DeviceStore>,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    /// Wires the scheduler to its collaborators
    #[must_use]
    pub fn new(
        cadences: Cadences,
        dispatcher: Arc<Dispatcher>,
        devices: Arc<dyn DeviceStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cadences,
            dispatcher,
            devices,
            shutdown,
        }
    }

    /// Spawns the beat task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut shutdown = self.shutdown.clone();
            let skip = |mut i: tokio::time::Interval| {
                i.set_missed_tick_behavior(MissedTickBehavior::Skip);
                i
            };
            // Fast cycles fire immediately so a fresh start probes at once;
            // slow jobs wait one full period before their first run.
            let delayed = |period: std::time::Duration| {
                skip(interval_at(Instant::now() + period, period))
            };

            let mut ping = skip(interval(self.cadences.ping));
            let mut alerts = skip(interval(self.cadences.alerts));
            let mut snmp = skip(interval(self.cadences.snmp));
            let mut interface_status = delayed(self.cadences.interface_status);
            let mut interface_metrics = delayed(self.cadences.interface_metrics);
            let mut anomaly = delayed(self.cadences.anomaly);
            let mut discovery = delayed(self.cadences.discovery);
            let mut baseline = delayed(self.cadences.baseline);
            let mut cleanup = delayed(self.cadences.cleanup);

            info!(
                ping_secs = self.cadences.ping.as_secs(),
                alert_secs = self.cadences.alerts.as_secs(),
                snmp_secs = self.cadences.snmp.as_secs(),
                "beat scheduler started"
            );

            loop {
                tokio::select! {
                    _ = ping.tick() => self.dispatch_probe_cycle(ProbeCycle::Ping).await,
                    _ = alerts.tick() => self.enqueue(WorkItem::EvaluateAlerts),
                    _ = snmp.tick() => self.dispatch_probe_cycle(ProbeCycle::Snmp).await,
                    _ = interface_status.tick() => {
                        self.dispatch_probe_cycle(ProbeCycle::InterfaceStatus).await;
                    }
                    _ = interface_metrics.tick() => self.enqueue(WorkItem::SummarizeInterfaces),
                    _ = anomaly.tick() => self.enqueue(WorkItem::CheckAnomalies),
                    _ = discovery.tick() => self.dispatch_probe_cycle(ProbeCycle::Discovery).await,
                    _ = baseline.tick() => self.enqueue(WorkItem::LearnBaselines),
                    _ = cleanup.tick() => self.enqueue(WorkItem::Cleanup),
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("beat scheduler stopping");
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn dispatch_probe_cycle(&self, cycle: ProbeCycle) {
        let devices = match self.devices.list_enabled().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "probe cycle skipped: device listing failed");
                return;
            }
        };
        let ids: Vec<DeviceId> = devices.iter().map(|d| d.id).collect();
        if ids.is_empty() {
            return;
        }

        let batches = plan_batches(&ids);
        debug!(
            devices = ids.len(),
            batches = batches.len(),
            cycle = ?cycle,
            "probe cycle dispatched"
        );
        for batch in batches {
            let item = match cycle {
                ProbeCycle::Ping => WorkItem::PingBatch(batch),
                ProbeCycle::Snmp => WorkItem::SnmpBatch(batch),
                ProbeCycle::InterfaceStatus => WorkItem::InterfaceStatusBatch(batch),
                ProbeCycle::Discovery => WorkItem::DiscoverInterfaces(batch),
            };
            self.enqueue(item);
        }

        // Topology follows interface discovery in the same cycle so neighbor
        // resolution sees fresh interface rows.
        if matches!(cycle, ProbeCycle::Discovery) {
            for batch in plan_batches(&ids) {
                self.enqueue(WorkItem::DiscoverTopology(batch));
            }
        }
    }

    fn enqueue(&self, item: WorkItem) {
        // Overflow is recorded by the dispatcher; the beat never blocks.
        if let Err(e) = self.dispatcher.enqueue(item) {
            debug!(error = %e, "work item dropped");
        }
    }
}
