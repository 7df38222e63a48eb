//! Worker pool and the workers it drives
//!
//! Workers pull one item at a time from the dispatcher (prefetch = 1), so
//! a long-running maintenance task can never hold more than one slot while
//! alert evaluation waits. Each task runs under a soft limit that logs and
//! a hard limit that aborts; an aborted batch keeps whatever it already
//! wrote and simply skips the remaining devices for the cycle.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::alerts::AlertEvaluator;
use crate::baseline::BaselineEngine;
use crate::config::ProbeConfig;
use crate::crypto::CredentialCipher;
use crate::dispatcher::{Dispatcher, WorkItem};
use crate::domain_types::WorkerCount;
use crate::probe::{ProbeError, SnmpCredential, SnmpTarget};
use crate::storage::Device;

pub mod housekeeping;
pub mod interface_discovery;
pub mod interface_metrics;
pub mod ping;
pub mod snmp;
pub mod topology;

pub use housekeeping::HousekeepingWorker;
pub use interface_discovery::InterfaceDiscoveryWorker;
pub use interface_metrics::InterfaceMetricsWorker;
pub use ping::PingWorker;
pub use snmp::SnmpWorker;
pub use topology::TopologyWorker;

/// A task past this age is logged as slow
const SOFT_TASK_LIMIT: Duration = Duration::from_secs(4 * 60);
/// A task past this age is aborted
const HARD_TASK_LIMIT: Duration = Duration::from_secs(5 * 60);

/// Shared SNMP credential handling for every SNMP-speaking worker
///
/// Credentials decrypt inside [`SnmpAccess::target_for`]; the plaintext
/// lives only in the returned target, which stays on the probe call path.
#[derive(Clone)]
pub struct SnmpAccess {
    cipher: CredentialCipher,
    default_community: String,
    timeout: Duration,
    retries: u8,
}

impl SnmpAccess {
    /// Builds the access helper from engine configuration
    #[must_use]
    pub fn new(cipher: CredentialCipher, default_community: String, probes: &ProbeConfig) -> Self {
        Self {
            cipher,
            default_community,
            timeout: probes.snmp_timeout,
            retries: probes.snmp_retries,
        }
    }

    /// Builds the polling target for a device, opening its sealed credential
    ///
    /// # Errors
    ///
    /// Returns an error when the sealed credential cannot be opened.
    pub fn target_for(&self, device: &Device) -> Result<SnmpTarget, ProbeError> {
        let credential = match &device.snmp_credential {
            Some(sealed) => SnmpCredential::open_sealed(&self.cipher, sealed)?,
            None => SnmpCredential::v2c(self.default_community.clone()),
        };
        Ok(SnmpTarget {
            ip: device.ip,
            port: device.snmp_port,
            credential,
            timeout: self.timeout,
            retries: self.retries,
        })
    }
}

/// Every worker the pool can route to
pub struct WorkerSet {
    /// Reachability probing and the device state machine
    pub ping: PingWorker,
    /// SNMP counter collection
    pub snmp: SnmpWorker,
    /// IF-MIB interface discovery
    pub discovery: InterfaceDiscoveryWorker,
    /// LLDP/CDP neighbor discovery
    pub topology: TopologyWorker,
    /// Interface status refresh and 24h summaries
    pub metrics: InterfaceMetricsWorker,
    /// Retention sweeps
    pub housekeeping: HousekeepingWorker,
    /// Alert evaluation
    pub evaluator: AlertEvaluator,
    /// Baseline learning and anomaly checks
    pub baseline: BaselineEngine,
}

/// Spawns the worker pool
#[must_use]
pub fn spawn_workers(
    count: WorkerCount,
    dispatcher: Arc<Dispatcher>,
    set: Arc<WorkerSet>,
) -> Vec<JoinHandle<()>> {
    (0..count.as_usize())
        .map(|worker_id| {
            let dispatcher = Arc::clone(&dispatcher);
            let set = Arc::clone(&set);
            tokio::spawn(worker_loop(worker_id, dispatcher, set))
        })
        .collect()
}

async fn worker_loop(worker_id: usize, dispatcher: Arc<Dispatcher>, set: Arc<WorkerSet>) {
    debug!(worker_id, "worker started");
    while let Some(item) = dispatcher.next().await {
        let label = item_label(&item);
        let started = std::time::Instant::now();

        match tokio::time::timeout(HARD_TASK_LIMIT, handle_item(&set, item)).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                if elapsed > SOFT_TASK_LIMIT {
                    warn!(worker_id, task = label, elapsed_secs = elapsed.as_secs(), "task ran slow");
                }
            }
            Err(_) => {
                // Partial results already written stand; the rest of the
                // batch is simply skipped this cycle.
                warn!(
                    worker_id,
                    task = label,
                    limit_secs = HARD_TASK_LIMIT.as_secs(),
                    "task aborted at the hard limit"
                );
            }
        }
    }
    debug!(worker_id, "worker stopped");
}

fn item_label(item: &WorkItem) -> &'static str {
    match item {
        WorkItem::EvaluateAlerts => "evaluate_alerts",
        WorkItem::PingBatch(_) => "ping_batch",
        WorkItem::SnmpBatch(_) => "snmp_batch",
        WorkItem::InterfaceStatusBatch(_) => "interface_status_batch",
        WorkItem::DiscoverInterfaces(_) => "discover_interfaces",
        WorkItem::DiscoverTopology(_) => "discover_topology",
        WorkItem::SummarizeInterfaces => "summarize_interfaces",
        WorkItem::LearnBaselines => "learn_baselines",
        WorkItem::CheckAnomalies => "check_anomalies",
        WorkItem::Cleanup => "cleanup",
    }
}

async fn handle_item(set: &WorkerSet, item: WorkItem) {
    match item {
        WorkItem::EvaluateAlerts => {
            if let Err(e) = set.evaluator.run_cycle().await {
                warn!(error = %e, "alert evaluation cycle failed");
            }
        }
        WorkItem::PingBatch(batch) => {
            set.ping.run_batch(&batch).await;
        }
        WorkItem::SnmpBatch(batch) => {
            set.snmp.run_batch(&batch).await;
        }
        WorkItem::InterfaceStatusBatch(batch) => {
            set.metrics.run_status_batch(&batch).await;
        }
        WorkItem::DiscoverInterfaces(batch) => {
            set.discovery.run_batch(&batch).await;
        }
        WorkItem::DiscoverTopology(batch) => {
            set.topology.run_batch(&batch).await;
        }
        WorkItem::SummarizeInterfaces => {
            set.metrics.summarize_all().await;
        }
        WorkItem::LearnBaselines => {
            if let Err(e) = set.baseline.learn().await {
                warn!(error = %e, "baseline learning failed");
            }
        }
        WorkItem::CheckAnomalies => {
            if let Err(e) = set.baseline.check_anomalies().await {
                warn!(error = %e, "anomaly check failed");
            }
        }
        WorkItem::Cleanup => {
            set.housekeeping.run().await;
        }
    }
}
