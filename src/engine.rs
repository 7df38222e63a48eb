//! Engine wiring and lifecycle
//!
//! `MonitorEngine::start` builds the whole object graph (stores over one
//! database connection, probers, the dispatcher and its worker pool, the
//! beat scheduler, and the query service) and owns shutdown. Startup is
//! the only place the process may refuse to run: a missing credential key
//! or an unreadable relational store aborts before any task spawns;
//! everything after start degrades per subsystem.

use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::alerts::AlertEvaluator;
use crate::baseline::BaselineEngine;
use crate::cache::TtlCache;
use crate::config::EngineConfig;
use crate::crypto::CredentialCipher;
use crate::database::{DatabaseConfig, DatabaseConnection};
use crate::dispatcher::Dispatcher;
use crate::error::MonitorResult;
use crate::events::{ChangeStream, ChangeSubscription};
use crate::probe::{IcmpProber, SnmpPoller};
use crate::queries::QueryService;
use crate::scheduler::Scheduler;
use crate::storage::{
    SqliteAlertStore, SqliteBaselineStore, SqliteDeviceStore, SqliteInterfaceStore,
    SqliteProfileStore, SqliteTopologyStore,
};
use crate::time_provider::{SharedTimeProvider, production_time_provider};
use crate::timeseries::TimeseriesClient;
use crate::workers::{
    HousekeepingWorker, InterfaceDiscoveryWorker, InterfaceMetricsWorker, PingWorker, SnmpAccess,
    SnmpWorker, TopologyWorker, WorkerSet, spawn_workers,
};

/// The running monitoring engine
pub struct MonitorEngine {
    dispatcher: Arc<Dispatcher>,
    events: Arc<ChangeStream>,
    queries: Arc<QueryService>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MonitorEngine {
    /// Builds and starts the engine
    ///
    /// # Errors
    ///
    /// Returns an error on fatal startup conditions: an invalid database
    /// path, a store that cannot be opened or migrated, or no ICMP socket.
    pub async fn start(config: EngineConfig) -> MonitorResult<Self> {
        let clock: SharedTimeProvider = production_time_provider();

        let database = DatabaseConnection::initialize(
            DatabaseConfig::new(&config.database_path)?.with_pool_size(config.pool_size),
        )
        .await?;

        let devices = Arc::new(SqliteDeviceStore::new(database.clone()));
        let interfaces = Arc::new(SqliteInterfaceStore::new(database.clone()));
        let alerts = Arc::new(SqliteAlertStore::new(database.clone()));
        let baselines = Arc::new(SqliteBaselineStore::new(database.clone()));
        let profiles = Arc::new(SqliteProfileStore::new(database.clone()));
        let topology = Arc::new(SqliteTopologyStore::new(database.clone()));

        let cipher = CredentialCipher::from_passphrase(&config.credential_key);
        let timeseries = Arc::new(TimeseriesClient::new(&config.timeseries_url)?);
        let icmp = Arc::new(IcmpProber::new(&config.probes)?);
        let snmp = Arc::new(SnmpPoller::new(&config.probes));
        let access = SnmpAccess::new(cipher, config.snmp_community.clone(), &config.probes);

        let events = Arc::new(ChangeStream::new(config.event_capacity));
        let cache = Arc::new(TtlCache::new());
        let dispatcher = Dispatcher::new(config.queue_capacity);

        let worker_set = Arc::new(WorkerSet {
            ping: PingWorker::new(
                devices.clone(),
                alerts.clone(),
                icmp,
                timeseries.clone(),
                events.clone(),
                cache.clone(),
                clock.clone(),
            ),
            snmp: SnmpWorker::new(
                devices.clone(),
                snmp.clone(),
                timeseries.clone(),
                access.clone(),
                clock.clone(),
            ),
            discovery: InterfaceDiscoveryWorker::new(
                devices.clone(),
                interfaces.clone(),
                snmp.clone(),
                access.clone(),
                clock.clone(),
            ),
            topology: TopologyWorker::new(
                devices.clone(),
                interfaces.clone(),
                topology,
                snmp.clone(),
                access.clone(),
                clock.clone(),
            ),
            metrics: InterfaceMetricsWorker::new(
                devices.clone(),
                interfaces.clone(),
                snmp,
                timeseries.clone(),
                access,
                clock.clone(),
            ),
            housekeeping: HousekeepingWorker::new(
                devices.clone(),
                alerts.clone(),
                config.retention.clone(),
                clock.clone(),
            ),
            evaluator: AlertEvaluator::new(
                devices.clone(),
                interfaces.clone(),
                alerts.clone(),
                config.thresholds.clone(),
                clock.clone(),
            ),
            baseline: BaselineEngine::new(
                interfaces.clone(),
                baselines,
                alerts.clone(),
                timeseries.clone(),
                clock.clone(),
            ),
        });

        let mut tasks = spawn_workers(config.worker_count, dispatcher.clone(), worker_set);

        let (shutdown, shutdown_rx) = watch::channel(false);
        tasks.push(
            Scheduler::new(
                config.cadences.clone(),
                dispatcher.clone(),
                devices.clone(),
                shutdown_rx,
            )
            .spawn(),
        );

        let queries = Arc::new(QueryService::new(
            devices,
            interfaces,
            alerts,
            profiles,
            timeseries,
            database,
            cache,
            clock,
        ));

        info!(
            workers = config.worker_count.as_usize(),
            "monitoring engine started"
        );
        Ok(Self {
            dispatcher,
            events,
            queries,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    /// The query surface the external API layers call
    #[must_use]
    pub fn queries(&self) -> Arc<QueryService> {
        Arc::clone(&self.queries)
    }

    /// The status change stream
    #[must_use]
    pub fn events(&self) -> Arc<ChangeStream> {
        Arc::clone(&self.events)
    }

    /// Opens a realtime subscription at the stream head
    #[must_use]
    pub fn subscribe(&self) -> ChangeSubscription {
        self.events.subscribe()
    }

    /// Stops the beat, drains the workers, and joins every task
    pub async fn shutdown(&self) {
        info!("monitoring engine stopping");
        let _ = self.shutdown.send(true);
        self.dispatcher.close();

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        info!("monitoring engine stopped");
    }
}
