//! # Branchwatch - Branch Network Monitoring Engine
//!
//! Branchwatch continuously watches a geographically distributed branch
//! network: it probes device reachability over ICMP, polls SNMP counters,
//! discovers interfaces and LLDP/CDP topology, evaluates alert rules with
//! deduplication and auto-resolution, and feeds a time-series store and a
//! realtime change stream.
//!
//! ## Architecture
//!
//! A beat scheduler fires periodic ticks; the dispatcher slices the device
//! inventory into auto-sized batches and publishes them onto four strictly
//! prioritized bounded queues (alerts > ping > snmp > maintenance). A
//! worker pool pulls one task at a time:
//!
//! ```text
//! Scheduler -> Dispatcher -> [alerts|ping|snmp|maintenance] -> Workers
//!                                                                |
//!                     +---------------+------------------+-------+
//!                     v               v                  v
//!               Relational store  Time-series store  Change stream
//! ```
//!
//! The relational store (embedded SQLite) owns entities, state, and alert
//! history; counters and rates live in a Prometheus-compatible time-series
//! store. The HTTP/REST surface, auth, and import tooling are external
//! collaborators built on [`queries::QueryService`] and
//! [`events::ChangeStream`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use branchwatch::config::EngineConfig;
//! use branchwatch::engine::MonitorEngine;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::from_env()?;
//! let engine = MonitorEngine::start(config).await?;
//!
//! let health = engine.queries().health().await;
//! println!("relational store healthy: {}", health.relational_ok);
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod baseline;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod database;
pub mod dispatcher;
pub mod domain_types;
pub mod engine;
pub mod error;
pub mod events;
pub mod interface_parser;
pub mod probe;
pub mod queries;
pub mod scheduler;
pub mod storage;
pub mod time_provider;
pub mod timeseries;
pub mod workers;

pub use config::EngineConfig;
pub use engine::MonitorEngine;
pub use error::{MonitorError, MonitorResult};
