//! Shared fixtures for integration tests: scripted probers, a recording
//! time-series sink, and real SQLite stores over a throwaway database.

// Each test binary uses its own subset of these fixtures.
#![allow(dead_code)]

use async_trait::async_trait;
use branchwatch::database::{DatabaseConfig, DatabaseConnection};
use branchwatch::probe::{PingOutcome, ProbeError, ReachabilityProbe, SnmpClient, SnmpTarget, SnmpValue};
use branchwatch::timeseries::{InstantResult, RangeSeries, Sample, Timeseries, TimeseriesError};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

/// Creates an initialized database connection in a temp directory
pub async fn test_database(dir: &tempfile::TempDir) -> DatabaseConnection {
    let config = DatabaseConfig::for_testing(dir.path().join("monitor.db")).expect("config");
    DatabaseConnection::initialize(config)
        .await
        .expect("database initializes")
}

/// A prober that replays scripted outcomes per IP
#[derive(Default)]
pub struct ScriptedProbe {
    scripts: Mutex<HashMap<IpAddr, VecDeque<PingOutcome>>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one outcome for an IP
    pub fn push(&self, ip: IpAddr, outcome: PingOutcome) {
        self.scripts.lock().unwrap().entry(ip).or_default().push_back(outcome);
    }

    /// Shorthand for an alive outcome with the given RTT
    pub fn alive(rtt_ms: f64) -> PingOutcome {
        PingOutcome::from_rtts(2, &[rtt_ms, rtt_ms])
    }

    /// Shorthand for a dead outcome
    pub fn dead() -> PingOutcome {
        PingOutcome::unreachable(2)
    }
}

#[async_trait]
impl ReachabilityProbe for ScriptedProbe {
    async fn probe(&self, ip: IpAddr) -> Result<PingOutcome, ProbeError> {
        let mut scripts = self.scripts.lock().unwrap();
        scripts
            .get_mut(&ip)
            .and_then(VecDeque::pop_front)
            .ok_or(ProbeError::Icmp {
                ip,
                message: "no scripted outcome".to_string(),
            })
    }
}

/// A time-series sink that records writes and queries, serving empty
/// query results
#[derive(Default)]
pub struct RecordingTimeseries {
    samples: Mutex<Vec<Sample>>,
    range_queries: Mutex<Vec<(String, Duration)>>,
}

impl RecordingTimeseries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sample written so far
    pub fn written(&self) -> Vec<Sample> {
        self.samples.lock().unwrap().clone()
    }

    /// Every `(expr, step)` range query issued so far
    pub fn range_queries(&self) -> Vec<(String, Duration)> {
        self.range_queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Timeseries for RecordingTimeseries {
    async fn write_batch(&self, samples: &[Sample]) -> Result<(), TimeseriesError> {
        self.samples.lock().unwrap().extend_from_slice(samples);
        Ok(())
    }

    async fn query_instant(
        &self,
        _expr: &str,
        _at: DateTime<Utc>,
    ) -> Result<Vec<InstantResult>, TimeseriesError> {
        Ok(Vec::new())
    }

    async fn query_range(
        &self,
        expr: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<RangeSeries>, TimeseriesError> {
        self.range_queries
            .lock()
            .unwrap()
            .push((expr.to_string(), step));
        Ok(Vec::new())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// An SNMP client that serves scripted walk tables and scalars
#[derive(Default)]
pub struct ScriptedSnmp {
    /// dotted base oid -> rows
    walks: Mutex<HashMap<String, Vec<(String, SnmpValue)>>>,
    /// dotted full oid -> value
    scalars: Mutex<HashMap<String, SnmpValue>>,
}

impl ScriptedSnmp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the rows a walk of `base` returns
    pub fn script_walk(&self, base: &[u64], rows: Vec<(String, SnmpValue)>) {
        self.walks
            .lock()
            .unwrap()
            .insert(branchwatch::probe::oids::to_dotted(base), rows);
    }

    /// Scripts a scalar value
    pub fn script_scalar(&self, oid: &[u64], value: SnmpValue) {
        self.scalars
            .lock()
            .unwrap()
            .insert(branchwatch::probe::oids::to_dotted(oid), value);
    }
}

#[async_trait]
impl SnmpClient for ScriptedSnmp {
    async fn get(&self, target: &SnmpTarget, oid: &[u64]) -> Result<SnmpValue, ProbeError> {
        self.scalars
            .lock()
            .unwrap()
            .get(&branchwatch::probe::oids::to_dotted(oid))
            .cloned()
            .ok_or(ProbeError::Snmp {
                ip: target.ip,
                message: "no scripted scalar".to_string(),
            })
    }

    async fn get_many(
        &self,
        _target: &SnmpTarget,
        oids: &[&[u64]],
    ) -> Result<Vec<(String, SnmpValue)>, ProbeError> {
        let scalars = self.scalars.lock().unwrap();
        Ok(oids
            .iter()
            .filter_map(|oid| {
                let dotted = branchwatch::probe::oids::to_dotted(oid);
                scalars.get(&dotted).map(|v| (dotted, v.clone()))
            })
            .collect())
    }

    async fn walk(
        &self,
        _target: &SnmpTarget,
        base: &[u64],
    ) -> Result<Vec<(String, SnmpValue)>, ProbeError> {
        Ok(self
            .walks
            .lock()
            .unwrap()
            .get(&branchwatch::probe::oids::to_dotted(base))
            .cloned()
            .unwrap_or_default())
    }
}
