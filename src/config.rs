//! Engine configuration loaded from the environment
//!
//! All settings have sane defaults except the relational store path and the
//! credential-encryption key; without those two the process refuses to start.
//! Environment variables are prefixed `BRANCHWATCH_`.

use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::domain_types::{
    ChannelCapacity, ConnectionPoolSize, ProbeConcurrency, RetentionDays, WorkerCount,
};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {name}")]
    MissingRequired { name: &'static str },

    #[error("Invalid configuration: {field} - {reason}")]
    ValidationError { field: String, reason: String },
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env_var(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::ValidationError {
            field: name.to_string(),
            reason: format!("could not parse {raw:?}"),
        }),
    }
}

fn env_secs(name: &str, default_secs: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(env_parse(name, default_secs)?))
}

/// ICMP and SNMP probe tuning
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Echo requests per ping
    pub icmp_count: u8,
    /// Gap between echo requests
    pub icmp_interval: Duration,
    /// Per-echo deadline
    pub icmp_timeout: Duration,
    /// Maximum ICMP requests in flight
    pub icmp_concurrency: ProbeConcurrency,
    /// Per-request SNMP deadline
    pub snmp_timeout: Duration,
    /// SNMP retransmits after the first attempt
    pub snmp_retries: u8,
    /// Maximum SNMP requests in flight
    pub snmp_concurrency: ProbeConcurrency,
    /// Hard cap on rows returned by a walk
    pub snmp_walk_max: usize,
    /// Transitions that mark a device unstable for adaptive polling
    pub unstable_transitions: usize,
    /// Window for the unstable-device count
    pub unstable_window: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            icmp_count: 2,
            icmp_interval: Duration::from_millis(200),
            icmp_timeout: Duration::from_secs(1),
            icmp_concurrency: ProbeConcurrency::default(),
            snmp_timeout: Duration::from_secs(5),
            snmp_retries: 1,
            snmp_concurrency: ProbeConcurrency::default(),
            snmp_walk_max: 10_000,
            unstable_transitions: 5,
            unstable_window: Duration::from_secs(3600),
        }
    }
}

/// Alert threshold set with the stricter ISP-link overrides
///
/// An ISP link is any device whose IP ends in `.5` (organizational
/// addressing convention); those uplinks carry whole branches and get the
/// tighter thresholds.
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    /// Latency threshold for ordinary devices, milliseconds
    pub latency_ms: f64,
    /// Latency threshold for ISP links, milliseconds
    pub isp_latency_ms: f64,
    /// Packet-loss threshold for ordinary devices, percent
    pub loss_pct: f64,
    /// Packet-loss threshold for ISP links, percent
    pub isp_loss_pct: f64,
    /// Transitions in the flap window before the flapping rule fires
    pub flap_threshold: usize,
    /// Flap threshold for ISP links
    pub isp_flap_threshold: usize,
    /// A device must be down at least this long before `device_down` fires
    pub device_down_grace: Duration,
    /// Raise an independent alert when a critical interface goes oper-down
    pub alert_on_critical_interface_down: bool,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            latency_ms: 200.0,
            isp_latency_ms: 100.0,
            loss_pct: 10.0,
            isp_loss_pct: 5.0,
            flap_threshold: 3,
            isp_flap_threshold: 2,
            device_down_grace: Duration::from_secs(10),
            alert_on_critical_interface_down: true,
        }
    }
}

impl AlertThresholds {
    /// True when the address falls in the ISP-link class (last octet `.5`)
    #[must_use]
    pub fn is_isp_link(ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => v4.octets()[3] == 5,
            IpAddr::V6(v6) => v6.octets()[15] == 5,
        }
    }

    /// Latency threshold for a device of the given class
    #[must_use]
    pub fn latency_for(&self, isp_link: bool) -> f64 {
        if isp_link { self.isp_latency_ms } else { self.latency_ms }
    }

    /// Loss threshold for a device of the given class
    #[must_use]
    pub fn loss_for(&self, isp_link: bool) -> f64 {
        if isp_link { self.isp_loss_pct } else { self.loss_pct }
    }

    /// Flap threshold for a device of the given class
    #[must_use]
    pub fn flap_for(&self, isp_link: bool) -> usize {
        if isp_link { self.isp_flap_threshold } else { self.flap_threshold }
    }
}

/// Scheduler cadences
#[derive(Debug, Clone)]
pub struct Cadences {
    /// Ping batch dispatch
    pub ping: Duration,
    /// Alert evaluation
    pub alerts: Duration,
    /// SNMP counter collection
    pub snmp: Duration,
    /// Interface operational-status collection
    pub interface_status: Duration,
    /// Interface metric summaries
    pub interface_metrics: Duration,
    /// Online anomaly check
    pub anomaly: Duration,
    /// Interface and topology discovery
    pub discovery: Duration,
    /// Baseline learning
    pub baseline: Duration,
    /// Housekeeping
    pub cleanup: Duration,
}

impl Default for Cadences {
    fn default() -> Self {
        Self {
            ping: Duration::from_secs(10),
            alerts: Duration::from_secs(10),
            snmp: Duration::from_secs(60),
            interface_status: Duration::from_secs(60),
            interface_metrics: Duration::from_secs(15 * 60),
            anomaly: Duration::from_secs(5 * 60),
            discovery: Duration::from_secs(6 * 3600),
            baseline: Duration::from_secs(7 * 24 * 3600),
            cleanup: Duration::from_secs(24 * 3600),
        }
    }
}

/// Housekeeping retention windows
#[derive(Debug, Clone)]
pub struct Retention {
    /// Ping samples
    pub ping_samples: RetentionDays,
    /// Resolved alert rows
    pub resolved_alerts: RetentionDays,
    /// Status-history / discovery rows
    pub status_history: RetentionDays,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            ping_samples: RetentionDays::try_new(30).expect("30 is in range"),
            resolved_alerts: RetentionDays::try_new(7).expect("7 is in range"),
            status_history: RetentionDays::try_new(30).expect("30 is in range"),
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite database file for the relational store
    pub database_path: PathBuf,
    /// Connection pool size for the relational store
    pub pool_size: ConnectionPoolSize,
    /// Passphrase for credential encryption at rest
    pub credential_key: String,
    /// Time-series store base URL
    pub timeseries_url: String,
    /// Default SNMP community for devices without explicit credentials
    pub snmp_community: String,
    /// Default SNMP port
    pub snmp_port: u16,
    /// Worker pool size
    pub worker_count: WorkerCount,
    /// Per-priority queue capacity
    pub queue_capacity: ChannelCapacity,
    /// Change-stream fan-out buffer
    pub event_capacity: ChannelCapacity,
    /// Probe tuning
    pub probes: ProbeConfig,
    /// Alert thresholds
    pub thresholds: AlertThresholds,
    /// Scheduler cadences
    pub cadences: Cadences,
    /// Housekeeping retention
    pub retention: Retention,
}

impl EngineConfig {
    /// Loads configuration from the environment
    ///
    /// # Errors
    ///
    /// Returns an error when a required variable is missing or a value does
    /// not parse; these are fatal startup errors by design.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_path = env_var("BRANCHWATCH_DATABASE_PATH")
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingRequired {
                name: "BRANCHWATCH_DATABASE_PATH",
            })?;
        let credential_key =
            env_var("BRANCHWATCH_CREDENTIAL_KEY").ok_or(ConfigError::MissingRequired {
                name: "BRANCHWATCH_CREDENTIAL_KEY",
            })?;

        let worker_default = num_cpus::get().clamp(1, 8);
        let worker_count = WorkerCount::try_new(env_parse(
            "BRANCHWATCH_WORKER_COUNT",
            worker_default,
        )?)
        .map_err(|e| ConfigError::ValidationError {
            field: "BRANCHWATCH_WORKER_COUNT".to_string(),
            reason: e.to_string(),
        })?;

        let icmp_concurrency =
            ProbeConcurrency::try_new(env_parse("BRANCHWATCH_PING_CONCURRENCY", 50usize)?)
                .map_err(|e| ConfigError::ValidationError {
                    field: "BRANCHWATCH_PING_CONCURRENCY".to_string(),
                    reason: e.to_string(),
                })?;
        let snmp_concurrency =
            ProbeConcurrency::try_new(env_parse("BRANCHWATCH_SNMP_CONCURRENCY", 50usize)?)
                .map_err(|e| ConfigError::ValidationError {
                    field: "BRANCHWATCH_SNMP_CONCURRENCY".to_string(),
                    reason: e.to_string(),
                })?;
        let probes = ProbeConfig {
            icmp_concurrency,
            snmp_concurrency,
            ..ProbeConfig::default()
        };

        let cadences = Cadences {
            ping: env_secs("BRANCHWATCH_PING_INTERVAL_SECS", 10)?,
            alerts: env_secs("BRANCHWATCH_ALERT_INTERVAL_SECS", 10)?,
            snmp: env_secs("BRANCHWATCH_SNMP_INTERVAL_SECS", 60)?,
            interface_status: env_secs("BRANCHWATCH_IFSTATUS_INTERVAL_SECS", 60)?,
            ..Cadences::default()
        };

        Ok(Self {
            database_path,
            pool_size: ConnectionPoolSize::default(),
            credential_key,
            timeseries_url: env_var("BRANCHWATCH_TIMESERIES_URL")
                .unwrap_or_else(|| "http://localhost:8428".to_string()),
            snmp_community: env_var("BRANCHWATCH_SNMP_COMMUNITY")
                .unwrap_or_else(|| "public".to_string()),
            snmp_port: env_parse("BRANCHWATCH_SNMP_PORT", 161u16)?,
            worker_count,
            queue_capacity: ChannelCapacity::try_new(1024).expect("1024 is in range"),
            event_capacity: ChannelCapacity::try_new(1024).expect("1024 is in range"),
            probes,
            thresholds: AlertThresholds::default(),
            cadences,
            retention: Retention::default(),
        })
    }

    /// Configuration for tests: throwaway database, fixed key, local TS url
    #[must_use]
    pub fn for_testing(database_path: PathBuf) -> Self {
        Self {
            database_path,
            pool_size: ConnectionPoolSize::try_new(1).expect("1 is in range"),
            credential_key: "test-key".to_string(),
            timeseries_url: "http://localhost:8428".to_string(),
            snmp_community: "public".to_string(),
            snmp_port: 161,
            worker_count: WorkerCount::try_new(2).expect("2 is in range"),
            queue_capacity: ChannelCapacity::try_new(64).expect("64 is in range"),
            event_capacity: ChannelCapacity::try_new(64).expect("64 is in range"),
            probes: ProbeConfig::default(),
            thresholds: AlertThresholds::default(),
            cadences: Cadences::default(),
            retention: Retention::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_should_classify_isp_link_when_last_octet_is_five() {
        assert!(AlertThresholds::is_isp_link(IpAddr::V4(Ipv4Addr::new(
            10, 1, 20, 5
        ))));
        assert!(!AlertThresholds::is_isp_link(IpAddr::V4(Ipv4Addr::new(
            10, 1, 20, 50
        ))));
        assert!(AlertThresholds::is_isp_link(IpAddr::V6(Ipv6Addr::new(
            0, 0, 0, 0, 0, 0, 0, 5
        ))));
    }

    #[test]
    fn test_should_apply_stricter_thresholds_when_device_is_isp_link() {
        let thresholds = AlertThresholds::default();
        assert!(thresholds.latency_for(true) < thresholds.latency_for(false));
        assert!(thresholds.loss_for(true) < thresholds.loss_for(false));
        assert!(thresholds.flap_for(true) < thresholds.flap_for(false));
    }

    #[test]
    fn test_should_use_default_cadences_when_unset() {
        let cadences = Cadences::default();
        assert_eq!(cadences.ping, Duration::from_secs(10));
        assert_eq!(cadences.alerts, Duration::from_secs(10));
        assert_eq!(cadences.snmp, Duration::from_secs(60));
        assert_eq!(cadences.interface_metrics, Duration::from_secs(900));
    }
}
