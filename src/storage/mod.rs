//! Storage layer for the relational store gateway
//!
//! This module provides trait definitions and SQLite implementations for
//! typed access to every monitored entity: devices, interfaces, alerts,
//! rules, baselines, profiles, and topology links.
//!
//! # Architecture
//!
//! The storage layer follows the functional core / imperative shell pattern:
//! - Pure functions handle domain validation and row transformation
//! - Async trait methods handle I/O against the database
//! - All operations use domain types at the seam
//!
//! Two bulk operations exist specifically to keep list endpoints O(1) in
//! query count: [`DeviceStore::latest_ping_bulk`] and
//! [`AlertStore::count_active_bulk`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

use crate::database::DatabaseResult;
use crate::domain_types::{
    AlertId, BranchId, Confidence, DeviceId, DeviceStatus, IfIndex, InterfaceId, RuleName,
    Severity, TransitionRing,
};

pub mod alert_store;
pub mod baseline_store;
pub mod device_store;
pub mod interface_store;
pub mod profile_store;
pub mod topology_store;

pub use alert_store::SqliteAlertStore;
pub use baseline_store::SqliteBaselineStore;
pub use device_store::SqliteDeviceStore;
pub use interface_store::SqliteInterfaceStore;
pub use profile_store::SqliteProfileStore;
pub use topology_store::SqliteTopologyStore;

/// Reachability state carried on the device row
///
/// Mutated only by the ping worker that observed the transition; all other
/// readers treat it as a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    /// Set on the UP→DOWN transition, cleared on DOWN→UP, never reset while
    /// the device stays down
    pub down_since: Option<DateTime<Utc>>,
    /// Flap suppression flag
    pub is_flapping: bool,
    /// Transitions observed in the rolling flap window
    pub flap_count: usize,
    /// When flap suppression engaged
    pub flapping_since: Option<DateTime<Utc>>,
    /// Bounded ring of recent transition timestamps
    pub transitions: TransitionRing,
}

impl DeviceState {
    /// The state the last processed sample implies
    #[must_use]
    pub fn status(&self) -> DeviceStatus {
        if self.down_since.is_none() {
            DeviceStatus::Up
        } else {
            DeviceStatus::Down
        }
    }

    /// Adaptive-poller classification: a device is unstable when its
    /// transition count over the configured window reaches the threshold
    /// (see [`crate::config::ProbeConfig::unstable_transitions`])
    #[must_use]
    pub fn is_unstable(
        &self,
        now: DateTime<Utc>,
        transitions: usize,
        window: std::time::Duration,
    ) -> bool {
        let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::hours(1));
        self.transitions.count_within(now, window) >= transitions
    }
}

/// A monitored device row
#[derive(Debug, Clone)]
pub struct Device {
    /// Stable identifier
    pub id: DeviceId,
    /// Unique management address
    pub ip: IpAddr,
    /// Resolved hostname, when known
    pub hostname: Option<String>,
    /// Display name
    pub name: String,
    /// Vendor hint (from discovery or import)
    pub vendor: Option<String>,
    /// Device type hint (router, switch, atm, nvr, ...)
    pub device_type: Option<String>,
    /// Owning branch
    pub branch_id: Option<BranchId>,
    /// Organizational region
    pub region: Option<String>,
    /// Free-form tags
    pub tags: Vec<String>,
    /// Free-form custom fields
    pub custom_fields: serde_json::Value,
    /// Monitoring enabled flag
    pub enabled: bool,
    /// SNMP version tag ("v2c" or "v3"), when SNMP is configured
    pub snmp_version: Option<String>,
    /// Sealed SNMP credential (see [`crate::crypto::CredentialCipher`])
    pub snmp_credential: Option<String>,
    /// SNMP port
    pub snmp_port: u16,
    /// Reachability state
    pub state: DeviceState,
    /// Last successful observation of any kind
    pub last_seen: Option<DateTime<Utc>>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Row update time
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// True when this device is in the ISP-link class (last octet `.5`)
    #[must_use]
    pub fn is_isp_link(&self) -> bool {
        crate::config::AlertThresholds::is_isp_link(self.ip)
    }
}

/// Fields accepted when creating or importing a device (upsert key: `ip`)
#[derive(Debug, Clone)]
pub struct NewDevice {
    /// Management address (the upsert key)
    pub ip: IpAddr,
    /// Display name
    pub name: String,
    /// Resolved hostname
    pub hostname: Option<String>,
    /// Vendor hint
    pub vendor: Option<String>,
    /// Device type hint
    pub device_type: Option<String>,
    /// Owning branch
    pub branch_id: Option<BranchId>,
    /// Organizational region
    pub region: Option<String>,
    /// Monitoring enabled flag
    pub enabled: bool,
    /// SNMP version tag
    pub snmp_version: Option<String>,
    /// Sealed SNMP credential
    pub snmp_credential: Option<String>,
    /// SNMP port
    pub snmp_port: u16,
}

impl NewDevice {
    /// Minimal device for discovery and tests
    #[must_use]
    pub fn bare(ip: IpAddr, name: impl Into<String>) -> Self {
        Self {
            ip,
            name: name.into(),
            hostname: None,
            vendor: None,
            device_type: None,
            branch_id: None,
            region: None,
            enabled: true,
            snmp_version: None,
            snmp_credential: None,
            snmp_port: 161,
        }
    }
}

/// IF-MIB snapshot fields for an interface row
#[derive(Debug, Clone, Default)]
pub struct InterfaceSnapshot {
    /// ifName
    pub if_name: Option<String>,
    /// ifDescr
    pub if_descr: Option<String>,
    /// ifAlias (operator-set description, primary classification input)
    pub if_alias: Option<String>,
    /// ifType numeric code (24 = softwareLoopback)
    pub if_type: Option<i64>,
    /// ifAdminStatus (1=up, 2=down, 3=testing)
    pub admin_status: Option<i64>,
    /// ifOperStatus (1=up, 2=down)
    pub oper_status: Option<i64>,
    /// ifSpeed / ifHighSpeed, bits per second
    pub speed_bps: Option<i64>,
    /// ifMtu
    pub mtu: Option<i64>,
    /// ifPhysAddress, formatted as colon-separated hex
    pub phys_address: Option<String>,
}

/// Parser output attached to an interface row
#[derive(Debug, Clone)]
pub struct InterfaceClassification {
    /// Classified role
    pub interface_type: InterfaceKind,
    /// Normalized ISP provider, when the role is `Isp`
    pub isp_provider: Option<String>,
    /// Whether the interface participates in critical monitoring
    pub is_critical: bool,
    /// Parser confidence
    pub confidence: Confidence,
}

impl Default for InterfaceClassification {
    fn default() -> Self {
        Self {
            interface_type: InterfaceKind::Other,
            isp_provider: None,
            is_critical: false,
            confidence: Confidence::zero(),
        }
    }
}

/// Interface role assigned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceKind {
    /// Uplink to an internet service provider (always critical)
    Isp,
    /// Trunk, LAG, or port-channel
    Trunk,
    /// End-user access port
    Access,
    /// Link to a server or hypervisor
    ServerLink,
    /// Link toward a branch office or VPN tunnel
    BranchLink,
    /// Management plane
    Management,
    /// Loopback (recorded, excluded from critical monitoring)
    Loopback,
    /// Voice / VoIP
    Voice,
    /// CCTV / NVR
    Camera,
    /// Everything else
    Other,
}

impl InterfaceKind {
    /// The stored string form
    #[must_use]
    pub fn as_db(self) -> &'static str {
        match self {
            Self::Isp => "isp",
            Self::Trunk => "trunk",
            Self::Access => "access",
            Self::ServerLink => "server_link",
            Self::BranchLink => "branch_link",
            Self::Management => "management",
            Self::Loopback => "loopback",
            Self::Voice => "voice",
            Self::Camera => "camera",
            Self::Other => "other",
        }
    }

    /// Parses the stored string form; unknown values degrade to `Other`
    #[must_use]
    pub fn from_db(value: &str) -> Self {
        match value {
            "isp" => Self::Isp,
            "trunk" => Self::Trunk,
            "access" => Self::Access,
            "server_link" => Self::ServerLink,
            "branch_link" => Self::BranchLink,
            "management" => Self::Management,
            "loopback" => Self::Loopback,
            "voice" => Self::Voice,
            "camera" => Self::Camera,
            _ => Self::Other,
        }
    }
}

/// A device interface row
#[derive(Debug, Clone)]
pub struct Interface {
    /// Stable identifier
    pub id: InterfaceId,
    /// Owning device
    pub device_id: DeviceId,
    /// SNMP interface index (unique per device)
    pub if_index: IfIndex,
    /// IF-MIB snapshot
    pub snapshot: InterfaceSnapshot,
    /// Classifier output
    pub classification: InterfaceClassification,
    /// Neighbor device resolved by topology discovery
    pub connected_to_device_id: Option<DeviceId>,
    /// Neighbor interface resolved by topology discovery
    pub connected_to_interface_id: Option<InterfaceId>,
    /// Raw neighbor system name (kept for orphan neighbors)
    pub lldp_neighbor_name: Option<String>,
    /// Raw neighbor port (kept for orphan neighbors)
    pub lldp_neighbor_port: Option<String>,
    /// Refreshed on every successful walk that sees this index
    pub last_seen: Option<DateTime<Utc>>,
}

impl Interface {
    /// True when the interface counts toward critical monitoring
    ///
    /// Loopbacks are recorded but never critical, regardless of what a
    /// stale classification column claims.
    #[must_use]
    pub fn is_monitored_critical(&self) -> bool {
        self.classification.is_critical
            && self.classification.interface_type != InterfaceKind::Loopback
    }
}

/// An alert rule row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// Rule name, unique
    pub name: RuleName,
    /// Operator description
    pub description: Option<String>,
    /// Symbolic condition (built-in rules ignore this; retained for custom rules)
    pub expression: Option<String>,
    /// Severity assigned to alerts this rule creates
    pub severity: Severity,
    /// Optional device scope
    pub device_id: Option<DeviceId>,
    /// Optional branch scope
    pub branch_id: Option<BranchId>,
    /// Enabled flag
    pub enabled: bool,
}

/// A row in the append-only alert history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Stable identifier
    pub id: AlertId,
    /// Affected device
    pub device_id: DeviceId,
    /// Rule that fired
    pub rule_name: RuleName,
    /// Severity at trigger time
    pub severity: Severity,
    /// Human message
    pub message: String,
    /// Observed value, stringified
    pub value: Option<String>,
    /// Threshold that was crossed, stringified
    pub threshold: Option<String>,
    /// Trigger time
    pub triggered_at: DateTime<Utc>,
    /// Resolution time; `None` while active
    pub resolved_at: Option<DateTime<Utc>>,
    /// Operator acknowledgement flag
    pub acknowledged: bool,
    /// Who acknowledged
    pub acknowledged_by: Option<String>,
    /// When acknowledged
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Notification deliveries recorded against this alert
    pub notifications_sent: i64,
}

/// Fields for the conditional alert insert
#[derive(Debug, Clone)]
pub struct NewAlert {
    /// Affected device
    pub device_id: DeviceId,
    /// Rule name (dedup key together with the device)
    pub rule_name: RuleName,
    /// Severity
    pub severity: Severity,
    /// Human message
    pub message: String,
    /// Observed value
    pub value: Option<String>,
    /// Crossed threshold
    pub threshold: Option<String>,
    /// Trigger time
    pub triggered_at: DateTime<Utc>,
}

/// Outcome of the conditional alert insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertInsertOutcome {
    /// A new active alert row was created
    Created(AlertId),
    /// An active alert for `(device, rule)` already existed; nothing changed
    AlreadyActive,
}

/// Latest ping observation for a device, served from the relational tail
#[derive(Debug, Clone, Copy)]
pub struct LatestPing {
    /// Observation time
    pub timestamp: DateTime<Utc>,
    /// Reachability
    pub is_reachable: bool,
    /// Average round-trip, milliseconds
    pub avg_rtt_ms: Option<f64>,
    /// Packet loss, percent
    pub packet_loss_pct: Option<f64>,
}

/// One ping observation to append to the relational tail
#[derive(Debug, Clone, Copy)]
pub struct PingObservation {
    /// Observation time
    pub timestamp: DateTime<Utc>,
    /// Reachability
    pub is_reachable: bool,
    /// Average round-trip, milliseconds
    pub avg_rtt_ms: Option<f64>,
    /// Packet loss, percent
    pub packet_loss_pct: Option<f64>,
}

/// One learned baseline cell for an interface
#[derive(Debug, Clone)]
pub struct BaselineCell {
    /// Owning interface
    pub interface_id: InterfaceId,
    /// Hour of day, 0..=23
    pub hour_of_day: u8,
    /// Day of week, 0=Monday..=6=Sunday
    pub day_of_week: u8,
    /// Mean inbound rate
    pub mean_in_mbps: f64,
    /// Standard deviation of inbound rate
    pub stddev_in_mbps: f64,
    /// Minimum observed
    pub min_in_mbps: f64,
    /// Maximum observed
    pub max_in_mbps: f64,
    /// Samples behind the cell
    pub sample_count: i64,
    /// min(sample_count / 28, 1.0)
    pub confidence: Confidence,
}

/// Cached 24h traffic summary for an interface
#[derive(Debug, Clone, Default)]
pub struct InterfaceSummary {
    /// Average inbound, Mbps
    pub avg_in_mbps: f64,
    /// Average outbound, Mbps
    pub avg_out_mbps: f64,
    /// Peak inbound, Mbps
    pub max_in_mbps: f64,
    /// Peak outbound, Mbps
    pub max_out_mbps: f64,
    /// Total transferred, GB
    pub total_gb: f64,
    /// Inbound errors over the window
    pub in_errors: i64,
    /// Outbound errors over the window
    pub out_errors: i64,
    /// Inbound discards over the window
    pub in_discards: i64,
    /// Outbound discards over the window
    pub out_discards: i64,
}

/// The monitoring profile singleton row
#[derive(Debug, Clone)]
pub struct MonitoringProfile {
    /// Row id
    pub id: String,
    /// Display name
    pub name: String,
    /// Profile mode (feature gate; reserved for forward compatibility)
    pub mode: String,
    /// Active flag; at most one row may carry it
    pub is_active: bool,
}

/// A topology link discovered via LLDP or CDP
#[derive(Debug, Clone)]
pub struct TopologyLink {
    /// Local device
    pub local_device_id: DeviceId,
    /// Local interface, when resolved by ifIndex
    pub local_interface_id: Option<InterfaceId>,
    /// Remote device, when the neighbor matched a known device
    pub remote_device_id: Option<DeviceId>,
    /// Remote interface, when matched
    pub remote_interface_id: Option<InterfaceId>,
    /// Raw neighbor system name
    pub neighbor_name: Option<String>,
    /// Raw neighbor port
    pub neighbor_port: Option<String>,
    /// Which protocol produced the link
    pub protocol: TopologyProtocol,
}

/// Discovery protocol for a topology link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyProtocol {
    /// IEEE 802.1AB
    Lldp,
    /// Cisco Discovery Protocol (fallback)
    Cdp,
}

impl TopologyProtocol {
    /// The stored string form
    #[must_use]
    pub fn as_db(self) -> &'static str {
        match self {
            Self::Lldp => "lldp",
            Self::Cdp => "cdp",
        }
    }
}

/// Alert list filter for the query surface
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    /// Restrict to one device
    pub device_id: Option<DeviceId>,
    /// Restrict to a severity
    pub severity: Option<Severity>,
    /// true = active only, false = resolved only, None = both
    pub active: Option<bool>,
    /// Row cap
    pub limit: Option<usize>,
}

/// Typed access to device rows and the relational ping tail
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Upserts a device keyed on its IP; importing the same set twice yields
    /// identical rows
    async fn upsert_device(&self, device: &NewDevice) -> DatabaseResult<DeviceId>;

    /// Loads one device
    async fn get_device(&self, id: DeviceId) -> DatabaseResult<Option<Device>>;

    /// Loads one device by management address
    async fn get_device_by_ip(&self, ip: IpAddr) -> DatabaseResult<Option<Device>>;

    /// Lists devices with monitoring enabled, ordered by IP for stable
    /// batch slicing
    async fn list_enabled(&self) -> DatabaseResult<Vec<Device>>;

    /// Lists all devices with optional region/branch/type filtering
    async fn list_devices(
        &self,
        region: Option<&str>,
        branch_id: Option<BranchId>,
        device_type: Option<&str>,
    ) -> DatabaseResult<Vec<Device>>;

    /// Persists the reachability state owned by a ping worker transition
    async fn update_state(&self, id: DeviceId, state: &DeviceState) -> DatabaseResult<()>;

    /// Refreshes `last_seen` without touching reachability state
    async fn touch_last_seen(&self, id: DeviceId, at: DateTime<Utc>) -> DatabaseResult<()>;

    /// Deletes a device; interfaces, alerts, and scoped rules cascade
    async fn delete_device(&self, id: DeviceId) -> DatabaseResult<()>;

    /// Appends one status transition to the history table
    async fn record_status_change(
        &self,
        id: DeviceId,
        old_status: DeviceStatus,
        new_status: DeviceStatus,
        changed_at: DateTime<Utc>,
        downtime_secs: Option<i64>,
    ) -> DatabaseResult<()>;

    /// Appends a ping observation to the relational tail
    async fn insert_ping_result(
        &self,
        id: DeviceId,
        ip: IpAddr,
        observation: &PingObservation,
    ) -> DatabaseResult<()>;

    /// Bulk latest-ping lookup by IP set (kills the N+1 on list endpoints)
    async fn latest_ping_bulk(
        &self,
        ips: &[IpAddr],
    ) -> DatabaseResult<HashMap<IpAddr, LatestPing>>;

    /// Ping history for one device over a closed interval
    async fn ping_history(
        &self,
        id: DeviceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DatabaseResult<Vec<LatestPing>>;

    /// Deletes ping rows older than the cutoff; returns rows removed
    async fn prune_ping_results(&self, cutoff: DateTime<Utc>) -> DatabaseResult<u64>;

    /// Deletes status-history rows older than the cutoff; returns rows removed
    async fn prune_status_history(&self, cutoff: DateTime<Utc>) -> DatabaseResult<u64>;
}

/// Typed access to interface rows and their cached summaries
#[async_trait]
pub trait InterfaceStore: Send + Sync {
    /// Upserts an interface on `(device_id, if_index)`, refreshing
    /// `last_seen`; returns the row id
    async fn upsert_interface(
        &self,
        device_id: DeviceId,
        if_index: IfIndex,
        snapshot: &InterfaceSnapshot,
        classification: &InterfaceClassification,
        seen_at: DateTime<Utc>,
    ) -> DatabaseResult<InterfaceId>;

    /// Loads one interface
    async fn get_interface(&self, id: InterfaceId) -> DatabaseResult<Option<Interface>>;

    /// Lists interfaces for a device, ordered by ifIndex
    async fn list_for_device(&self, device_id: DeviceId) -> DatabaseResult<Vec<Interface>>;

    /// Lists every critical, non-loopback interface across devices
    async fn list_critical(&self) -> DatabaseResult<Vec<Interface>>;

    /// Updates oper/admin status from a status-collection cycle
    async fn update_status(
        &self,
        id: InterfaceId,
        admin_status: Option<i64>,
        oper_status: Option<i64>,
        seen_at: DateTime<Utc>,
    ) -> DatabaseResult<()>;

    /// Writes topology resolution results onto the local interface row
    async fn set_neighbor(
        &self,
        id: InterfaceId,
        connected_device: Option<DeviceId>,
        connected_interface: Option<InterfaceId>,
        neighbor_name: Option<&str>,
        neighbor_port: Option<&str>,
    ) -> DatabaseResult<()>;

    /// Upserts the cached 24h summary
    async fn upsert_summary(
        &self,
        id: InterfaceId,
        summary: &InterfaceSummary,
        at: DateTime<Utc>,
    ) -> DatabaseResult<()>;

    /// Reads the cached 24h summary
    async fn get_summary(&self, id: InterfaceId) -> DatabaseResult<Option<InterfaceSummary>>;
}

/// Typed access to alert rules and the alert history
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Conditional insert: creates an active alert unless one already exists
    /// for `(device, rule)`; losing the uniqueness race reports
    /// [`AlertInsertOutcome::AlreadyActive`]
    async fn create_if_absent(&self, alert: &NewAlert) -> DatabaseResult<AlertInsertOutcome>;

    /// Active alerts for one device
    async fn active_for_device(&self, device_id: DeviceId) -> DatabaseResult<Vec<AlertRecord>>;

    /// Active alerts for one device restricted to a rule-name set
    async fn active_by_rules(
        &self,
        device_id: DeviceId,
        rule_names: &[RuleName],
    ) -> DatabaseResult<Vec<AlertRecord>>;

    /// Resolves one alert row
    async fn resolve(&self, id: AlertId, at: DateTime<Utc>) -> DatabaseResult<()>;

    /// Resolves all active alerts for `(device, rule)`; returns rows touched
    async fn resolve_by_rule(
        &self,
        device_id: DeviceId,
        rule_name: &RuleName,
        at: DateTime<Utc>,
    ) -> DatabaseResult<u64>;

    /// Marks an alert acknowledged
    async fn acknowledge(
        &self,
        id: AlertId,
        by: &str,
        at: DateTime<Utc>,
    ) -> DatabaseResult<()>;

    /// Increments the notification counter
    async fn record_notification(&self, id: AlertId) -> DatabaseResult<()>;

    /// Bulk active-alert count by device set (kills the N+1 on list endpoints)
    async fn count_active_bulk(
        &self,
        device_ids: &[DeviceId],
    ) -> DatabaseResult<HashMap<DeviceId, i64>>;

    /// Filtered alert listing for the query surface
    async fn list_alerts(&self, filter: &AlertFilter) -> DatabaseResult<Vec<AlertRecord>>;

    /// Deletes resolved alerts older than the cutoff; returns rows removed
    async fn prune_resolved(&self, cutoff: DateTime<Utc>) -> DatabaseResult<u64>;

    /// Enabled alert rules, for the evaluator and the query surface
    async fn list_enabled_rules(&self) -> DatabaseResult<Vec<AlertRule>>;

    /// Upserts a rule by name
    async fn upsert_rule(&self, rule: &AlertRule) -> DatabaseResult<()>;
}

/// Typed access to learned traffic baselines
#[async_trait]
pub trait BaselineStore: Send + Sync {
    /// Upserts one `(interface, hour, dow)` cell
    async fn upsert_cell(&self, cell: &BaselineCell, at: DateTime<Utc>) -> DatabaseResult<()>;

    /// Reads one cell
    async fn get_cell(
        &self,
        interface_id: InterfaceId,
        hour_of_day: u8,
        day_of_week: u8,
    ) -> DatabaseResult<Option<BaselineCell>>;
}

/// Typed access to the monitoring profile singleton
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// The currently active profile, if any
    async fn active_profile(&self) -> DatabaseResult<Option<MonitoringProfile>>;

    /// Activates one profile, deactivating any other inside one transaction
    async fn activate(&self, id: &str) -> DatabaseResult<()>;

    /// All profiles
    async fn list_profiles(&self) -> DatabaseResult<Vec<MonitoringProfile>>;

    /// Creates a profile row
    async fn create_profile(&self, profile: &MonitoringProfile) -> DatabaseResult<()>;
}

/// Typed access to discovered topology links
#[async_trait]
pub trait TopologyStore: Send + Sync {
    /// Replaces all links for a local device with the latest discovery pass
    async fn replace_links(
        &self,
        local_device_id: DeviceId,
        links: &[TopologyLink],
        discovered_at: DateTime<Utc>,
    ) -> DatabaseResult<()>;

    /// Links for one local device
    async fn links_for_device(&self, local_device_id: DeviceId)
    -> DatabaseResult<Vec<TopologyLink>>;
}
