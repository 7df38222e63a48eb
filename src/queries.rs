//! Backing operations for the external query surface
//!
//! The HTTP layer is an external collaborator; these are the typed
//! operations it calls. List paths are built on the bulk lookups so a page
//! of 500 devices costs three queries, not a thousand, and hot results sit
//! in the short-TTL cache until a status change invalidates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::cache::{
    NS_ALERTS, NS_DEVICE_HISTORY, NS_DEVICE_LIST, NS_PROFILE, NS_RULES, TTL_ALERTS,
    TTL_DEVICE_HISTORY, TTL_DEVICE_LIST, TTL_PROFILE, TTL_RULES, TtlCache,
};
use crate::database::DatabaseConnection;
use crate::domain_types::{AlertId, BranchId, DeviceId, DeviceStatus, Severity};
use crate::error::MonitorResult;
use crate::storage::{
    AlertFilter, AlertRecord, AlertStore, Device, DeviceStore, InterfaceStore, LatestPing,
    MonitoringProfile, ProfileStore,
};
use crate::time_provider::SharedTimeProvider;
use crate::timeseries::{Timeseries, step_for_range};

/// One row of the device list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceListEntry {
    /// Device id
    pub id: DeviceId,
    /// Display name
    pub name: String,
    /// Management address
    pub ip: IpAddr,
    /// Region
    pub region: Option<String>,
    /// Branch
    pub branch_id: Option<BranchId>,
    /// Device type hint
    pub device_type: Option<String>,
    /// Status derived from the latest ping (falling back to the row state)
    pub status: DeviceStatus,
    /// Outage start, when down
    pub down_since: Option<DateTime<Utc>>,
    /// Flap suppression flag
    pub is_flapping: bool,
    /// Latest round-trip, milliseconds
    pub avg_rtt_ms: Option<f64>,
    /// Unresolved alerts on the device
    pub active_alerts: i64,
}

/// Full device view
#[derive(Debug, Clone)]
pub struct DeviceDetail {
    /// The device row
    pub device: Device,
    /// Latest ping observation
    pub latest_ping: Option<LatestPing>,
    /// Unresolved alerts
    pub active_alerts: Vec<AlertRecord>,
    /// Recent observations, newest last
    pub recent_history: Vec<HistoryPoint>,
}

/// One point of a device history series
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HistoryPoint {
    /// Observation time
    pub ts: DateTime<Utc>,
    /// Reachability
    pub is_reachable: bool,
    /// Round-trip, when one was measured
    pub rtt_ms: Option<f64>,
}

/// Component health report
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthReport {
    /// The relational store answers
    pub relational_ok: bool,
    /// The time-series store answers
    pub timeseries_ok: bool,
}

impl HealthReport {
    /// Overall liveness: the engine can do useful work
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.relational_ok
    }
}

/// The query service
pub struct QueryService {
    devices: Arc<dyn DeviceStore>,
    interfaces: Arc<dyn InterfaceStore>,
    alerts: Arc<dyn AlertStore>,
    profiles: Arc<dyn ProfileStore>,
    timeseries: Arc<dyn Timeseries>,
    database: DatabaseConnection,
    cache: Arc<TtlCache>,
    clock: SharedTimeProvider,
}

impl QueryService {
    /// Wires the service to its stores
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        interfaces: Arc<dyn InterfaceStore>,
        alerts: Arc<dyn AlertStore>,
        profiles: Arc<dyn ProfileStore>,
        timeseries: Arc<dyn Timeseries>,
        database: DatabaseConnection,
        cache: Arc<TtlCache>,
        clock: SharedTimeProvider,
    ) -> Self {
        Self {
            devices,
            interfaces,
            alerts,
            profiles,
            timeseries,
            database,
            cache,
            clock,
        }
    }

    /// Lists devices with status, latest ping, and active-alert counts
    ///
    /// # Errors
    ///
    /// Returns an error when the relational store fails.
    #[instrument(skip(self))]
    pub async fn list_devices(
        &self,
        region: Option<&str>,
        branch_id: Option<BranchId>,
        device_type: Option<&str>,
    ) -> MonitorResult<Vec<DeviceListEntry>> {
        let cache_key = format!(
            "list:{}:{}:{}",
            region.unwrap_or("*"),
            branch_id.map_or_else(|| "*".to_string(), |b| b.to_string()),
            device_type.unwrap_or("*"),
        );
        if let Some(cached) = self.cache.get::<Vec<DeviceListEntry>>(NS_DEVICE_LIST, &cache_key) {
            return Ok(cached);
        }

        let devices = self
            .devices
            .list_devices(region, branch_id, device_type)
            .await?;
        let ips: Vec<IpAddr> = devices.iter().map(|d| d.ip).collect();
        let ids: Vec<DeviceId> = devices.iter().map(|d| d.id).collect();

        // Two bulk lookups replace the per-device N+1.
        let pings = self.devices.latest_ping_bulk(&ips).await?;
        let alert_counts = self.alerts.count_active_bulk(&ids).await?;

        let entries: Vec<DeviceListEntry> = devices
            .into_iter()
            .map(|device| {
                let latest = pings.get(&device.ip);
                let status = latest.map_or(device.state.status(), |p| {
                    if p.is_reachable {
                        DeviceStatus::Up
                    } else {
                        DeviceStatus::Down
                    }
                });
                DeviceListEntry {
                    status,
                    down_since: device.state.down_since,
                    is_flapping: device.state.is_flapping,
                    avg_rtt_ms: latest.and_then(|p| p.avg_rtt_ms),
                    active_alerts: alert_counts.get(&device.id).copied().unwrap_or(0),
                    id: device.id,
                    name: device.name,
                    ip: device.ip,
                    region: device.region,
                    branch_id: device.branch_id,
                    device_type: device.device_type,
                }
            })
            .collect();

        self.cache
            .put(NS_DEVICE_LIST, &cache_key, &entries, TTL_DEVICE_LIST);
        Ok(entries)
    }

    /// Full detail for one device
    ///
    /// # Errors
    ///
    /// Returns an error when the relational store fails.
    pub async fn device_detail(&self, id: DeviceId) -> MonitorResult<Option<DeviceDetail>> {
        let Some(device) = self.devices.get_device(id).await? else {
            return Ok(None);
        };
        let latest_ping = self
            .devices
            .latest_ping_bulk(&[device.ip])
            .await?
            .remove(&device.ip);
        let active_alerts = self.alerts.active_for_device(id).await?;

        let now = self.clock.now_utc();
        let recent_history = self
            .device_history(id, now - chrono::Duration::hours(24), now)
            .await
            .unwrap_or_default();

        Ok(Some(DeviceDetail {
            device,
            latest_ping,
            active_alerts,
            recent_history,
        }))
    }

    /// Ping status and RTT history over a range, honoring the step policy
    /// (≤24h → 5m, ≤7d → 15m, else 1h)
    ///
    /// # Errors
    ///
    /// Returns an error when both the time-series store and the relational
    /// fallback fail.
    pub async fn device_history(
        &self,
        id: DeviceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MonitorResult<Vec<HistoryPoint>> {
        let cache_key = format!("{id}:{}:{}", start.timestamp(), end.timestamp());
        if let Some(cached) = self.cache.get::<Vec<HistoryPoint>>(NS_DEVICE_HISTORY, &cache_key) {
            return Ok(cached);
        }

        let range = (end - start).to_std().unwrap_or_default();
        let step = step_for_range(range);
        let status_expr = format!("ping_status{{device_id=\"{id}\"}}");
        let rtt_expr = format!("ping_rtt_ms{{device_id=\"{id}\"}}");

        let points = match self
            .timeseries
            .query_range(&status_expr, start, end, step)
            .await
        {
            Ok(status_series) => {
                let rtt_series = self
                    .timeseries
                    .query_range(&rtt_expr, start, end, step)
                    .await
                    .unwrap_or_default();
                let rtt_by_ts: std::collections::HashMap<i64, f64> = rtt_series
                    .into_iter()
                    .flat_map(|s| s.points)
                    .collect();

                status_series
                    .into_iter()
                    .flat_map(|s| s.points)
                    .map(|(epoch, status)| HistoryPoint {
                        ts: crate::database::from_epoch(epoch),
                        is_reachable: status > 0.5,
                        rtt_ms: rtt_by_ts.get(&epoch).copied(),
                    })
                    .collect()
            }
            Err(e) => {
                // The relational tail holds enough for short windows.
                debug!(error = %e, "history served from the relational tail");
                self.devices
                    .ping_history(id, start, end)
                    .await?
                    .into_iter()
                    .map(|p| HistoryPoint {
                        ts: p.timestamp,
                        is_reachable: p.is_reachable,
                        rtt_ms: p.avg_rtt_ms,
                    })
                    .collect()
            }
        };

        self.cache
            .put(NS_DEVICE_HISTORY, &cache_key, &points, TTL_DEVICE_HISTORY);
        Ok(points)
    }

    /// Filtered alert listing (cached for 30s per filter)
    ///
    /// # Errors
    ///
    /// Returns an error when the relational store fails.
    pub async fn list_alerts(&self, filter: &AlertFilter) -> MonitorResult<Vec<AlertRecord>> {
        let cache_key = format!(
            "{}:{}:{}:{}",
            filter.device_id.map_or_else(|| "*".to_string(), |d| d.to_string()),
            filter.severity.map_or("*", Severity::as_db),
            filter.active.map_or("*", |a| if a { "active" } else { "resolved" }),
            filter.limit.unwrap_or(500),
        );
        if let Some(cached) = self.cache.get::<Vec<AlertRecord>>(NS_ALERTS, &cache_key) {
            return Ok(cached);
        }
        let alerts = self.alerts.list_alerts(filter).await?;
        self.cache.put(NS_ALERTS, &cache_key, &alerts, TTL_ALERTS);
        Ok(alerts)
    }

    /// Active alerts, synthesized from down devices when the alert table is
    /// unavailable (the realtime fallback path)
    pub async fn active_alerts_or_fallback(&self) -> Vec<AlertRecord> {
        match self
            .alerts
            .list_alerts(&AlertFilter {
                active: Some(true),
                ..AlertFilter::default()
            })
            .await
        {
            Ok(alerts) => alerts,
            Err(e) => {
                warn!(error = %e, "alert listing failed; synthesizing from down devices");
                self.synthesize_from_down_devices().await
            }
        }
    }

    async fn synthesize_from_down_devices(&self) -> Vec<AlertRecord> {
        let Ok(devices) = self.devices.list_enabled().await else {
            return Vec::new();
        };
        devices
            .into_iter()
            .filter_map(|device| {
                let down_since = device.state.down_since?;
                Some(AlertRecord {
                    id: AlertId::generate(),
                    device_id: device.id,
                    rule_name: crate::domain_types::RuleName::try_new(
                        crate::alerts::RULE_DEVICE_UNREACHABLE,
                    )
                    .expect("built-in rule name"),
                    severity: crate::domain_types::Severity::Critical,
                    message: format!("Device {} ({}) is unreachable", device.name, device.ip),
                    value: Some("down".to_string()),
                    threshold: None,
                    triggered_at: down_since,
                    resolved_at: None,
                    acknowledged: false,
                    acknowledged_by: None,
                    acknowledged_at: None,
                    notifications_sent: 0,
                })
            })
            .collect()
    }

    /// Acknowledges an alert
    ///
    /// # Errors
    ///
    /// Returns an error when the relational store fails.
    pub async fn acknowledge_alert(&self, id: AlertId, by: &str) -> MonitorResult<()> {
        self.alerts
            .acknowledge(id, by, self.clock.now_utc())
            .await?;
        self.cache.invalidate_namespace(NS_ALERTS);
        Ok(())
    }

    /// Manually resolves an alert
    ///
    /// # Errors
    ///
    /// Returns an error when the relational store fails.
    pub async fn resolve_alert(&self, id: AlertId) -> MonitorResult<()> {
        self.alerts.resolve(id, self.clock.now_utc()).await?;
        self.cache.invalidate_namespace(NS_ALERTS);
        Ok(())
    }

    /// Enabled alert rules (cached)
    ///
    /// # Errors
    ///
    /// Returns an error when the relational store fails.
    pub async fn alert_rules(&self) -> MonitorResult<Vec<crate::storage::AlertRule>> {
        // Rules change rarely; 60s of staleness is acceptable for the UI.
        if let Some(cached) = self
            .cache
            .get::<Vec<crate::storage::AlertRule>>(NS_RULES, "enabled")
        {
            return Ok(cached);
        }
        let rules = self.alerts.list_enabled_rules().await?;
        self.cache.put(NS_RULES, "enabled", &rules, TTL_RULES);
        Ok(rules)
    }

    /// The active monitoring profile (cached)
    ///
    /// # Errors
    ///
    /// Returns an error when the relational store fails.
    pub async fn active_profile(&self) -> MonitorResult<Option<MonitoringProfile>> {
        if let Some(cached) = self.cache.get::<Option<CachedProfile>>(NS_PROFILE, "active") {
            return Ok(cached.map(CachedProfile::into_profile));
        }
        let profile = self.profiles.active_profile().await?;
        self.cache.put(
            NS_PROFILE,
            "active",
            &profile.as_ref().map(CachedProfile::from_profile),
            TTL_PROFILE,
        );
        Ok(profile)
    }

    /// Activates a monitoring profile
    ///
    /// # Errors
    ///
    /// Returns an error when the relational store fails.
    pub async fn activate_profile(&self, id: &str) -> MonitorResult<()> {
        self.profiles.activate(id).await?;
        self.cache.invalidate(NS_PROFILE, "active");
        Ok(())
    }

    /// Interfaces for one device
    ///
    /// # Errors
    ///
    /// Returns an error when the relational store fails.
    pub async fn device_interfaces(
        &self,
        id: DeviceId,
    ) -> MonitorResult<Vec<crate::storage::Interface>> {
        Ok(self.interfaces.list_for_device(id).await?)
    }

    /// Liveness plus component checks
    pub async fn health(&self) -> HealthReport {
        let relational_ok = self.database.test_connection().await.is_ok();
        let timeseries_ok = self.timeseries.health_check().await;
        HealthReport {
            relational_ok,
            timeseries_ok,
        }
    }
}

/// Serializable mirror of the profile row for the cache
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedProfile {
    id: String,
    name: String,
    mode: String,
    is_active: bool,
}

impl CachedProfile {
    fn from_profile(profile: &MonitoringProfile) -> Self {
        Self {
            id: profile.id.clone(),
            name: profile.name.clone(),
            mode: profile.mode.clone(),
            is_active: profile.is_active,
        }
    }

    fn into_profile(self) -> MonitoringProfile {
        MonitoringProfile {
            id: self.id,
            name: self.name,
            mode: self.mode,
            is_active: self.is_active,
        }
    }
}
