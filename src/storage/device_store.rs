//! `SQLite` implementation of device storage.
//!
//! Owns the `standalone_devices` row lifecycle, the relational ping tail
//! used for bulk latest-ping lookups, and the status-transition history.
//!
//! ## Ownership
//!
//! Reachability state columns (`down_since`, `is_flapping`, `flap_count`,
//! `flapping_since`, `status_change_times`) are written only through
//! [`DeviceStore::update_state`], and only by the ping worker that observed
//! the transition. Imports and discovery go through `upsert_device`, which
//! never touches those columns, which is what keeps `down_since` stable
//! across re-imports and worker restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::instrument;
use uuid::Uuid;

use crate::database::{
    DatabaseConnection, DatabaseError, DatabaseResult, StorageError, from_epoch, to_epoch,
};
use crate::domain_types::{BranchId, DeviceId, DeviceStatus, TransitionRing};
use crate::storage::{Device, DeviceState, DeviceStore, LatestPing, NewDevice, PingObservation};

const UPSERT_DEVICE: &str = r"
INSERT INTO standalone_devices (
    id, ip, hostname, name, vendor, device_type, branch_id, region,
    tags, custom_fields, enabled, snmp_version, snmp_credential, snmp_port,
    created_at, updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, '[]', '{}', ?9, ?10, ?11, ?12, ?13, ?13)
ON CONFLICT(ip) DO UPDATE SET
    hostname = excluded.hostname,
    name = excluded.name,
    vendor = excluded.vendor,
    device_type = excluded.device_type,
    branch_id = excluded.branch_id,
    region = excluded.region,
    enabled = excluded.enabled,
    snmp_version = excluded.snmp_version,
    snmp_credential = excluded.snmp_credential,
    snmp_port = excluded.snmp_port,
    updated_at = excluded.updated_at
";

const SELECT_DEVICE_COLUMNS: &str = r"
SELECT id, ip, hostname, name, vendor, device_type, branch_id, region,
       tags, custom_fields, enabled, snmp_version, snmp_credential, snmp_port,
       down_since, is_flapping, flap_count, flapping_since, status_change_times,
       last_seen, created_at, updated_at
FROM standalone_devices
";

const UPDATE_STATE: &str = r"
UPDATE standalone_devices
SET down_since = ?2,
    is_flapping = ?3,
    flap_count = ?4,
    flapping_since = ?5,
    status_change_times = ?6,
    last_seen = ?7,
    updated_at = ?7
WHERE id = ?1
";

const INSERT_PING_RESULT: &str = r"
INSERT INTO ping_results (device_id, device_ip, timestamp, is_reachable, avg_rtt_ms, packet_loss_pct)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
";

const INSERT_STATUS_CHANGE: &str = r"
INSERT INTO device_status_history (device_id, old_status, new_status, changed_at, downtime_secs)
VALUES (?1, ?2, ?3, ?4, ?5)
";

/// SQLite-backed implementation of [`DeviceStore`]
pub struct SqliteDeviceStore {
    connection: DatabaseConnection,
}

impl SqliteDeviceStore {
    /// Create a new device store over an initialized connection
    #[must_use]
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    fn map_device(row: &sqlx::sqlite::SqliteRow) -> DatabaseResult<Device> {
        let id_raw: String = row.get("id");
        let id = Uuid::parse_str(&id_raw).map_err(|e| {
            DatabaseError::Storage(StorageError::RowMapping {
                column: "id".to_string(),
                reason: e.to_string(),
            })
        })?;
        let ip_raw: String = row.get("ip");
        let ip: IpAddr = ip_raw.parse().map_err(|_| {
            DatabaseError::Storage(StorageError::RowMapping {
                column: "ip".to_string(),
                reason: format!("not an IP address: {ip_raw}"),
            })
        })?;
        let branch_id = row
            .get::<Option<String>, _>("branch_id")
            .and_then(|raw| Uuid::parse_str(&raw).ok())
            .map(BranchId::new);
        let tags = row
            .get::<Option<String>, _>("tags")
            .and_then(|raw| serde_json::from_str::<Vec<String>>(&raw).ok())
            .unwrap_or_default();
        let custom_fields = row
            .get::<Option<String>, _>("custom_fields")
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(serde_json::Value::Null);
        let ring_raw: Option<String> = row.get("status_change_times");
        let flap_count: i64 = row.get("flap_count");

        let state = DeviceState {
            down_since: row.get::<Option<i64>, _>("down_since").map(from_epoch),
            is_flapping: row.get::<i64, _>("is_flapping") != 0,
            flap_count: usize::try_from(flap_count.max(0)).unwrap_or(0),
            flapping_since: row.get::<Option<i64>, _>("flapping_since").map(from_epoch),
            transitions: TransitionRing::from_json(ring_raw.as_deref()),
        };

        let snmp_port_raw: i64 = row.get("snmp_port");

        Ok(Device {
            id: DeviceId::new(id),
            ip,
            hostname: row.get("hostname"),
            name: row.get("name"),
            vendor: row.get("vendor"),
            device_type: row.get("device_type"),
            branch_id,
            region: row.get("region"),
            tags,
            custom_fields,
            enabled: row.get::<i64, _>("enabled") != 0,
            snmp_version: row.get("snmp_version"),
            snmp_credential: row.get("snmp_credential"),
            snmp_port: u16::try_from(snmp_port_raw).unwrap_or(161),
            state,
            last_seen: row.get::<Option<i64>, _>("last_seen").map(from_epoch),
            created_at: from_epoch(row.get("created_at")),
            updated_at: from_epoch(row.get("updated_at")),
        })
    }

    fn map_ping(row: &sqlx::sqlite::SqliteRow) -> LatestPing {
        LatestPing {
            timestamp: from_epoch(row.get("timestamp")),
            is_reachable: row.get::<i64, _>("is_reachable") != 0,
            avg_rtt_ms: row.get("avg_rtt_ms"),
            packet_loss_pct: row.get("packet_loss_pct"),
        }
    }
}

#[async_trait]
impl DeviceStore for SqliteDeviceStore {
    #[instrument(skip(self, device), fields(ip = %device.ip))]
    async fn upsert_device(&self, device: &NewDevice) -> DatabaseResult<DeviceId> {
        let now = to_epoch(Utc::now());
        sqlx::query(UPSERT_DEVICE)
            .bind(DeviceId::generate().to_string())
            .bind(device.ip.to_string())
            .bind(&device.hostname)
            .bind(&device.name)
            .bind(&device.vendor)
            .bind(&device.device_type)
            .bind(device.branch_id.map(|b| b.to_string()))
            .bind(&device.region)
            .bind(i64::from(device.enabled))
            .bind(&device.snmp_version)
            .bind(&device.snmp_credential)
            .bind(i64::from(device.snmp_port))
            .bind(now)
            .execute(self.connection.pool())
            .await?;

        // The conflict path keeps the original id; read it back by ip.
        let row = sqlx::query("SELECT id FROM standalone_devices WHERE ip = ?1")
            .bind(device.ip.to_string())
            .fetch_one(self.connection.pool())
            .await?;
        let id_raw: String = row.get("id");
        let id = Uuid::parse_str(&id_raw).map_err(|e| {
            DatabaseError::Storage(StorageError::RowMapping {
                column: "id".to_string(),
                reason: e.to_string(),
            })
        })?;
        Ok(DeviceId::new(id))
    }

    async fn get_device(&self, id: DeviceId) -> DatabaseResult<Option<Device>> {
        let row = sqlx::query(&format!("{SELECT_DEVICE_COLUMNS} WHERE id = ?1"))
            .bind(id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.as_ref().map(Self::map_device).transpose()
    }

    async fn get_device_by_ip(&self, ip: IpAddr) -> DatabaseResult<Option<Device>> {
        let row = sqlx::query(&format!("{SELECT_DEVICE_COLUMNS} WHERE ip = ?1"))
            .bind(ip.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.as_ref().map(Self::map_device).transpose()
    }

    async fn list_enabled(&self) -> DatabaseResult<Vec<Device>> {
        let rows = sqlx::query(&format!(
            "{SELECT_DEVICE_COLUMNS} WHERE enabled = 1 ORDER BY ip"
        ))
        .fetch_all(self.connection.pool())
        .await?;
        rows.iter().map(Self::map_device).collect()
    }

    async fn list_devices(
        &self,
        region: Option<&str>,
        branch_id: Option<BranchId>,
        device_type: Option<&str>,
    ) -> DatabaseResult<Vec<Device>> {
        let rows = sqlx::query(&format!(
            "{SELECT_DEVICE_COLUMNS} \
             WHERE (?1 IS NULL OR region = ?1) \
               AND (?2 IS NULL OR branch_id = ?2) \
               AND (?3 IS NULL OR device_type = ?3) \
             ORDER BY name"
        ))
        .bind(region)
        .bind(branch_id.map(|b| b.to_string()))
        .bind(device_type)
        .fetch_all(self.connection.pool())
        .await?;
        rows.iter().map(Self::map_device).collect()
    }

    #[instrument(skip(self, state), fields(device_id = %id))]
    async fn update_state(&self, id: DeviceId, state: &DeviceState) -> DatabaseResult<()> {
        let ring = state.transitions.to_json().map_err(|e| {
            DatabaseError::Storage(StorageError::RowMapping {
                column: "status_change_times".to_string(),
                reason: e.to_string(),
            })
        })?;
        sqlx::query(UPDATE_STATE)
            .bind(id.to_string())
            .bind(state.down_since.map(to_epoch))
            .bind(i64::from(state.is_flapping))
            .bind(i64::try_from(state.flap_count).unwrap_or(i64::MAX))
            .bind(state.flapping_since.map(to_epoch))
            .bind(ring)
            .bind(to_epoch(Utc::now()))
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    async fn touch_last_seen(&self, id: DeviceId, at: DateTime<Utc>) -> DatabaseResult<()> {
        sqlx::query("UPDATE standalone_devices SET last_seen = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(to_epoch(at))
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(device_id = %id))]
    async fn delete_device(&self, id: DeviceId) -> DatabaseResult<()> {
        // Interfaces cascade through the FK; alerts and scoped rules are
        // keyed loosely, so sweep them in the same transaction.
        let mut tx = self.connection.pool().begin().await?;
        sqlx::query("DELETE FROM alert_history WHERE device_id = ?1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM alert_rules WHERE device_id = ?1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM standalone_devices WHERE id = ?1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_status_change(
        &self,
        id: DeviceId,
        old_status: DeviceStatus,
        new_status: DeviceStatus,
        changed_at: DateTime<Utc>,
        downtime_secs: Option<i64>,
    ) -> DatabaseResult<()> {
        sqlx::query(INSERT_STATUS_CHANGE)
            .bind(id.to_string())
            .bind(old_status.to_string())
            .bind(new_status.to_string())
            .bind(to_epoch(changed_at))
            .bind(downtime_secs)
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    async fn insert_ping_result(
        &self,
        id: DeviceId,
        ip: IpAddr,
        observation: &PingObservation,
    ) -> DatabaseResult<()> {
        sqlx::query(INSERT_PING_RESULT)
            .bind(id.to_string())
            .bind(ip.to_string())
            .bind(to_epoch(observation.timestamp))
            .bind(i64::from(observation.is_reachable))
            .bind(observation.avg_rtt_ms)
            .bind(observation.packet_loss_pct)
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    async fn latest_ping_bulk(
        &self,
        ips: &[IpAddr],
    ) -> DatabaseResult<HashMap<IpAddr, LatestPing>> {
        if ips.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = std::iter::repeat("?")
            .take(ips.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT p.device_ip, p.timestamp, p.is_reachable, p.avg_rtt_ms, p.packet_loss_pct \
             FROM ping_results p \
             JOIN (SELECT device_ip, MAX(timestamp) AS max_ts \
                   FROM ping_results WHERE device_ip IN ({placeholders}) \
                   GROUP BY device_ip) latest \
               ON p.device_ip = latest.device_ip AND p.timestamp = latest.max_ts"
        );
        let mut query = sqlx::query(&sql);
        for ip in ips {
            query = query.bind(ip.to_string());
        }
        let rows = query.fetch_all(self.connection.pool()).await?;

        let mut result = HashMap::with_capacity(rows.len());
        for row in &rows {
            let ip_raw: String = row.get("device_ip");
            if let Ok(ip) = ip_raw.parse::<IpAddr>() {
                result.insert(ip, Self::map_ping(row));
            }
        }
        Ok(result)
    }

    async fn ping_history(
        &self,
        id: DeviceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DatabaseResult<Vec<LatestPing>> {
        let rows = sqlx::query(
            "SELECT timestamp, is_reachable, avg_rtt_ms, packet_loss_pct \
             FROM ping_results \
             WHERE device_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3 \
             ORDER BY timestamp",
        )
        .bind(id.to_string())
        .bind(to_epoch(start))
        .bind(to_epoch(end))
        .fetch_all(self.connection.pool())
        .await?;
        Ok(rows.iter().map(Self::map_ping).collect())
    }

    async fn prune_ping_results(&self, cutoff: DateTime<Utc>) -> DatabaseResult<u64> {
        let result = sqlx::query("DELETE FROM ping_results WHERE timestamp < ?1")
            .bind(to_epoch(cutoff))
            .execute(self.connection.pool())
            .await?;
        Ok(result.rows_affected())
    }

    async fn prune_status_history(&self, cutoff: DateTime<Utc>) -> DatabaseResult<u64> {
        let result = sqlx::query("DELETE FROM device_status_history WHERE changed_at < ?1")
            .bind(to_epoch(cutoff))
            .execute(self.connection.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
