//! `SQLite` implementation of interface storage.
//!
//! Interfaces are keyed `(device_id, if_index)`; discovery upserts refresh
//! the IF-MIB snapshot and classification while preserving topology fields,
//! and topology discovery writes the neighbor columns without disturbing
//! the snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::instrument;
use uuid::Uuid;

use crate::database::{
    DatabaseConnection, DatabaseError, DatabaseResult, StorageError, from_epoch, to_epoch,
};
use crate::domain_types::{Confidence, DeviceId, IfIndex, InterfaceId};
use crate::storage::{
    Interface, InterfaceClassification, InterfaceKind, InterfaceSnapshot, InterfaceStore,
    InterfaceSummary,
};

const UPSERT_INTERFACE: &str = r"
INSERT INTO device_interfaces (
    id, device_id, if_index, if_name, if_descr, if_alias, if_type,
    admin_status, oper_status, speed_bps, mtu, phys_address,
    interface_type, isp_provider, is_critical, parser_confidence,
    last_seen, created_at, updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17, ?17)
ON CONFLICT(device_id, if_index) DO UPDATE SET
    if_name = excluded.if_name,
    if_descr = excluded.if_descr,
    if_alias = excluded.if_alias,
    if_type = excluded.if_type,
    admin_status = excluded.admin_status,
    oper_status = excluded.oper_status,
    speed_bps = excluded.speed_bps,
    mtu = excluded.mtu,
    phys_address = excluded.phys_address,
    interface_type = excluded.interface_type,
    isp_provider = excluded.isp_provider,
    is_critical = excluded.is_critical,
    parser_confidence = excluded.parser_confidence,
    last_seen = excluded.last_seen,
    updated_at = excluded.updated_at
";

const SELECT_INTERFACE_COLUMNS: &str = r"
SELECT id, device_id, if_index, if_name, if_descr, if_alias, if_type,
       admin_status, oper_status, speed_bps, mtu, phys_address,
       interface_type, isp_provider, is_critical, parser_confidence,
       connected_to_device_id, connected_to_interface_id,
       lldp_neighbor_name, lldp_neighbor_port, last_seen
FROM device_interfaces
";

const UPSERT_SUMMARY: &str = r"
INSERT INTO interface_metrics_summary (
    interface_id, avg_in_mbps, avg_out_mbps, max_in_mbps, max_out_mbps,
    total_gb, in_errors, out_errors, in_discards, out_discards, updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
ON CONFLICT(interface_id) DO UPDATE SET
    avg_in_mbps = excluded.avg_in_mbps,
    avg_out_mbps = excluded.avg_out_mbps,
    max_in_mbps = excluded.max_in_mbps,
    max_out_mbps = excluded.max_out_mbps,
    total_gb = excluded.total_gb,
    in_errors = excluded.in_errors,
    out_errors = excluded.out_errors,
    in_discards = excluded.in_discards,
    out_discards = excluded.out_discards,
    updated_at = excluded.updated_at
";

/// SQLite-backed implementation of [`InterfaceStore`]
pub struct SqliteInterfaceStore {
    connection: DatabaseConnection,
}

impl SqliteInterfaceStore {
    /// Create a new interface store over an initialized connection
    #[must_use]
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    fn parse_uuid(column: &str, raw: &str) -> DatabaseResult<Uuid> {
        Uuid::parse_str(raw).map_err(|e| {
            DatabaseError::Storage(StorageError::RowMapping {
                column: column.to_string(),
                reason: e.to_string(),
            })
        })
    }

    fn map_interface(row: &sqlx::sqlite::SqliteRow) -> DatabaseResult<Interface> {
        let id = Self::parse_uuid("id", &row.get::<String, _>("id"))?;
        let device_id = Self::parse_uuid("device_id", &row.get::<String, _>("device_id"))?;
        let if_index_raw: i64 = row.get("if_index");

        let snapshot = InterfaceSnapshot {
            if_name: row.get("if_name"),
            if_descr: row.get("if_descr"),
            if_alias: row.get("if_alias"),
            if_type: row.get("if_type"),
            admin_status: row.get("admin_status"),
            oper_status: row.get("oper_status"),
            speed_bps: row.get("speed_bps"),
            mtu: row.get("mtu"),
            phys_address: row.get("phys_address"),
        };

        let classification = InterfaceClassification {
            interface_type: InterfaceKind::from_db(&row.get::<String, _>("interface_type")),
            isp_provider: row.get("isp_provider"),
            is_critical: row.get::<i64, _>("is_critical") != 0,
            confidence: Confidence::clamped(row.get::<f64, _>("parser_confidence")),
        };

        let connected_to_device_id = row
            .get::<Option<String>, _>("connected_to_device_id")
            .and_then(|raw| Uuid::parse_str(&raw).ok())
            .map(DeviceId::new);
        let connected_to_interface_id = row
            .get::<Option<String>, _>("connected_to_interface_id")
            .and_then(|raw| Uuid::parse_str(&raw).ok())
            .map(InterfaceId::new);

        Ok(Interface {
            id: InterfaceId::new(id),
            device_id: DeviceId::new(device_id),
            if_index: IfIndex::new(u32::try_from(if_index_raw.max(0)).unwrap_or(0)),
            snapshot,
            classification,
            connected_to_device_id,
            connected_to_interface_id,
            lldp_neighbor_name: row.get("lldp_neighbor_name"),
            lldp_neighbor_port: row.get("lldp_neighbor_port"),
            last_seen: row.get::<Option<i64>, _>("last_seen").map(from_epoch),
        })
    }

    fn map_summary(row: &sqlx::sqlite::SqliteRow) -> InterfaceSummary {
        InterfaceSummary {
            avg_in_mbps: row.get("avg_in_mbps"),
            avg_out_mbps: row.get("avg_out_mbps"),
            max_in_mbps: row.get("max_in_mbps"),
            max_out_mbps: row.get("max_out_mbps"),
            total_gb: row.get("total_gb"),
            in_errors: row.get("in_errors"),
            out_errors: row.get("out_errors"),
            in_discards: row.get("in_discards"),
            out_discards: row.get("out_discards"),
        }
    }
}

#[async_trait]
impl InterfaceStore for SqliteInterfaceStore {
    #[instrument(skip(self, snapshot, classification), fields(device_id = %device_id, if_index = %if_index))]
    async fn upsert_interface(
        &self,
        device_id: DeviceId,
        if_index: IfIndex,
        snapshot: &InterfaceSnapshot,
        classification: &InterfaceClassification,
        seen_at: DateTime<Utc>,
    ) -> DatabaseResult<InterfaceId> {
        sqlx::query(UPSERT_INTERFACE)
            .bind(InterfaceId::generate().to_string())
            .bind(device_id.to_string())
            .bind(if_index.as_i64())
            .bind(&snapshot.if_name)
            .bind(&snapshot.if_descr)
            .bind(&snapshot.if_alias)
            .bind(snapshot.if_type)
            .bind(snapshot.admin_status)
            .bind(snapshot.oper_status)
            .bind(snapshot.speed_bps)
            .bind(snapshot.mtu)
            .bind(&snapshot.phys_address)
            .bind(classification.interface_type.as_db())
            .bind(&classification.isp_provider)
            .bind(i64::from(classification.is_critical))
            .bind(classification.confidence.as_f64())
            .bind(to_epoch(seen_at))
            .execute(self.connection.pool())
            .await?;

        let row = sqlx::query(
            "SELECT id FROM device_interfaces WHERE device_id = ?1 AND if_index = ?2",
        )
        .bind(device_id.to_string())
        .bind(if_index.as_i64())
        .fetch_one(self.connection.pool())
        .await?;
        let id = Self::parse_uuid("id", &row.get::<String, _>("id"))?;
        Ok(InterfaceId::new(id))
    }

    async fn get_interface(&self, id: InterfaceId) -> DatabaseResult<Option<Interface>> {
        let row = sqlx::query(&format!("{SELECT_INTERFACE_COLUMNS} WHERE id = ?1"))
            .bind(id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.as_ref().map(Self::map_interface).transpose()
    }

    async fn list_for_device(&self, device_id: DeviceId) -> DatabaseResult<Vec<Interface>> {
        let rows = sqlx::query(&format!(
            "{SELECT_INTERFACE_COLUMNS} WHERE device_id = ?1 ORDER BY if_index"
        ))
        .bind(device_id.to_string())
        .fetch_all(self.connection.pool())
        .await?;
        rows.iter().map(Self::map_interface).collect()
    }

    async fn list_critical(&self) -> DatabaseResult<Vec<Interface>> {
        let rows = sqlx::query(&format!(
            "{SELECT_INTERFACE_COLUMNS} \
             WHERE is_critical = 1 AND interface_type != 'loopback' \
             ORDER BY device_id, if_index"
        ))
        .fetch_all(self.connection.pool())
        .await?;
        rows.iter().map(Self::map_interface).collect()
    }

    async fn update_status(
        &self,
        id: InterfaceId,
        admin_status: Option<i64>,
        oper_status: Option<i64>,
        seen_at: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(
            "UPDATE device_interfaces \
             SET admin_status = ?2, oper_status = ?3, last_seen = ?4, updated_at = ?4 \
             WHERE id = ?1",
        )
        .bind(id.to_string())
        .bind(admin_status)
        .bind(oper_status)
        .bind(to_epoch(seen_at))
        .execute(self.connection.pool())
        .await?;
        Ok(())
    }

    async fn set_neighbor(
        &self,
        id: InterfaceId,
        connected_device: Option<DeviceId>,
        connected_interface: Option<InterfaceId>,
        neighbor_name: Option<&str>,
        neighbor_port: Option<&str>,
    ) -> DatabaseResult<()> {
        sqlx::query(
            "UPDATE device_interfaces \
             SET connected_to_device_id = ?2, connected_to_interface_id = ?3, \
                 lldp_neighbor_name = ?4, lldp_neighbor_port = ?5 \
             WHERE id = ?1",
        )
        .bind(id.to_string())
        .bind(connected_device.map(|d| d.to_string()))
        .bind(connected_interface.map(|i| i.to_string()))
        .bind(neighbor_name)
        .bind(neighbor_port)
        .execute(self.connection.pool())
        .await?;
        Ok(())
    }

    async fn upsert_summary(
        &self,
        id: InterfaceId,
        summary: &InterfaceSummary,
        at: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(UPSERT_SUMMARY)
            .bind(id.to_string())
            .bind(summary.avg_in_mbps)
            .bind(summary.avg_out_mbps)
            .bind(summary.max_in_mbps)
            .bind(summary.max_out_mbps)
            .bind(summary.total_gb)
            .bind(summary.in_errors)
            .bind(summary.out_errors)
            .bind(summary.in_discards)
            .bind(summary.out_discards)
            .bind(to_epoch(at))
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    async fn get_summary(&self, id: InterfaceId) -> DatabaseResult<Option<InterfaceSummary>> {
        let row = sqlx::query(
            "SELECT avg_in_mbps, avg_out_mbps, max_in_mbps, max_out_mbps, total_gb, \
                    in_errors, out_errors, in_discards, out_discards \
             FROM interface_metrics_summary WHERE interface_id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(self.connection.pool())
        .await?;
        Ok(row.as_ref().map(Self::map_summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseConfig;
    use crate::storage::{DeviceStore, NewDevice, SqliteDeviceStore};
    use std::net::{IpAddr, Ipv4Addr};
    use tempfile::tempdir;

    async fn stores() -> (tempfile::TempDir, SqliteDeviceStore, SqliteInterfaceStore) {
        let temp_dir = tempdir().expect("temp dir");
        let config =
            DatabaseConfig::for_testing(temp_dir.path().join("interfaces.db")).expect("config");
        let connection = DatabaseConnection::initialize(config)
            .await
            .expect("db init");
        (
            temp_dir,
            SqliteDeviceStore::new(connection.clone()),
            SqliteInterfaceStore::new(connection),
        )
    }

    fn gi0_snapshot() -> InterfaceSnapshot {
        InterfaceSnapshot {
            if_name: Some("Gi0/0".to_string()),
            if_descr: Some("GigabitEthernet0/0".to_string()),
            if_alias: Some("Magti_Internet".to_string()),
            if_type: Some(6),
            admin_status: Some(1),
            oper_status: Some(1),
            speed_bps: Some(1_000_000_000),
            mtu: Some(1500),
            phys_address: Some("00:11:22:33:44:55".to_string()),
        }
    }

    fn isp_classification() -> InterfaceClassification {
        InterfaceClassification {
            interface_type: InterfaceKind::Isp,
            isp_provider: Some("magti".to_string()),
            is_critical: true,
            confidence: Confidence::clamped(0.9),
        }
    }

    #[tokio::test]
    async fn test_should_keep_row_identity_when_rediscovering_interface() {
        let (_guard, devices, interfaces) = stores().await;
        let device_id = devices
            .upsert_device(&NewDevice::bare(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), "r1"))
            .await
            .expect("device");

        let first = interfaces
            .upsert_interface(
                device_id,
                IfIndex::new(1),
                &gi0_snapshot(),
                &isp_classification(),
                Utc::now(),
            )
            .await
            .expect("first upsert");
        let second = interfaces
            .upsert_interface(
                device_id,
                IfIndex::new(1),
                &gi0_snapshot(),
                &isp_classification(),
                Utc::now(),
            )
            .await
            .expect("second upsert");
        assert_eq!(first, second);

        let listed = interfaces
            .list_for_device(device_id)
            .await
            .expect("listing");
        assert_eq!(listed.len(), 1);
        assert_eq!(
            listed[0].classification.interface_type,
            InterfaceKind::Isp
        );
        assert!(listed[0].is_monitored_critical());
    }

    #[tokio::test]
    async fn test_should_exclude_loopbacks_when_listing_critical_interfaces() {
        let (_guard, devices, interfaces) = stores().await;
        let device_id = devices
            .upsert_device(&NewDevice::bare(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 6)), "r2"))
            .await
            .expect("device");

        interfaces
            .upsert_interface(
                device_id,
                IfIndex::new(1),
                &gi0_snapshot(),
                &isp_classification(),
                Utc::now(),
            )
            .await
            .expect("isp interface");
        // A loopback wrongly flagged critical must still be excluded.
        interfaces
            .upsert_interface(
                device_id,
                IfIndex::new(2),
                &InterfaceSnapshot {
                    if_name: Some("Lo0".to_string()),
                    if_type: Some(24),
                    ..InterfaceSnapshot::default()
                },
                &InterfaceClassification {
                    interface_type: InterfaceKind::Loopback,
                    isp_provider: None,
                    is_critical: true,
                    confidence: Confidence::certain(),
                },
                Utc::now(),
            )
            .await
            .expect("loopback interface");

        let critical = interfaces.list_critical().await.expect("critical listing");
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].classification.interface_type, InterfaceKind::Isp);
    }

    #[tokio::test]
    async fn test_should_roundtrip_summary_when_upserting_twice() {
        let (_guard, devices, interfaces) = stores().await;
        let device_id = devices
            .upsert_device(&NewDevice::bare(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), "r3"))
            .await
            .expect("device");
        let if_id = interfaces
            .upsert_interface(
                device_id,
                IfIndex::new(1),
                &gi0_snapshot(),
                &isp_classification(),
                Utc::now(),
            )
            .await
            .expect("interface");

        let summary = InterfaceSummary {
            avg_in_mbps: 120.5,
            max_out_mbps: 410.0,
            total_gb: 88.2,
            in_errors: 3,
            ..InterfaceSummary::default()
        };
        interfaces
            .upsert_summary(if_id, &summary, Utc::now())
            .await
            .expect("first summary");
        interfaces
            .upsert_summary(if_id, &summary, Utc::now())
            .await
            .expect("second summary");

        let loaded = interfaces
            .get_summary(if_id)
            .await
            .expect("load")
            .expect("summary exists");
        assert!((loaded.avg_in_mbps - 120.5).abs() < f64::EPSILON);
        assert_eq!(loaded.in_errors, 3);
    }
}
