//! `SQLite` implementation of baseline cell storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use crate::database::{DatabaseConnection, DatabaseResult, to_epoch};
use crate::domain_types::{Confidence, InterfaceId};
use crate::storage::{BaselineCell, BaselineStore};

const UPSERT_CELL: &str = r"
INSERT INTO interface_baselines (
    id, interface_id, hour_of_day, day_of_week, mean_in_mbps, stddev_in_mbps,
    min_in_mbps, max_in_mbps, sample_count, confidence, updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
ON CONFLICT(interface_id, hour_of_day, day_of_week) DO UPDATE SET
    mean_in_mbps = excluded.mean_in_mbps,
    stddev_in_mbps = excluded.stddev_in_mbps,
    min_in_mbps = excluded.min_in_mbps,
    max_in_mbps = excluded.max_in_mbps,
    sample_count = excluded.sample_count,
    confidence = excluded.confidence,
    updated_at = excluded.updated_at
";

/// SQLite-backed implementation of [`BaselineStore`]
pub struct SqliteBaselineStore {
    connection: DatabaseConnection,
}

impl SqliteBaselineStore {
    /// Create a new baseline store over an initialized connection
    #[must_use]
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl BaselineStore for SqliteBaselineStore {
    async fn upsert_cell(&self, cell: &BaselineCell, at: DateTime<Utc>) -> DatabaseResult<()> {
        sqlx::query(UPSERT_CELL)
            .bind(Uuid::new_v4().to_string())
            .bind(cell.interface_id.to_string())
            .bind(i64::from(cell.hour_of_day))
            .bind(i64::from(cell.day_of_week))
            .bind(cell.mean_in_mbps)
            .bind(cell.stddev_in_mbps)
            .bind(cell.min_in_mbps)
            .bind(cell.max_in_mbps)
            .bind(cell.sample_count)
            .bind(cell.confidence.as_f64())
            .bind(to_epoch(at))
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    async fn get_cell(
        &self,
        interface_id: InterfaceId,
        hour_of_day: u8,
        day_of_week: u8,
    ) -> DatabaseResult<Option<BaselineCell>> {
        let row = sqlx::query(
            "SELECT mean_in_mbps, stddev_in_mbps, min_in_mbps, max_in_mbps, \
                    sample_count, confidence \
             FROM interface_baselines \
             WHERE interface_id = ?1 AND hour_of_day = ?2 AND day_of_week = ?3",
        )
        .bind(interface_id.to_string())
        .bind(i64::from(hour_of_day))
        .bind(i64::from(day_of_week))
        .fetch_optional(self.connection.pool())
        .await?;

        Ok(row.map(|row| BaselineCell {
            interface_id,
            hour_of_day,
            day_of_week,
            mean_in_mbps: row.get("mean_in_mbps"),
            stddev_in_mbps: row.get("stddev_in_mbps"),
            min_in_mbps: row.get("min_in_mbps"),
            max_in_mbps: row.get("max_in_mbps"),
            sample_count: row.get("sample_count"),
            confidence: Confidence::clamped(row.get::<f64, _>("confidence")),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseConfig;
    use crate::domain_types::{DeviceId, IfIndex};
    use crate::storage::{
        DeviceStore, InterfaceClassification, InterfaceSnapshot, InterfaceStore, NewDevice,
        SqliteDeviceStore, SqliteInterfaceStore,
    };
    use std::net::{IpAddr, Ipv4Addr};
    use tempfile::tempdir;

    async fn interface_fixture() -> (tempfile::TempDir, SqliteBaselineStore, InterfaceId) {
        let temp_dir = tempdir().expect("temp dir");
        let config =
            DatabaseConfig::for_testing(temp_dir.path().join("baselines.db")).expect("config");
        let connection = DatabaseConnection::initialize(config)
            .await
            .expect("db init");
        let devices = SqliteDeviceStore::new(connection.clone());
        let interfaces = SqliteInterfaceStore::new(connection.clone());
        let device_id: DeviceId = devices
            .upsert_device(&NewDevice::bare(IpAddr::V4(Ipv4Addr::new(10, 9, 0, 5)), "r1"))
            .await
            .expect("device");
        let interface_id = interfaces
            .upsert_interface(
                device_id,
                IfIndex::new(1),
                &InterfaceSnapshot::default(),
                &InterfaceClassification::default(),
                Utc::now(),
            )
            .await
            .expect("interface");
        (temp_dir, SqliteBaselineStore::new(connection), interface_id)
    }

    #[tokio::test]
    async fn test_should_overwrite_cell_when_upserting_same_slot_twice() {
        let (_guard, store, interface_id) = interface_fixture().await;
        let mut cell = BaselineCell {
            interface_id,
            hour_of_day: 9,
            day_of_week: 1,
            mean_in_mbps: 100.0,
            stddev_in_mbps: 12.0,
            min_in_mbps: 40.0,
            max_in_mbps: 180.0,
            sample_count: 14,
            confidence: Confidence::clamped(0.5),
        };
        store.upsert_cell(&cell, Utc::now()).await.expect("first");

        cell.mean_in_mbps = 130.0;
        cell.sample_count = 28;
        cell.confidence = Confidence::certain();
        store.upsert_cell(&cell, Utc::now()).await.expect("second");

        let loaded = store
            .get_cell(interface_id, 9, 1)
            .await
            .expect("load")
            .expect("cell exists");
        assert!((loaded.mean_in_mbps - 130.0).abs() < f64::EPSILON);
        assert_eq!(loaded.sample_count, 28);
    }

    #[tokio::test]
    async fn test_should_return_none_when_cell_is_unlearned() {
        let (_guard, store, interface_id) = interface_fixture().await;
        let missing = store.get_cell(interface_id, 3, 6).await.expect("load");
        assert!(missing.is_none());
    }
}
