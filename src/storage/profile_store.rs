//! `SQLite` implementation of the monitoring profile singleton.
//!
//! At most one profile row may carry `is_active = 1`; the partial unique
//! index enforces it and [`ProfileStore::activate`] swaps the flag inside a
//! transaction so the constraint is never transiently violated.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use crate::database::{DatabaseConnection, DatabaseResult, to_epoch};
use crate::storage::{MonitoringProfile, ProfileStore};

/// SQLite-backed implementation of [`ProfileStore`]
pub struct SqliteProfileStore {
    connection: DatabaseConnection,
}

impl SqliteProfileStore {
    /// Create a new profile store over an initialized connection
    #[must_use]
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    fn map_profile(row: &sqlx::sqlite::SqliteRow) -> MonitoringProfile {
        MonitoringProfile {
            id: row.get("id"),
            name: row.get("name"),
            mode: row.get("mode"),
            is_active: row.get::<i64, _>("is_active") != 0,
        }
    }
}

#[async_trait]
impl ProfileStore for SqliteProfileStore {
    async fn active_profile(&self) -> DatabaseResult<Option<MonitoringProfile>> {
        let row = sqlx::query(
            "SELECT id, name, mode, is_active FROM monitoring_profiles WHERE is_active = 1",
        )
        .fetch_optional(self.connection.pool())
        .await?;
        Ok(row.as_ref().map(Self::map_profile))
    }

    async fn activate(&self, id: &str) -> DatabaseResult<()> {
        let mut tx = self.connection.pool().begin().await?;
        sqlx::query("UPDATE monitoring_profiles SET is_active = 0 WHERE is_active = 1")
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE monitoring_profiles SET is_active = 1 WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_profiles(&self) -> DatabaseResult<Vec<MonitoringProfile>> {
        let rows =
            sqlx::query("SELECT id, name, mode, is_active FROM monitoring_profiles ORDER BY name")
                .fetch_all(self.connection.pool())
                .await?;
        Ok(rows.iter().map(Self::map_profile).collect())
    }

    async fn create_profile(&self, profile: &MonitoringProfile) -> DatabaseResult<()> {
        sqlx::query(
            "INSERT INTO monitoring_profiles (id, name, mode, is_active, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&profile.id)
        .bind(&profile.name)
        .bind(&profile.mode)
        .bind(i64::from(profile.is_active))
        .bind(to_epoch(Utc::now()))
        .execute(self.connection.pool())
        .await?;
        Ok(())
    }
}
