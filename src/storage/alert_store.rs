//! `SQLite` implementation of alert rule and alert history storage.
//!
//! The conditional insert is the concurrency-critical operation: a partial
//! unique index on `(device_id, rule_name) WHERE resolved_at IS NULL`
//! guarantees at most one active alert per pair even when evaluators race.
//! The loser of that race observes a uniqueness violation and reports
//! [`AlertInsertOutcome::AlreadyActive`], never an error, so dedup
//! failures bias toward keeping the alert rather than losing it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

use crate::database::{
    DatabaseConnection, DatabaseError, DatabaseResult, StorageError, from_epoch, to_epoch,
};
use crate::domain_types::{AlertId, BranchId, DeviceId, RuleName, Severity};
use crate::storage::{AlertFilter, AlertInsertOutcome, AlertRecord, AlertRule, AlertStore, NewAlert};

const INSERT_ALERT: &str = r"
INSERT INTO alert_history (
    id, device_id, rule_name, severity, message, value, threshold, triggered_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
";

const SELECT_ALERT_COLUMNS: &str = r"
SELECT id, device_id, rule_name, severity, message, value, threshold,
       triggered_at, resolved_at, acknowledged, acknowledged_by, acknowledged_at,
       notifications_sent
FROM alert_history
";

const UPSERT_RULE: &str = r"
INSERT INTO alert_rules (id, name, description, expression, severity, device_id, branch_id, enabled, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
ON CONFLICT(name) DO UPDATE SET
    description = excluded.description,
    expression = excluded.expression,
    severity = excluded.severity,
    device_id = excluded.device_id,
    branch_id = excluded.branch_id,
    enabled = excluded.enabled
";

/// SQLite-backed implementation of [`AlertStore`]
pub struct SqliteAlertStore {
    connection: DatabaseConnection,
}

impl SqliteAlertStore {
    /// Create a new alert store over an initialized connection
    #[must_use]
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    fn map_alert(row: &sqlx::sqlite::SqliteRow) -> DatabaseResult<AlertRecord> {
        let id_raw: String = row.get("id");
        let id = Uuid::parse_str(&id_raw).map_err(|e| {
            DatabaseError::Storage(StorageError::RowMapping {
                column: "id".to_string(),
                reason: e.to_string(),
            })
        })?;
        let device_raw: String = row.get("device_id");
        let device = Uuid::parse_str(&device_raw).map_err(|e| {
            DatabaseError::Storage(StorageError::RowMapping {
                column: "device_id".to_string(),
                reason: e.to_string(),
            })
        })?;
        let rule_name =
            RuleName::try_new(row.get::<String, _>("rule_name")).map_err(|e| {
                DatabaseError::Storage(StorageError::RowMapping {
                    column: "rule_name".to_string(),
                    reason: e.to_string(),
                })
            })?;

        Ok(AlertRecord {
            id: AlertId::new(id),
            device_id: DeviceId::new(device),
            rule_name,
            severity: Severity::from_db(&row.get::<String, _>("severity")),
            message: row.get("message"),
            value: row.get("value"),
            threshold: row.get("threshold"),
            triggered_at: from_epoch(row.get("triggered_at")),
            resolved_at: row.get::<Option<i64>, _>("resolved_at").map(from_epoch),
            acknowledged: row.get::<i64, _>("acknowledged") != 0,
            acknowledged_by: row.get("acknowledged_by"),
            acknowledged_at: row.get::<Option<i64>, _>("acknowledged_at").map(from_epoch),
            notifications_sent: row.get("notifications_sent"),
        })
    }

    fn map_rule(row: &sqlx::sqlite::SqliteRow) -> DatabaseResult<AlertRule> {
        let name = RuleName::try_new(row.get::<String, _>("name")).map_err(|e| {
            DatabaseError::Storage(StorageError::RowMapping {
                column: "name".to_string(),
                reason: e.to_string(),
            })
        })?;
        Ok(AlertRule {
            name,
            description: row.get("description"),
            expression: row.get("expression"),
            severity: Severity::from_db(&row.get::<String, _>("severity")),
            device_id: row
                .get::<Option<String>, _>("device_id")
                .and_then(|raw| Uuid::parse_str(&raw).ok())
                .map(DeviceId::new),
            branch_id: row
                .get::<Option<String>, _>("branch_id")
                .and_then(|raw| Uuid::parse_str(&raw).ok())
                .map(BranchId::new),
            enabled: row.get::<i64, _>("enabled") != 0,
        })
    }
}

#[async_trait]
impl AlertStore for SqliteAlertStore {
    #[instrument(skip(self, alert), fields(device_id = %alert.device_id, rule = %alert.rule_name))]
    async fn create_if_absent(&self, alert: &NewAlert) -> DatabaseResult<AlertInsertOutcome> {
        let id = AlertId::generate();
        let result = sqlx::query(INSERT_ALERT)
            .bind(id.to_string())
            .bind(alert.device_id.to_string())
            .bind(alert.rule_name.as_str())
            .bind(alert.severity.as_db())
            .bind(&alert.message)
            .bind(&alert.value)
            .bind(&alert.threshold)
            .bind(to_epoch(alert.triggered_at))
            .execute(self.connection.pool())
            .await;

        match result {
            Ok(_) => Ok(AlertInsertOutcome::Created(id)),
            Err(e) => {
                let wrapped = DatabaseError::from(e);
                if wrapped.is_unique_violation() {
                    Ok(AlertInsertOutcome::AlreadyActive)
                } else {
                    Err(wrapped)
                }
            }
        }
    }

    async fn active_for_device(&self, device_id: DeviceId) -> DatabaseResult<Vec<AlertRecord>> {
        let rows = sqlx::query(&format!(
            "{SELECT_ALERT_COLUMNS} WHERE device_id = ?1 AND resolved_at IS NULL \
             ORDER BY triggered_at DESC"
        ))
        .bind(device_id.to_string())
        .fetch_all(self.connection.pool())
        .await?;
        rows.iter().map(Self::map_alert).collect()
    }

    async fn active_by_rules(
        &self,
        device_id: DeviceId,
        rule_names: &[RuleName],
    ) -> DatabaseResult<Vec<AlertRecord>> {
        if rule_names.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = std::iter::repeat("?")
            .take(rule_names.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "{SELECT_ALERT_COLUMNS} WHERE device_id = ? AND resolved_at IS NULL \
             AND rule_name IN ({placeholders}) ORDER BY triggered_at DESC"
        );
        let mut query = sqlx::query(&sql).bind(device_id.to_string());
        for name in rule_names {
            query = query.bind(name.as_str());
        }
        let rows = query.fetch_all(self.connection.pool()).await?;
        rows.iter().map(Self::map_alert).collect()
    }

    async fn resolve(&self, id: AlertId, at: DateTime<Utc>) -> DatabaseResult<()> {
        sqlx::query("UPDATE alert_history SET resolved_at = ?2 WHERE id = ?1 AND resolved_at IS NULL")
            .bind(id.to_string())
            .bind(to_epoch(at))
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(device_id = %device_id, rule = %rule_name))]
    async fn resolve_by_rule(
        &self,
        device_id: DeviceId,
        rule_name: &RuleName,
        at: DateTime<Utc>,
    ) -> DatabaseResult<u64> {
        let result = sqlx::query(
            "UPDATE alert_history SET resolved_at = ?3 \
             WHERE device_id = ?1 AND rule_name = ?2 AND resolved_at IS NULL",
        )
        .bind(device_id.to_string())
        .bind(rule_name.as_str())
        .bind(to_epoch(at))
        .execute(self.connection.pool())
        .await?;
        Ok(result.rows_affected())
    }

    async fn acknowledge(&self, id: AlertId, by: &str, at: DateTime<Utc>) -> DatabaseResult<()> {
        sqlx::query(
            "UPDATE alert_history SET acknowledged = 1, acknowledged_by = ?2, acknowledged_at = ?3 \
             WHERE id = ?1",
        )
        .bind(id.to_string())
        .bind(by)
        .bind(to_epoch(at))
        .execute(self.connection.pool())
        .await?;
        Ok(())
    }

    async fn record_notification(&self, id: AlertId) -> DatabaseResult<()> {
        sqlx::query(
            "UPDATE alert_history SET notifications_sent = notifications_sent + 1 WHERE id = ?1",
        )
        .bind(id.to_string())
        .execute(self.connection.pool())
        .await?;
        Ok(())
    }

    async fn count_active_bulk(
        &self,
        device_ids: &[DeviceId],
    ) -> DatabaseResult<HashMap<DeviceId, i64>> {
        if device_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = std::iter::repeat("?")
            .take(device_ids.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT device_id, COUNT(*) AS active_count FROM alert_history \
             WHERE resolved_at IS NULL AND device_id IN ({placeholders}) \
             GROUP BY device_id"
        );
        let mut query = sqlx::query(&sql);
        for id in device_ids {
            query = query.bind(id.to_string());
        }
        let rows = query.fetch_all(self.connection.pool()).await?;

        let mut counts = HashMap::with_capacity(rows.len());
        for row in &rows {
            let raw: String = row.get("device_id");
            if let Ok(id) = Uuid::parse_str(&raw) {
                counts.insert(DeviceId::new(id), row.get::<i64, _>("active_count"));
            }
        }
        Ok(counts)
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> DatabaseResult<Vec<AlertRecord>> {
        let active_clause = match filter.active {
            Some(true) => "AND resolved_at IS NULL",
            Some(false) => "AND resolved_at IS NOT NULL",
            None => "",
        };
        let limit = i64::try_from(filter.limit.unwrap_or(500)).unwrap_or(500);
        let sql = format!(
            "{SELECT_ALERT_COLUMNS} \
             WHERE (?1 IS NULL OR device_id = ?1) \
               AND (?2 IS NULL OR severity = ?2) \
               {active_clause} \
             ORDER BY triggered_at DESC LIMIT ?3"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.device_id.map(|d| d.to_string()))
            .bind(filter.severity.map(Severity::as_db))
            .bind(limit)
            .fetch_all(self.connection.pool())
            .await?;
        rows.iter().map(Self::map_alert).collect()
    }

    async fn prune_resolved(&self, cutoff: DateTime<Utc>) -> DatabaseResult<u64> {
        let result = sqlx::query(
            "DELETE FROM alert_history WHERE resolved_at IS NOT NULL AND resolved_at < ?1",
        )
        .bind(to_epoch(cutoff))
        .execute(self.connection.pool())
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_enabled_rules(&self) -> DatabaseResult<Vec<AlertRule>> {
        let rows = sqlx::query(
            "SELECT name, description, expression, severity, device_id, branch_id, enabled \
             FROM alert_rules WHERE enabled = 1 ORDER BY name",
        )
        .fetch_all(self.connection.pool())
        .await?;
        rows.iter().map(Self::map_rule).collect()
    }

    async fn upsert_rule(&self, rule: &AlertRule) -> DatabaseResult<()> {
        sqlx::query(UPSERT_RULE)
            .bind(Uuid::new_v4().to_string())
            .bind(rule.name.as_str())
            .bind(&rule.description)
            .bind(&rule.expression)
            .bind(rule.severity.as_db())
            .bind(rule.device_id.map(|d| d.to_string()))
            .bind(rule.branch_id.map(|b| b.to_string()))
            .bind(i64::from(rule.enabled))
            .bind(to_epoch(Utc::now()))
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseConfig;
    use tempfile::tempdir;

    async fn store() -> (tempfile::TempDir, SqliteAlertStore) {
        let temp_dir = tempdir().expect("temp dir");
        let config =
            DatabaseConfig::for_testing(temp_dir.path().join("alerts.db")).expect("config");
        let connection = DatabaseConnection::initialize(config)
            .await
            .expect("db init");
        (temp_dir, SqliteAlertStore::new(connection))
    }

    fn unreachable_alert(device_id: DeviceId) -> NewAlert {
        NewAlert {
            device_id,
            rule_name: RuleName::try_new("Device Unreachable").expect("rule name"),
            severity: Severity::Critical,
            message: "Device 10.0.0.1 is unreachable".to_string(),
            value: Some("down".to_string()),
            threshold: None,
            triggered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_should_report_already_active_when_inserting_duplicate_alert() {
        let (_guard, store) = store().await;
        let device_id = DeviceId::generate();

        let first = store
            .create_if_absent(&unreachable_alert(device_id))
            .await
            .expect("first insert");
        assert!(matches!(first, AlertInsertOutcome::Created(_)));

        let second = store
            .create_if_absent(&unreachable_alert(device_id))
            .await
            .expect("second insert");
        assert_eq!(second, AlertInsertOutcome::AlreadyActive);

        let active = store
            .active_for_device(device_id)
            .await
            .expect("active listing");
        assert_eq!(active.len(), 1, "at most one unresolved alert per rule");
    }

    #[tokio::test]
    async fn test_should_allow_new_alert_when_previous_one_is_resolved() {
        let (_guard, store) = store().await;
        let device_id = DeviceId::generate();
        let rule = RuleName::try_new("Device Unreachable").expect("rule name");

        store
            .create_if_absent(&unreachable_alert(device_id))
            .await
            .expect("insert");
        let resolved = store
            .resolve_by_rule(device_id, &rule, Utc::now())
            .await
            .expect("resolve");
        assert_eq!(resolved, 1);

        let outcome = store
            .create_if_absent(&unreachable_alert(device_id))
            .await
            .expect("reinsert after resolution");
        assert!(matches!(outcome, AlertInsertOutcome::Created(_)));
    }

    #[tokio::test]
    async fn test_should_count_active_alerts_per_device_when_bulk_querying() {
        let (_guard, store) = store().await;
        let noisy = DeviceId::generate();
        let quiet = DeviceId::generate();

        store
            .create_if_absent(&unreachable_alert(noisy))
            .await
            .expect("insert unreachable");
        store
            .create_if_absent(&NewAlert {
                rule_name: RuleName::try_new("High Latency").expect("rule name"),
                severity: Severity::Medium,
                ..unreachable_alert(noisy)
            })
            .await
            .expect("insert latency");

        let counts = store
            .count_active_bulk(&[noisy, quiet])
            .await
            .expect("bulk count");
        assert_eq!(counts.get(&noisy), Some(&2));
        assert_eq!(counts.get(&quiet), None);
    }

    #[tokio::test]
    async fn test_should_increment_notification_counter_when_recording_delivery() {
        let (_guard, store) = store().await;
        let device_id = DeviceId::generate();
        let outcome = store
            .create_if_absent(&unreachable_alert(device_id))
            .await
            .expect("insert");
        let AlertInsertOutcome::Created(id) = outcome else {
            panic!("expected creation");
        };

        store.record_notification(id).await.expect("first delivery");
        store
            .record_notification(id)
            .await
            .expect("second delivery");

        let active = store
            .active_for_device(device_id)
            .await
            .expect("active listing");
        assert_eq!(active[0].notifications_sent, 2);
    }

    #[tokio::test]
    async fn test_should_prune_only_resolved_alerts_when_cleaning_up() {
        let (_guard, store) = store().await;
        let device_id = DeviceId::generate();
        let rule = RuleName::try_new("Device Unreachable").expect("rule name");

        let old = NewAlert {
            triggered_at: Utc::now() - chrono::Duration::days(10),
            ..unreachable_alert(device_id)
        };
        store.create_if_absent(&old).await.expect("insert old");
        store
            .resolve_by_rule(device_id, &rule, Utc::now() - chrono::Duration::days(9))
            .await
            .expect("resolve old");
        store
            .create_if_absent(&unreachable_alert(device_id))
            .await
            .expect("insert fresh active");

        let removed = store
            .prune_resolved(Utc::now() - chrono::Duration::days(7))
            .await
            .expect("prune");
        assert_eq!(removed, 1);

        let remaining = store
            .active_for_device(device_id)
            .await
            .expect("active listing");
        assert_eq!(remaining.len(), 1, "active alerts survive cleanup");
    }
}
