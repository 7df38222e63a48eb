//! `SQLite` implementation of topology link storage.
//!
//! Each discovery pass replaces the local device's links wholesale; stale
//! neighbors from previous passes never linger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use crate::database::{DatabaseConnection, DatabaseResult, to_epoch};
use crate::domain_types::{DeviceId, InterfaceId};
use crate::storage::{TopologyLink, TopologyProtocol, TopologyStore};

/// SQLite-backed implementation of [`TopologyStore`]
pub struct SqliteTopologyStore {
    connection: DatabaseConnection,
}

impl SqliteTopologyStore {
    /// Create a new topology store over an initialized connection
    #[must_use]
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl TopologyStore for SqliteTopologyStore {
    async fn replace_links(
        &self,
        local_device_id: DeviceId,
        links: &[TopologyLink],
        discovered_at: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        let mut tx = self.connection.pool().begin().await?;
        sqlx::query("DELETE FROM network_topology WHERE local_device_id = ?1")
            .bind(local_device_id.to_string())
            .execute(&mut *tx)
            .await?;
        for link in links {
            sqlx::query(
                "INSERT INTO network_topology (
                     id, local_device_id, local_interface_id, remote_device_id,
                     remote_interface_id, neighbor_name, neighbor_port, protocol, discovered_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(local_device_id.to_string())
            .bind(link.local_interface_id.map(|i| i.to_string()))
            .bind(link.remote_device_id.map(|d| d.to_string()))
            .bind(link.remote_interface_id.map(|i| i.to_string()))
            .bind(&link.neighbor_name)
            .bind(&link.neighbor_port)
            .bind(link.protocol.as_db())
            .bind(to_epoch(discovered_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn links_for_device(
        &self,
        local_device_id: DeviceId,
    ) -> DatabaseResult<Vec<TopologyLink>> {
        let rows = sqlx::query(
            "SELECT local_interface_id, remote_device_id, remote_interface_id, \
                    neighbor_name, neighbor_port, protocol \
             FROM network_topology WHERE local_device_id = ?1 ORDER BY discovered_at",
        )
        .bind(local_device_id.to_string())
        .fetch_all(self.connection.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| TopologyLink {
                local_device_id,
                local_interface_id: row
                    .get::<Option<String>, _>("local_interface_id")
                    .and_then(|raw| Uuid::parse_str(&raw).ok())
                    .map(InterfaceId::new),
                remote_device_id: row
                    .get::<Option<String>, _>("remote_device_id")
                    .and_then(|raw| Uuid::parse_str(&raw).ok())
                    .map(DeviceId::new),
                remote_interface_id: row
                    .get::<Option<String>, _>("remote_interface_id")
                    .and_then(|raw| Uuid::parse_str(&raw).ok())
                    .map(InterfaceId::new),
                neighbor_name: row.get("neighbor_name"),
                neighbor_port: row.get("neighbor_port"),
                protocol: if row.get::<String, _>("protocol") == "cdp" {
                    TopologyProtocol::Cdp
                } else {
                    TopologyProtocol::Lldp
                },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseConfig;
    use crate::storage::{DeviceStore, NewDevice, SqliteDeviceStore};
    use std::net::{IpAddr, Ipv4Addr};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_should_replace_previous_links_when_rediscovering() {
        let temp_dir = tempdir().expect("temp dir");
        let config =
            DatabaseConfig::for_testing(temp_dir.path().join("topology.db")).expect("config");
        let connection = DatabaseConnection::initialize(config)
            .await
            .expect("db init");
        let devices = SqliteDeviceStore::new(connection.clone());
        let store = SqliteTopologyStore::new(connection);

        let local = devices
            .upsert_device(&NewDevice::bare(IpAddr::V4(Ipv4Addr::new(10, 0, 1, 1)), "sw1"))
            .await
            .expect("device");

        let link = |name: &str| TopologyLink {
            local_device_id: local,
            local_interface_id: None,
            remote_device_id: None,
            remote_interface_id: None,
            neighbor_name: Some(name.to_string()),
            neighbor_port: Some("Gi0/1".to_string()),
            protocol: TopologyProtocol::Lldp,
        };

        store
            .replace_links(local, &[link("old-neighbor")], Utc::now())
            .await
            .expect("first pass");
        store
            .replace_links(local, &[link("new-neighbor"), link("second")], Utc::now())
            .await
            .expect("second pass");

        let links = store.links_for_device(local).await.expect("listing");
        assert_eq!(links.len(), 2);
        assert!(
            links
                .iter()
                .all(|l| l.neighbor_name.as_deref() != Some("old-neighbor"))
        );
    }
}
