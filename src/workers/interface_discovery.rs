//! Interface discovery worker
//!
//! Walks the IF-MIB columns for each device in a batch, merges the rows
//! into one snapshot per `ifIndex`, classifies each interface, and upserts
//! the result. `last_seen` refreshes on every walk that sees the index, so
//! the interface inventory mirrors the most recent successful walk.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain_types::{DeviceId, IfIndex};
use crate::interface_parser::parser;
use crate::probe::oids;
use crate::probe::snmp::table_index;
use crate::probe::{ProbeError, SnmpClient, SnmpTarget, SnmpValue};
use crate::storage::{Device, DeviceStore, InterfaceSnapshot, InterfaceStore};
use crate::time_provider::SharedTimeProvider;
use crate::workers::SnmpAccess;

/// Devices walked concurrently per batch
const BATCH_CONCURRENCY: usize = 8;

/// Counters from one discovery batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoverySummary {
    /// Devices walked successfully
    pub devices: usize,
    /// Interface rows upserted
    pub interfaces: usize,
    /// Devices skipped on error
    pub errors: usize,
}

/// The interface discovery worker
pub struct InterfaceDiscoveryWorker {
    devices: Arc<dyn DeviceStore>,
    interfaces: Arc<dyn InterfaceStore>,
    snmp: Arc<dyn SnmpClient>,
    access: SnmpAccess,
    clock: SharedTimeProvider,
}

impl InterfaceDiscoveryWorker {
    /// Wires the worker to its collaborators
    #[must_use]
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        interfaces: Arc<dyn InterfaceStore>,
        snmp: Arc<dyn SnmpClient>,
        access: SnmpAccess,
        clock: SharedTimeProvider,
    ) -> Self {
        Self {
            devices,
            interfaces,
            snmp,
            access,
            clock,
        }
    }

    /// Processes one batch of devices
    pub async fn run_batch(&self, batch: &[DeviceId]) -> DiscoverySummary {
        let mut summary = DiscoverySummary::default();

        let results = stream::iter(batch.iter().copied())
            .map(|id| self.discover_device(id))
            .buffer_unordered(BATCH_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        for result in results {
            match result {
                Ok(Some(count)) => {
                    summary.devices += 1;
                    summary.interfaces += count;
                }
                Ok(None) => {}
                Err(e) => {
                    summary.errors += 1;
                    debug!(error = %e, "device skipped this discovery cycle");
                }
            }
        }

        info!(
            devices = summary.devices,
            interfaces = summary.interfaces,
            errors = summary.errors,
            "interface discovery batch finished"
        );
        summary
    }

    async fn discover_device(&self, id: DeviceId) -> Result<Option<usize>, ProbeError> {
        let device = match self.devices.get_device(id).await {
            Ok(Some(device)) if device.enabled => device,
            Ok(_) => return Ok(None),
            Err(e) => {
                warn!(device_id = %id, error = %e, "device load failed before discovery");
                return Ok(None);
            }
        };

        let target = self.access.target_for(&device)?;
        let snapshots = self.walk_if_mib(&target).await?;
        let seen_at = self.clock.now_utc();
        let count = self.persist(&device, snapshots, seen_at).await;
        Ok(Some(count))
    }

    /// Walks every IF-MIB column and merges rows per ifIndex
    async fn walk_if_mib(
        &self,
        target: &SnmpTarget,
    ) -> Result<BTreeMap<u32, InterfaceSnapshot>, ProbeError> {
        let mut snapshots: BTreeMap<u32, InterfaceSnapshot> = BTreeMap::new();

        // ifDescr anchors the walk: a device that cannot answer it has no
        // usable interface table at all.
        let descr_rows = self.snmp.walk(target, oids::IF_DESCR).await?;
        for (dotted, value) in descr_rows {
            if let Some(index) = table_index(&dotted, oids::IF_DESCR) {
                snapshots.entry(index).or_default().if_descr = value.as_text();
            }
        }

        let mut apply =
            |rows: Vec<(String, SnmpValue)>,
             base: &'static [u64],
             set: &mut dyn FnMut(&mut InterfaceSnapshot, SnmpValue)| {
                for (dotted, value) in rows {
                    if let Some(index) = table_index(&dotted, base) {
                        if let Some(snapshot) = snapshots.get_mut(&index) {
                            set(snapshot, value);
                        }
                    }
                }
            };

        // The remaining columns enrich the anchored rows; a failing column
        // degrades the snapshot instead of aborting the device.
        for (base, set) in column_setters() {
            match self.snmp.walk(target, base).await {
                Ok(rows) => apply(rows, base, &mut { set }),
                Err(e) => debug!(ip = %target.ip, error = %e, "IF-MIB column walk failed"),
            }
        }

        Ok(snapshots)
    }

    async fn persist(
        &self,
        device: &Device,
        snapshots: BTreeMap<u32, InterfaceSnapshot>,
        seen_at: DateTime<Utc>,
    ) -> usize {
        let mut upserted = 0usize;
        for (index, snapshot) in snapshots {
            let classification = parser().classify(&snapshot);
            match self
                .interfaces
                .upsert_interface(
                    device.id,
                    IfIndex::new(index),
                    &snapshot,
                    &classification,
                    seen_at,
                )
                .await
            {
                Ok(_) => upserted += 1,
                Err(e) => {
                    warn!(device_ip = %device.ip, if_index = index, error = %e, "interface upsert failed");
                }
            }
        }
        upserted
    }
}

type ColumnSetter = fn(&mut InterfaceSnapshot, SnmpValue);

/// Column table for the enrichment walks
fn column_setters() -> Vec<(&'static [u64], ColumnSetter)> {
    vec![
        (oids::IF_NAME, |s, v| s.if_name = v.as_text()),
        (oids::IF_ALIAS, |s, v| s.if_alias = v.as_text()),
        (oids::IF_TYPE, |s, v| s.if_type = v.as_i64()),
        (oids::IF_MTU, |s, v| s.mtu = v.as_i64()),
        (oids::IF_ADMIN_STATUS, |s, v| s.admin_status = v.as_i64()),
        (oids::IF_OPER_STATUS, |s, v| s.oper_status = v.as_i64()),
        (oids::IF_PHYS_ADDRESS, |s, v| s.phys_address = v.as_mac()),
        (oids::IF_SPEED, |s, v| {
            if s.speed_bps.is_none() {
                s.speed_bps = v.as_i64();
            }
        }),
        (oids::IF_HIGH_SPEED, |s, v| {
            // ifHighSpeed reports Mbps and wins over the saturating 32-bit
            // ifSpeed on fast links.
            if let Some(mbps) = v.as_i64().filter(|mbps| *mbps > 0) {
                s.speed_bps = Some(mbps.saturating_mul(1_000_000));
            }
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_prefer_if_high_speed_over_saturated_if_speed() {
        let mut snapshot = InterfaceSnapshot::default();
        for (base, set) in column_setters() {
            if base == oids::IF_SPEED {
                set(&mut snapshot, SnmpValue::Gauge(4_294_967_295));
            }
            if base == oids::IF_HIGH_SPEED {
                set(&mut snapshot, SnmpValue::Gauge(10_000));
            }
        }
        assert_eq!(snapshot.speed_bps, Some(10_000_000_000));
    }

    #[test]
    fn test_should_keep_if_speed_when_high_speed_is_zero() {
        let mut snapshot = InterfaceSnapshot::default();
        for (base, set) in column_setters() {
            if base == oids::IF_SPEED {
                set(&mut snapshot, SnmpValue::Gauge(100_000_000));
            }
            if base == oids::IF_HIGH_SPEED {
                set(&mut snapshot, SnmpValue::Gauge(0));
            }
        }
        assert_eq!(snapshot.speed_bps, Some(100_000_000));
    }
}
