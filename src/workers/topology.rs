//! Topology discovery worker
//!
//! LLDP first; when a device returns no LLDP neighbors the worker falls
//! back to the CDP cache. Neighbor names resolve against known devices by
//! exact match, then fuzzily (domain stripped, separators normalized);
//! neighbor ports resolve against the remote device's interfaces by exact
//! name, then substring. Orphan neighbors (no device match) are still
//! recorded on the local interface so operators see the raw adjacency.

use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain_types::DeviceId;
use crate::probe::oids;
use crate::probe::snmp::index_suffix;
use crate::probe::{ProbeError, SnmpClient, SnmpTarget};
use crate::storage::{
    Device, DeviceStore, Interface, InterfaceStore, TopologyLink, TopologyProtocol, TopologyStore,
};
use crate::time_provider::SharedTimeProvider;
use crate::workers::SnmpAccess;

/// Devices walked concurrently per batch
const BATCH_CONCURRENCY: usize = 8;

/// One raw neighbor row before resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RawNeighbor {
    local_if_index: Option<u32>,
    name: Option<String>,
    port: Option<String>,
    port_desc: Option<String>,
}

/// Counters from one topology batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopologySummary {
    /// Devices that answered a neighbor walk
    pub devices: usize,
    /// Neighbors recorded
    pub neighbors: usize,
    /// Neighbors resolved to a known device
    pub resolved: usize,
    /// Devices skipped on error
    pub errors: usize,
}

/// The topology discovery worker
pub struct TopologyWorker {
    devices: Arc<dyn DeviceStore>,
    interfaces: Arc<dyn InterfaceStore>,
    topology: Arc<dyn TopologyStore>,
    snmp: Arc<dyn SnmpClient>,
    access: SnmpAccess,
    clock: SharedTimeProvider,
}

impl TopologyWorker {
    /// Wires the worker to its collaborators
    #[must_use]
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        interfaces: Arc<dyn InterfaceStore>,
        topology: Arc<dyn TopologyStore>,
        snmp: Arc<dyn SnmpClient>,
        access: SnmpAccess,
        clock: SharedTimeProvider,
    ) -> Self {
        Self {
            devices,
            interfaces,
            topology,
            snmp,
            access,
            clock,
        }
    }

    /// Processes one batch of devices
    pub async fn run_batch(&self, batch: &[DeviceId]) -> TopologySummary {
        let all_devices = match self.devices.list_devices(None, None, None).await {
            Ok(devices) => Arc::new(devices),
            Err(e) => {
                warn!(error = %e, "topology cycle skipped: device listing failed");
                return TopologySummary {
                    errors: batch.len(),
                    ..TopologySummary::default()
                };
            }
        };

        let mut summary = TopologySummary::default();
        let results = stream::iter(batch.iter().copied())
            .map(|id| {
                let all_devices = Arc::clone(&all_devices);
                async move { self.discover_device(id, &all_devices).await }
            })
            .buffer_unordered(BATCH_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        for result in results {
            match result {
                Ok(Some((neighbors, resolved))) => {
                    summary.devices += 1;
                    summary.neighbors += neighbors;
                    summary.resolved += resolved;
                }
                Ok(None) => {}
                Err(e) => {
                    summary.errors += 1;
                    debug!(error = %e, "device skipped this topology cycle");
                }
            }
        }

        info!(
            devices = summary.devices,
            neighbors = summary.neighbors,
            resolved = summary.resolved,
            errors = summary.errors,
            "topology discovery batch finished"
        );
        summary
    }

    async fn discover_device(
        &self,
        id: DeviceId,
        all_devices: &[Device],
    ) -> Result<Option<(usize, usize)>, ProbeError> {
        let device = match self.devices.get_device(id).await {
            Ok(Some(device)) if device.enabled => device,
            Ok(_) => return Ok(None),
            Err(e) => {
                warn!(device_id = %id, error = %e, "device load failed before topology walk");
                return Ok(None);
            }
        };

        let target = self.access.target_for(&device)?;
        let (neighbors, protocol) = self.collect_neighbors(&target).await?;
        if neighbors.is_empty() {
            return Ok(Some((0, 0)));
        }

        let local_interfaces = match self.interfaces.list_for_device(device.id).await {
            Ok(interfaces) => interfaces,
            Err(e) => {
                warn!(device_ip = %device.ip, error = %e, "local interface listing failed");
                Vec::new()
            }
        };

        let mut links = Vec::with_capacity(neighbors.len());
        let mut resolved_count = 0usize;
        for neighbor in &neighbors {
            let local = neighbor.local_if_index.and_then(|index| {
                local_interfaces
                    .iter()
                    .find(|i| i.if_index.as_u32() == index)
            });
            let port_label = neighbor
                .port_desc
                .clone()
                .or_else(|| neighbor.port.clone());

            let remote_device = neighbor
                .name
                .as_deref()
                .and_then(|name| match_neighbor_device(name, all_devices));
            let remote_interface = match remote_device {
                Some(remote) => {
                    let remote_interfaces =
                        self.interfaces.list_for_device(remote.id).await.unwrap_or_default();
                    port_label
                        .as_deref()
                        .and_then(|port| match_neighbor_interface(port, &remote_interfaces))
                        .map(|i| i.id)
                }
                None => None,
            };
            if remote_device.is_some() {
                resolved_count += 1;
            }

            if let Some(local) = local {
                if let Err(e) = self
                    .interfaces
                    .set_neighbor(
                        local.id,
                        remote_device.map(|d| d.id),
                        remote_interface,
                        neighbor.name.as_deref(),
                        port_label.as_deref(),
                    )
                    .await
                {
                    warn!(interface_id = %local.id, error = %e, "neighbor write failed");
                }
            }

            links.push(TopologyLink {
                local_device_id: device.id,
                local_interface_id: local.map(|i| i.id),
                remote_device_id: remote_device.map(|d| d.id),
                remote_interface_id: remote_interface,
                neighbor_name: neighbor.name.clone(),
                neighbor_port: port_label,
                protocol,
            });
        }

        let discovered_at = self.clock.now_utc();
        if let Err(e) = self
            .topology
            .replace_links(device.id, &links, discovered_at)
            .await
        {
            warn!(device_ip = %device.ip, error = %e, "topology link write failed");
        }

        Ok(Some((neighbors.len(), resolved_count)))
    }

    /// Walks LLDP, falling back to CDP when no LLDP neighbors exist
    async fn collect_neighbors(
        &self,
        target: &SnmpTarget,
    ) -> Result<(Vec<RawNeighbor>, TopologyProtocol), ProbeError> {
        let lldp = self.walk_lldp(target).await?;
        if !lldp.is_empty() {
            return Ok((lldp, TopologyProtocol::Lldp));
        }
        let cdp = self.walk_cdp(target).await?;
        Ok((cdp, TopologyProtocol::Cdp))
    }

    async fn walk_lldp(&self, target: &SnmpTarget) -> Result<Vec<RawNeighbor>, ProbeError> {
        // lldpRem* rows index as (timeMark, localPortNum, remIndex); the
        // local port number carries the ifIndex on the platforms monitored
        // here.
        let mut rows: BTreeMap<(u64, u64), RawNeighbor> = BTreeMap::new();
        let mut merge = |dotted: &str,
                         base: &'static [u64],
                         value: Option<String>,
                         set: fn(&mut RawNeighbor, String)| {
            let Some(suffix) = index_suffix(dotted, base) else {
                return;
            };
            let [_, port, index] = suffix.as_slice() else {
                return;
            };
            let neighbor = rows.entry((*port, *index)).or_default();
            neighbor.local_if_index = u32::try_from(*port).ok();
            if let Some(value) = value {
                set(neighbor, value);
            }
        };

        for (dotted, value) in self.snmp.walk(target, oids::LLDP_REM_SYS_NAME).await? {
            merge(&dotted, oids::LLDP_REM_SYS_NAME, value.as_text(), |n, v| {
                n.name = Some(v);
            });
        }
        for (dotted, value) in self
            .snmp
            .walk(target, oids::LLDP_REM_PORT_ID)
            .await
            .unwrap_or_default()
        {
            merge(&dotted, oids::LLDP_REM_PORT_ID, value.as_text(), |n, v| {
                n.port = Some(v);
            });
        }
        for (dotted, value) in self
            .snmp
            .walk(target, oids::LLDP_REM_PORT_DESC)
            .await
            .unwrap_or_default()
        {
            merge(&dotted, oids::LLDP_REM_PORT_DESC, value.as_text(), |n, v| {
                n.port_desc = Some(v);
            });
        }

        Ok(rows.into_values().collect())
    }

    async fn walk_cdp(&self, target: &SnmpTarget) -> Result<Vec<RawNeighbor>, ProbeError> {
        // cdpCache rows index as (ifIndex, deviceIndex).
        let mut rows: BTreeMap<(u64, u64), RawNeighbor> = BTreeMap::new();
        let mut merge = |dotted: &str,
                         base: &'static [u64],
                         value: Option<String>,
                         set: fn(&mut RawNeighbor, String)| {
            let Some(suffix) = index_suffix(dotted, base) else {
                return;
            };
            let [if_index, device_index] = suffix.as_slice() else {
                return;
            };
            let neighbor = rows.entry((*if_index, *device_index)).or_default();
            neighbor.local_if_index = u32::try_from(*if_index).ok();
            if let Some(value) = value {
                set(neighbor, value);
            }
        };

        for (dotted, value) in self.snmp.walk(target, oids::CDP_CACHE_DEVICE_ID).await? {
            merge(&dotted, oids::CDP_CACHE_DEVICE_ID, value.as_text(), |n, v| {
                n.name = Some(v);
            });
        }
        for (dotted, value) in self
            .snmp
            .walk(target, oids::CDP_CACHE_DEVICE_PORT)
            .await
            .unwrap_or_default()
        {
            merge(&dotted, oids::CDP_CACHE_DEVICE_PORT, value.as_text(), |n, v| {
                n.port = Some(v);
            });
        }

        Ok(rows.into_values().collect())
    }
}

/// Normalizes a neighbor system name for fuzzy comparison: lowercase, the
/// DNS domain stripped, separators removed
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let base = name.split('.').next().unwrap_or(name);
    base.to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .collect()
}

/// Resolves a neighbor name to a known device: exact first, then fuzzy
#[must_use]
pub fn match_neighbor_device<'a>(name: &str, devices: &'a [Device]) -> Option<&'a Device> {
    let exact = devices.iter().find(|d| {
        d.name.eq_ignore_ascii_case(name)
            || d.hostname.as_deref().is_some_and(|h| h.eq_ignore_ascii_case(name))
    });
    if exact.is_some() {
        return exact;
    }

    let wanted = normalize_name(name);
    if wanted.is_empty() {
        return None;
    }
    devices.iter().find(|d| {
        normalize_name(&d.name) == wanted
            || d.hostname
                .as_deref()
                .is_some_and(|h| normalize_name(h) == wanted)
    })
}

/// Resolves a neighbor port to a remote interface: exact name, then
/// substring on description or name
#[must_use]
pub fn match_neighbor_interface<'a>(
    port: &str,
    interfaces: &'a [Interface],
) -> Option<&'a Interface> {
    let exact = interfaces.iter().find(|i| {
        i.snapshot.if_name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(port))
            || i.snapshot
                .if_descr
                .as_deref()
                .is_some_and(|d| d.eq_ignore_ascii_case(port))
    });
    if exact.is_some() {
        return exact;
    }

    let lowered = port.to_lowercase();
    interfaces.iter().find(|i| {
        i.snapshot
            .if_descr
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(&lowered))
            || i.snapshot
                .if_name
                .as_deref()
                .is_some_and(|n| n.to_lowercase().contains(&lowered))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::{IfIndex, InterfaceId};
    use crate::storage::{DeviceState, InterfaceClassification, InterfaceSnapshot};
    use chrono::Utc;
    use std::net::{IpAddr, Ipv4Addr};

    fn device(name: &str, hostname: Option<&str>, last: u8) -> Device {
        Device {
            id: DeviceId::generate(),
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)),
            hostname: hostname.map(ToString::to_string),
            name: name.to_string(),
            vendor: None,
            device_type: None,
            branch_id: None,
            region: None,
            tags: Vec::new(),
            custom_fields: serde_json::Value::Null,
            enabled: true,
            snmp_version: None,
            snmp_credential: None,
            snmp_port: 161,
            state: DeviceState::default(),
            last_seen: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn interface(if_name: Option<&str>, if_descr: Option<&str>) -> Interface {
        Interface {
            id: InterfaceId::generate(),
            device_id: DeviceId::generate(),
            if_index: IfIndex::new(1),
            snapshot: InterfaceSnapshot {
                if_name: if_name.map(ToString::to_string),
                if_descr: if_descr.map(ToString::to_string),
                ..InterfaceSnapshot::default()
            },
            classification: InterfaceClassification::default(),
            connected_to_device_id: None,
            connected_to_interface_id: None,
            lldp_neighbor_name: None,
            lldp_neighbor_port: None,
            last_seen: None,
        }
    }

    #[test]
    fn test_should_strip_domain_and_separators_when_normalizing() {
        assert_eq!(normalize_name("SW-Core-01.branch.example.com"), "swcore01");
        assert_eq!(normalize_name("sw_core 01"), "swcore01");
    }

    #[test]
    fn test_should_match_device_exactly_before_trying_fuzzy() {
        let devices = vec![device("sw-core-01", None, 1), device("swcore01", None, 2)];
        let matched = match_neighbor_device("sw-core-01", &devices).expect("match");
        assert_eq!(matched.ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn test_should_match_device_fuzzily_when_neighbor_reports_fqdn() {
        let devices = vec![device("SW-Core-01", None, 1)];
        let matched = match_neighbor_device("sw_core_01.branch.example.com", &devices);
        assert!(matched.is_some());
    }

    #[test]
    fn test_should_leave_orphan_unmatched_when_no_device_fits() {
        let devices = vec![device("router-a", None, 1)];
        assert!(match_neighbor_device("unknown-switch", &devices).is_none());
    }

    #[test]
    fn test_should_match_interface_by_exact_name_then_substring() {
        let interfaces = vec![
            interface(Some("Gi0/1"), Some("GigabitEthernet0/1")),
            interface(Some("Gi0/2"), Some("GigabitEthernet0/2")),
        ];
        let exact = match_neighbor_interface("Gi0/2", &interfaces).expect("exact match");
        assert_eq!(exact.snapshot.if_name.as_deref(), Some("Gi0/2"));

        let substring =
            match_neighbor_interface("GigabitEthernet0/1", &interfaces).expect("descr match");
        assert_eq!(substring.snapshot.if_name.as_deref(), Some("Gi0/1"));
    }
}
