//! SNMP worker: counter collection
//!
//! Per device: open the sealed credential, detect the vendor from
//! `sysObjectID`, build the OID set (universal MIB-II plus the vendor tier
//! when one exists), execute the exchanges, and ship labeled samples to the
//! time-series store. Per-OID failures are recorded and do not abort the
//! batch; a credential failure skips the device's SNMP items for the cycle
//! while ICMP monitoring continues unaffected.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain_types::DeviceId;
use crate::probe::oids::{self, OidSpec};
use crate::probe::snmp::table_index;
use crate::probe::{ProbeError, SnmpClient, SnmpTarget, SnmpValue};
use crate::storage::{Device, DeviceStore};
use crate::time_provider::SharedTimeProvider;
use crate::timeseries::{Sample, Timeseries};
use crate::workers::SnmpAccess;

/// Devices processed concurrently per batch; the poller semaphore still
/// bounds the wire side
const BATCH_CONCURRENCY: usize = 16;

/// Counters from one SNMP batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnmpBatchSummary {
    /// Devices polled successfully
    pub polled: usize,
    /// Samples shipped
    pub samples: usize,
    /// Devices skipped for credential problems
    pub credential_failures: usize,
    /// Devices skipped for other errors
    pub errors: usize,
}

/// The SNMP counter-collection worker
pub struct SnmpWorker {
    devices: Arc<dyn DeviceStore>,
    snmp: Arc<dyn SnmpClient>,
    timeseries: Arc<dyn Timeseries>,
    access: SnmpAccess,
    clock: SharedTimeProvider,
}

impl SnmpWorker {
    /// Wires the worker to its collaborators
    #[must_use]
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        snmp: Arc<dyn SnmpClient>,
        timeseries: Arc<dyn Timeseries>,
        access: SnmpAccess,
        clock: SharedTimeProvider,
    ) -> Self {
        Self {
            devices,
            snmp,
            timeseries,
            access,
            clock,
        }
    }

    /// Processes one batch of devices
    pub async fn run_batch(&self, batch: &[DeviceId]) -> SnmpBatchSummary {
        let mut summary = SnmpBatchSummary::default();
        let mut all_samples: Vec<Sample> = Vec::new();

        let results = stream::iter(batch.iter().copied())
            .map(|id| self.poll_device(id))
            .buffer_unordered(BATCH_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        for result in results {
            match result {
                Ok(Some(samples)) => {
                    summary.polled += 1;
                    summary.samples += samples.len();
                    all_samples.extend(samples);
                }
                Ok(None) => {}
                Err(
                    ProbeError::Credential(_)
                    | ProbeError::CredentialMissing { .. }
                    | ProbeError::AuthFailed { .. },
                ) => {
                    summary.credential_failures += 1;
                }
                Err(e) => {
                    summary.errors += 1;
                    debug!(error = %e, "device skipped this SNMP cycle");
                }
            }
        }

        if let Err(e) = self.timeseries.write_batch(&all_samples).await {
            warn!(error = %e, samples = all_samples.len(), "SNMP samples lost to time-series store");
        }

        info!(
            polled = summary.polled,
            samples = summary.samples,
            credential_failures = summary.credential_failures,
            errors = summary.errors,
            "SNMP batch finished"
        );
        summary
    }

    async fn poll_device(&self, id: DeviceId) -> Result<Option<Vec<Sample>>, ProbeError> {
        let device = match self.devices.get_device(id).await {
            Ok(Some(device)) if device.enabled => device,
            Ok(_) => return Ok(None),
            Err(e) => {
                warn!(device_id = %id, error = %e, "device load failed before SNMP poll");
                return Ok(None);
            }
        };

        let target = self.access.target_for(&device)?;
        let now = self.clock.now_utc();

        // sysObjectID doubles as a liveness probe for the SNMP agent.
        let sys_object_id = self.snmp.get(&target, oids::SYS_OBJECT_ID).await?;
        let vendor = sys_object_id
            .as_text()
            .as_deref()
            .and_then(oids::detect_vendor);

        let mut specs: Vec<OidSpec> = oids::UNIVERSAL_POLL_SET.to_vec();
        if let Some(vendor_specs) = vendor.and_then(oids::vendor_poll_set) {
            specs.extend_from_slice(vendor_specs);
        }

        let samples = self
            .collect_specs(&target, &device, vendor, &specs, now)
            .await;
        Ok(Some(samples))
    }

    async fn collect_specs(
        &self,
        target: &SnmpTarget,
        device: &Device,
        vendor: Option<&'static str>,
        specs: &[OidSpec],
        now: DateTime<Utc>,
    ) -> Vec<Sample> {
        let mut samples = Vec::new();

        // Scalars travel together in one GETBULK exchange.
        let scalars: Vec<&OidSpec> = specs.iter().filter(|s| !s.is_table).collect();
        if !scalars.is_empty() {
            let requested: Vec<&[u64]> = scalars.iter().map(|s| s.oid).collect();
            match self.snmp.get_many(target, &requested).await {
                Ok(results) => {
                    for spec in &scalars {
                        let wanted = oids::to_dotted(spec.oid);
                        if let Some((_, value)) =
                            results.iter().find(|(dotted, _)| *dotted == wanted)
                        {
                            if let Some(value) = numeric(value) {
                                samples.push(self.sample(device, vendor, spec, None, value, now));
                            }
                        }
                    }
                }
                Err(e) => debug!(ip = %target.ip, error = %e, "scalar exchange failed"),
            }
        }

        // Table columns are walked one at a time; a failing column is
        // recorded and the rest still collect.
        for spec in specs.iter().filter(|s| s.is_table) {
            match self.snmp.walk(target, spec.oid).await {
                Ok(rows) => {
                    for (dotted, value) in rows {
                        let Some(index) = table_index(&dotted, spec.oid) else {
                            continue;
                        };
                        if let Some(value) = numeric(&value) {
                            samples.push(self.sample(device, vendor, spec, Some(index), value, now));
                        }
                    }
                }
                Err(e) => {
                    debug!(ip = %target.ip, metric = spec.metric, error = %e, "column walk failed");
                }
            }
        }

        samples
    }

    fn sample(
        &self,
        device: &Device,
        vendor: Option<&'static str>,
        spec: &OidSpec,
        if_index: Option<u32>,
        value: f64,
        now: DateTime<Utc>,
    ) -> Sample {
        let mut sample = Sample::new(spec.metric, value, now)
            .with_label("device_id", device.id.to_string())
            .with_label("device_ip", device.ip.to_string());
        if let Some(vendor) = vendor {
            sample = sample.with_label("vendor", vendor);
        }
        if let Some(index) = if_index {
            sample = sample.with_label("if_index", index.to_string());
        }
        sample
    }
}

/// Numeric view of an SNMP value for sample conversion
fn numeric(value: &SnmpValue) -> Option<f64> {
    #[allow(clippy::cast_precision_loss)]
    match value {
        SnmpValue::Counter64(v) => Some(*v as f64),
        other => other.as_i64().map(|v| v as f64),
    }
}
