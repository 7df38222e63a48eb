//! Alert evaluator
//!
//! Runs every beat on the alert cadence. Conditions are derived directly
//! from the device row and the latest ping/interface observations; no
//! expression interpretation happens for the built-in rules. Stored rules
//! participate by overriding severity and scope for the dedup group they
//! belong to; when no stored rule applies, the built-in defaults fire.
//!
//! The evaluator is fail-safe: a device that errors is counted and skipped,
//! and every cycle commits whatever it could evaluate.

use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::alerts::dedup::{self, DedupDecision, DedupGroup};
use crate::alerts::isp_fault::{FaultInput, classify_fault};
use crate::alerts::{
    EvaluatorError, RULE_CRITICAL_INTERFACE_DOWN, RULE_DEVICE_FLAPPING, RULE_DEVICE_UNREACHABLE,
    RULE_HIGH_LATENCY, RULE_PACKET_LOSS,
};
use crate::config::AlertThresholds;
use crate::domain_types::{FLAP_WINDOW_MINUTES, RuleName, Severity};
use crate::storage::{
    AlertInsertOutcome, AlertRule, AlertStore, Device, DeviceStore, InterfaceStore, LatestPing,
    NewAlert,
};
use crate::time_provider::SharedTimeProvider;

/// Counters from one evaluation cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluatorSummary {
    /// Devices inspected
    pub evaluated: usize,
    /// Alert rows created
    pub created: usize,
    /// Alert rows resolved
    pub resolved: usize,
    /// Devices skipped on error
    pub errors: usize,
}

/// The alert evaluator
pub struct AlertEvaluator {
    devices: Arc<dyn DeviceStore>,
    interfaces: Arc<dyn InterfaceStore>,
    alerts: Arc<dyn AlertStore>,
    thresholds: AlertThresholds,
    clock: SharedTimeProvider,
}

fn rule(name: &str) -> RuleName {
    RuleName::try_new(name).expect("built-in rule names are non-empty")
}

impl AlertEvaluator {
    /// Wires the evaluator to its stores
    #[must_use]
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        interfaces: Arc<dyn InterfaceStore>,
        alerts: Arc<dyn AlertStore>,
        thresholds: AlertThresholds,
        clock: SharedTimeProvider,
    ) -> Self {
        Self {
            devices,
            interfaces,
            alerts,
            thresholds,
            clock,
        }
    }

    /// Evaluates every enabled device once
    ///
    /// # Errors
    ///
    /// Returns an error only when the initial device/rule load fails;
    /// per-device failures are absorbed into the summary.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<EvaluatorSummary, EvaluatorError> {
        let devices = self.devices.list_enabled().await?;
        let rules = self.alerts.list_enabled_rules().await?;
        let ips: Vec<IpAddr> = devices.iter().map(|d| d.ip).collect();
        let latest = self.devices.latest_ping_bulk(&ips).await?;

        let mut summary = EvaluatorSummary::default();
        for device in &devices {
            summary.evaluated += 1;
            match self
                .evaluate_device(device, latest.get(&device.ip).copied(), &rules)
                .await
            {
                Ok((created, resolved)) => {
                    summary.created += created;
                    summary.resolved += resolved;
                }
                Err(e) => {
                    summary.errors += 1;
                    warn!(device_ip = %device.ip, error = %e, "device evaluation skipped");
                }
            }
        }

        info!(
            evaluated = summary.evaluated,
            created = summary.created,
            resolved = summary.resolved,
            errors = summary.errors,
            "alert evaluation cycle finished"
        );
        Ok(summary)
    }

    async fn evaluate_device(
        &self,
        device: &Device,
        latest: Option<LatestPing>,
        rules: &[AlertRule],
    ) -> Result<(usize, usize), EvaluatorError> {
        let now = self.clock.now_utc();
        let isp_link = device.is_isp_link();
        let mut created = 0usize;
        let mut resolved = 0usize;

        let flap_window = chrono::Duration::minutes(FLAP_WINDOW_MINUTES);
        // Recounted at evaluation time: the stored flag and count only
        // change when a ping sample lands, and this tick may run between
        // samples.
        let window_transitions = device.state.transitions.count_within(now, flap_window);

        // Flapping first: while it holds, the per-transition rules stay
        // quiet. The window count alone engages the branch even before the
        // ping worker has flipped `is_flapping`, so a tick landing between
        // samples cannot slip an unreachable alert under the detector.
        let flap_threshold = self.thresholds.flap_for(isp_link);
        if (device.state.is_flapping && device.state.flap_count >= flap_threshold)
            || window_transitions >= flap_threshold
        {
            let flap_count = device.state.flap_count.max(window_transitions);
            created += self
                .ensure_alert(
                    device,
                    &rule(RULE_DEVICE_FLAPPING),
                    Severity::High,
                    format!(
                        "Device {} ({}) is flapping: {flap_count} transitions in 5 minutes",
                        device.name, device.ip
                    ),
                    Some(flap_count.to_string()),
                    Some(flap_threshold.to_string()),
                )
                .await?;
            return Ok((created, resolved));
        }
        resolved += self
            .clear_rules(device, &[rule(RULE_DEVICE_FLAPPING)])
            .await?;

        // Reachability. A warm transition window means the flap detector
        // has not had its say yet: a fresh flip only counts as a real
        // outage once it has outlasted the whole window. A quiet window
        // (an outage older than the window, or one inherited across a
        // restart) needs only the short grace.
        let down_long_enough = device.state.down_since.is_some_and(|down_since| {
            let age = (now - down_since).to_std().unwrap_or_default();
            if window_transitions == 0 {
                age >= self.thresholds.device_down_grace
            } else {
                age >= flap_window.to_std().unwrap_or_default()
            }
        });
        let unreachable_group = dedup::group_of(RULE_DEVICE_UNREACHABLE)
            .expect("built-in rule belongs to a group");
        if down_long_enough {
            let (rule_name, severity) =
                pick_rule(rules, unreachable_group, device, RULE_DEVICE_UNREACHABLE, Severity::Critical);
            created += self
                .ensure_alert(
                    device,
                    &rule_name,
                    severity,
                    format!("Device {} ({}) is unreachable", device.name, device.ip),
                    Some("down".to_string()),
                    None,
                )
                .await?;
        } else if device.state.down_since.is_none() {
            resolved += self
                .clear_rules(device, &group_rule_names(unreachable_group))
                .await?;
        }

        // Latency and loss only mean something while the device answers.
        let reachable_sample = latest.filter(|p| p.is_reachable);
        let latency_group =
            dedup::group_of(RULE_HIGH_LATENCY).expect("built-in rule belongs to a group");
        let latency_threshold = self.thresholds.latency_for(isp_link);
        let high_latency = reachable_sample
            .and_then(|p| p.avg_rtt_ms)
            .filter(|rtt| *rtt > latency_threshold);
        if let Some(rtt) = high_latency {
            let (rule_name, severity) =
                pick_rule(rules, latency_group, device, RULE_HIGH_LATENCY, Severity::Medium);
            created += self
                .ensure_alert(
                    device,
                    &rule_name,
                    severity,
                    format!(
                        "{} {} ({}) latency is {rtt:.1}ms (threshold: {latency_threshold:.0}ms)",
                        device_class_label(isp_link),
                        device.name,
                        device.ip
                    ),
                    Some(format!("{rtt:.1}ms")),
                    Some(format!("{latency_threshold:.0}ms")),
                )
                .await?;
        } else if reachable_sample.is_some() {
            resolved += self
                .clear_rules(device, &group_rule_names(latency_group))
                .await?;
        }

        let loss_group =
            dedup::group_of(RULE_PACKET_LOSS).expect("built-in rule belongs to a group");
        let loss_threshold = self.thresholds.loss_for(isp_link);
        let high_loss = reachable_sample
            .and_then(|p| p.packet_loss_pct)
            .filter(|loss| *loss > loss_threshold);
        if let Some(loss) = high_loss {
            let (rule_name, severity) =
                pick_rule(rules, loss_group, device, RULE_PACKET_LOSS, Severity::Medium);
            created += self
                .ensure_alert(
                    device,
                    &rule_name,
                    severity,
                    format!(
                        "{} {} ({}) packet loss is {loss:.0}% (threshold: {loss_threshold:.0}%)",
                        device_class_label(isp_link),
                        device.name,
                        device.ip
                    ),
                    Some(format!("{loss:.0}%")),
                    Some(format!("{loss_threshold:.0}%")),
                )
                .await?;
        } else if reachable_sample.is_some() {
            resolved += self
                .clear_rules(device, &group_rule_names(loss_group))
                .await?;
        }

        // Critical interfaces that dropped their link while the device
        // itself still answers.
        if self.thresholds.alert_on_critical_interface_down {
            let (c, r) = self.evaluate_critical_interfaces(device, latest).await?;
            created += c;
            resolved += r;
        }

        Ok((created, resolved))
    }

    async fn evaluate_critical_interfaces(
        &self,
        device: &Device,
        latest: Option<LatestPing>,
    ) -> Result<(usize, usize), EvaluatorError> {
        let interfaces = self.interfaces.list_for_device(device.id).await?;
        let device_up = latest.is_some_and(|p| p.is_reachable);

        let mut down_critical = None;
        for interface in interfaces
            .iter()
            .filter(|i| i.is_monitored_critical())
        {
            if interface.snapshot.oper_status == Some(2) {
                down_critical = Some(interface);
                break;
            }
        }

        match down_critical {
            Some(interface) => {
                let summary = self
                    .interfaces
                    .get_summary(interface.id)
                    .await?
                    .unwrap_or_default();
                let analysis = classify_fault(&FaultInput {
                    device_up,
                    oper_up: false,
                    admin_up: interface.snapshot.admin_status == Some(1),
                    crc_errors: 0,
                    in_errors: u64::try_from(summary.in_errors.max(0)).unwrap_or(0),
                    in_discards: u64::try_from(summary.in_discards.max(0)).unwrap_or(0),
                    in_octets: 0,
                    isp_name: interface.classification.isp_provider.clone(),
                });
                let label = interface
                    .snapshot
                    .if_name
                    .clone()
                    .or_else(|| interface.snapshot.if_descr.clone())
                    .unwrap_or_else(|| format!("ifIndex {}", interface.if_index));
                let created = self
                    .ensure_alert(
                        device,
                        &rule(RULE_CRITICAL_INTERFACE_DOWN),
                        Severity::Medium,
                        format!(
                            "Critical interface {label} on {} ({}) is down: {}",
                            device.name, device.ip, analysis.reason
                        ),
                        Some("oper_down".to_string()),
                        None,
                    )
                    .await?;
                Ok((created, 0))
            }
            None => {
                let resolved = self
                    .clear_rules(device, &[rule(RULE_CRITICAL_INTERFACE_DOWN)])
                    .await?;
                Ok((0, resolved))
            }
        }
    }

    /// Creates one alert honoring the dedup group semantics
    async fn ensure_alert(
        &self,
        device: &Device,
        rule_name: &RuleName,
        severity: Severity,
        message: String,
        value: Option<String>,
        threshold: Option<String>,
    ) -> Result<usize, EvaluatorError> {
        let now = self.clock.now_utc();
        let group_rules = dedup::group_of(rule_name.as_str())
            .map_or_else(|| vec![rule_name.clone()], group_rule_names);
        let actives = self.alerts.active_by_rules(device.id, &group_rules).await?;

        let superseded = match dedup::decide(rule_name.as_str(), severity, &actives) {
            DedupDecision::Suppress => return Ok(0),
            DedupDecision::Create => Vec::new(),
            DedupDecision::Supersede(ids) => ids,
        };

        let outcome = self
            .alerts
            .create_if_absent(&NewAlert {
                device_id: device.id,
                rule_name: rule_name.clone(),
                severity,
                message,
                value,
                threshold,
                triggered_at: now,
            })
            .await?;

        // Lower-severity actives resolve at the moment the higher-severity
        // alert took over.
        for id in superseded {
            self.alerts.resolve(id, now).await?;
        }

        Ok(usize::from(matches!(outcome, AlertInsertOutcome::Created(_))))
    }

    /// Resolves every active alert for the given rule names
    async fn clear_rules(
        &self,
        device: &Device,
        rule_names: &[RuleName],
    ) -> Result<usize, EvaluatorError> {
        let actives = self.alerts.active_by_rules(device.id, rule_names).await?;
        if actives.is_empty() {
            return Ok(0);
        }
        let now = self.clock.now_utc();
        for alert in &actives {
            self.alerts.resolve(alert.id, now).await?;
        }
        Ok(actives.len())
    }
}

fn device_class_label(isp_link: bool) -> &'static str {
    if isp_link { "ISP Link" } else { "Device" }
}

fn group_rule_names(group: &DedupGroup) -> Vec<RuleName> {
    group.rules.iter().map(|name| rule(name)).collect()
}

/// Picks the applicable rule for a group: the highest-severity enabled
/// stored rule whose scope covers the device, else the built-in default
fn pick_rule(
    rules: &[AlertRule],
    group: &DedupGroup,
    device: &Device,
    default_name: &str,
    default_severity: Severity,
) -> (RuleName, Severity) {
    rules
        .iter()
        .filter(|r| r.enabled && group.rules.contains(&r.name.as_str()))
        .filter(|r| r.device_id.is_none_or(|scope| scope == device.id))
        .filter(|r| {
            r.branch_id.is_none() || (r.branch_id == device.branch_id)
        })
        .max_by_key(|r| r.severity)
        .map_or_else(
            || (rule(default_name), default_severity),
            |r| (r.name.clone(), r.severity),
        )
}
