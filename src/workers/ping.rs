//! Ping worker: reachability probing and the device state machine
//!
//! The state machine is a pure function over `(previous state, sample,
//! now)`; the worker applies its decision to the row, the alert table, the
//! time-series sink, the change stream, and the hot caches. Two properties
//! anchor it:
//!
//! - `down_since` is set on UP→DOWN and *never reset while the device stays
//!   down*, which preserves outage durations across worker restarts.
//! - A flapping device (≥3 transitions in 5 minutes) suppresses the
//!   per-transition alerts and holds exactly one "Device Flapping" alert.
//!   Suppression clears only once the window quiets below 2 transitions
//!   AND ten minutes have passed since the last flip, so a device that
//!   settles briefly cannot bounce straight back into alert noise.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::alerts::{RULE_DEVICE_FLAPPING, RULE_DEVICE_UNREACHABLE, dedup};
use crate::cache::{NS_DEVICE_LIST, TtlCache};
use crate::domain_types::{
    DeviceId, DeviceStatus, FLAP_WINDOW_MINUTES, RuleName, Severity,
};
use crate::events::{ChangeStream, StatusChange};
use crate::probe::{PingOutcome, ReachabilityProbe};
use crate::storage::{AlertStore, Device, DeviceState, DeviceStore, NewAlert, PingObservation};
use crate::time_provider::SharedTimeProvider;
use crate::timeseries::{Sample, Timeseries};

/// Transitions inside the window that start flap suppression
pub const FLAP_START_THRESHOLD: usize = 3;
/// Transition count below which flap suppression clears
pub const FLAP_CLEAR_BELOW: usize = 2;
/// Suppression holds this long past the last transition, minutes
pub const FLAP_SUPPRESSION_MINUTES: i64 = 10;

/// How many devices a batch processes concurrently; the prober's semaphore
/// still bounds the network side
const BATCH_CONCURRENCY: usize = 32;

/// What one sample did to a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionDecision {
    /// The state to persist
    pub new_state: DeviceState,
    /// `(old, new)` when the reachability flipped
    pub transition: Option<(DeviceStatus, DeviceStatus)>,
    /// Outage length, for DOWN→UP
    pub downtime_secs: Option<i64>,
    /// Flap suppression engaged on this sample
    pub flap_started: bool,
    /// Flap suppression cleared on this sample
    pub flap_cleared: bool,
}

/// Applies one reachability sample to a device state (pure)
#[must_use]
pub fn apply_sample(state: &DeviceState, cur_up: bool, now: DateTime<Utc>) -> TransitionDecision {
    let prev_up = state.down_since.is_none();
    let mut new_state = state.clone();
    let mut transition = None;
    let mut downtime_secs = None;

    if cur_up != prev_up {
        new_state.transitions.push(now);
        if prev_up {
            // UP -> DOWN
            new_state.down_since = Some(now);
            transition = Some((DeviceStatus::Up, DeviceStatus::Down));
        } else {
            // DOWN -> UP
            if let Some(down_since) = state.down_since {
                downtime_secs = Some((now - down_since).num_seconds().max(0));
            }
            new_state.down_since = None;
            transition = Some((DeviceStatus::Down, DeviceStatus::Up));
        }
    }
    // DOWN -> DOWN leaves down_since untouched; that is the idempotency
    // property restarts rely on.

    let flap_count = new_state
        .transitions
        .count_within(now, ChronoDuration::minutes(FLAP_WINDOW_MINUTES));
    new_state.flap_count = flap_count;

    let mut flap_started = false;
    let mut flap_cleared = false;
    if !state.is_flapping && flap_count >= FLAP_START_THRESHOLD {
        new_state.is_flapping = true;
        new_state.flapping_since = Some(now);
        flap_started = true;
    } else if state.is_flapping && flap_count < FLAP_CLEAR_BELOW {
        // A quiet window alone is not enough: suppression holds for ten
        // minutes past the last flip before the device is trusted again.
        let held = new_state.transitions.last().is_some_and(|last| {
            now - last < ChronoDuration::minutes(FLAP_SUPPRESSION_MINUTES)
        });
        if !held {
            new_state.is_flapping = false;
            new_state.flapping_since = None;
            flap_cleared = true;
        }
    }

    TransitionDecision {
        new_state,
        transition,
        downtime_secs,
        flap_started,
        flap_cleared,
    }
}

/// Counters from one ping batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingBatchSummary {
    /// Devices probed
    pub probed: usize,
    /// Devices answering
    pub up: usize,
    /// Devices silent
    pub down: usize,
    /// Reachability flips observed
    pub transitions: usize,
    /// Devices skipped on prober or storage error
    pub errors: usize,
}

/// The ping worker
pub struct PingWorker {
    devices: Arc<dyn DeviceStore>,
    alerts: Arc<dyn AlertStore>,
    probe: Arc<dyn ReachabilityProbe>,
    timeseries: Arc<dyn Timeseries>,
    events: Arc<ChangeStream>,
    cache: Arc<TtlCache>,
    clock: SharedTimeProvider,
}

fn rule(name: &str) -> RuleName {
    RuleName::try_new(name).expect("built-in rule names are non-empty")
}

impl PingWorker {
    /// Wires the worker to its collaborators
    #[must_use]
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        alerts: Arc<dyn AlertStore>,
        probe: Arc<dyn ReachabilityProbe>,
        timeseries: Arc<dyn Timeseries>,
        events: Arc<ChangeStream>,
        cache: Arc<TtlCache>,
        clock: SharedTimeProvider,
    ) -> Self {
        Self {
            devices,
            alerts,
            probe,
            timeseries,
            events,
            cache,
            clock,
        }
    }

    /// Processes one batch of devices
    ///
    /// Batches in one cycle hold disjoint device sets, so per-device row
    /// updates cannot contend across workers.
    pub async fn run_batch(&self, batch: &[DeviceId]) -> PingBatchSummary {
        let mut summary = PingBatchSummary::default();
        let mut ts_samples: Vec<Sample> = Vec::new();
        let mut any_transition = false;

        let results = stream::iter(batch.iter().copied())
            .map(|id| self.process_device(id))
            .buffer_unordered(BATCH_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        for result in results {
            match result {
                Ok(Some(processed)) => {
                    summary.probed += 1;
                    if processed.outcome.is_alive {
                        summary.up += 1;
                    } else {
                        summary.down += 1;
                    }
                    if processed.transitioned {
                        summary.transitions += 1;
                        any_transition = true;
                    }
                    ts_samples.extend(processed.samples);
                }
                Ok(None) => {}
                Err(e) => {
                    summary.errors += 1;
                    warn!(error = %e, "device skipped this ping cycle");
                }
            }
        }

        if any_transition {
            self.cache.invalidate_namespace(NS_DEVICE_LIST);
        }

        // Time-series loss is logged, never fatal to probing.
        if let Err(e) = self.timeseries.write_batch(&ts_samples).await {
            warn!(error = %e, samples = ts_samples.len(), "ping samples lost to time-series store");
        }

        info!(
            probed = summary.probed,
            up = summary.up,
            down = summary.down,
            transitions = summary.transitions,
            errors = summary.errors,
            "ping batch finished"
        );
        summary
    }

    async fn process_device(
        &self,
        id: DeviceId,
    ) -> Result<Option<ProcessedDevice>, crate::error::MonitorError> {
        let Some(device) = self.devices.get_device(id).await? else {
            debug!(device_id = %id, "device vanished before its batch ran");
            return Ok(None);
        };
        if !device.enabled {
            return Ok(None);
        }

        let outcome = self.probe.probe(device.ip).await?;
        let now = self.clock.now_utc();
        let decision = apply_sample(&device.state, outcome.is_alive, now);

        self.persist(&device, &outcome, &decision, now).await?;

        Ok(Some(ProcessedDevice {
            samples: build_samples(&device, &outcome, now),
            outcome,
            transitioned: decision.transition.is_some(),
        }))
    }

    async fn persist(
        &self,
        device: &Device,
        outcome: &PingOutcome,
        decision: &TransitionDecision,
        now: DateTime<Utc>,
    ) -> Result<(), crate::error::MonitorError> {
        // The relational ping tail feeds bulk latest-ping lookups.
        self.devices
            .insert_ping_result(
                device.id,
                device.ip,
                &PingObservation {
                    timestamp: now,
                    is_reachable: outcome.is_alive,
                    avg_rtt_ms: outcome.avg_rtt_ms,
                    packet_loss_pct: Some(outcome.loss_pct),
                },
            )
            .await?;

        if decision.new_state == device.state {
            self.devices.touch_last_seen(device.id, now).await?;
            return Ok(());
        }
        self.devices.update_state(device.id, &decision.new_state).await?;

        if let Some((old_status, new_status)) = decision.transition {
            self.devices
                .record_status_change(device.id, old_status, new_status, now, decision.downtime_secs)
                .await?;
            self.events.publish(StatusChange {
                device_id: device.id,
                device_ip: device.ip,
                old_status,
                new_status,
                ts: now,
                downtime_secs: decision.downtime_secs,
            });
        }

        self.apply_alert_actions(device, decision, now).await?;
        Ok(())
    }

    async fn apply_alert_actions(
        &self,
        device: &Device,
        decision: &TransitionDecision,
        now: DateTime<Utc>,
    ) -> Result<(), crate::error::MonitorError> {
        let flapping = decision.new_state.is_flapping;

        if decision.flap_started {
            // Entering suppression replaces the per-transition alerts with
            // one flapping alert.
            self.alerts
                .create_if_absent(&NewAlert {
                    device_id: device.id,
                    rule_name: rule(RULE_DEVICE_FLAPPING),
                    severity: Severity::High,
                    message: format!(
                        "Device {} ({}) is flapping: {} transitions in 5 minutes",
                        device.name, device.ip, decision.new_state.flap_count
                    ),
                    value: Some(decision.new_state.flap_count.to_string()),
                    threshold: Some(FLAP_START_THRESHOLD.to_string()),
                    triggered_at: now,
                })
                .await?;
            return Ok(());
        }
        if decision.flap_cleared {
            self.alerts
                .resolve_by_rule(device.id, &rule(RULE_DEVICE_FLAPPING), now)
                .await?;
        }

        let Some((_, new_status)) = decision.transition else {
            return Ok(());
        };
        if flapping {
            // Suppressed: the flapping alert stands in for UP/DOWN noise.
            return Ok(());
        }

        if new_status == DeviceStatus::Up {
            // Recovery is a resolution, never a new alert row.
            let group = dedup::group_of(RULE_DEVICE_UNREACHABLE)
                .expect("built-in rule belongs to a group");
            for name in group.rules {
                self.alerts
                    .resolve_by_rule(device.id, &rule(name), now)
                    .await?;
            }
        }
        // The DOWN side is the evaluator's: it raises the unreachable alert
        // once the outage clears the grace period, which keeps a single
        // bounce from alerting before the flap detector can see it.
        Ok(())
    }
}

struct ProcessedDevice {
    samples: Vec<Sample>,
    outcome: PingOutcome,
    transitioned: bool,
}

fn build_samples(device: &Device, outcome: &PingOutcome, now: DateTime<Utc>) -> Vec<Sample> {
    let labeled = |metric: &str, value: f64| {
        Sample::new(metric, value, now)
            .with_label("device_id", device.id.to_string())
            .with_label("device_ip", device.ip.to_string())
    };
    let mut samples = vec![
        labeled("ping_status", f64::from(u8::from(outcome.is_alive))),
        labeled("ping_loss_pct", outcome.loss_pct),
    ];
    if let Some(rtt) = outcome.avg_rtt_ms {
        samples.push(labeled("ping_rtt_ms", rtt));
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, minute, second).unwrap()
    }

    #[test]
    fn test_should_set_down_since_when_device_goes_down() {
        let state = DeviceState::default();
        let decision = apply_sample(&state, false, at(0, 0));

        assert_eq!(decision.new_state.down_since, Some(at(0, 0)));
        assert_eq!(
            decision.transition,
            Some((DeviceStatus::Up, DeviceStatus::Down))
        );
        assert_eq!(decision.downtime_secs, None);
    }

    #[test]
    fn test_should_never_move_down_since_while_device_stays_down() {
        let state = DeviceState {
            down_since: Some(at(0, 0)),
            ..DeviceState::default()
        };

        for minute in [1, 2, 3] {
            let decision = apply_sample(&state, false, at(minute, 0));
            assert_eq!(
                decision.new_state.down_since,
                Some(at(0, 0)),
                "down_since must stay at the original outage start"
            );
            assert!(decision.transition.is_none());
        }
    }

    #[test]
    fn test_should_clear_down_since_and_report_downtime_when_device_recovers() {
        let state = DeviceState {
            down_since: Some(at(0, 0)),
            ..DeviceState::default()
        };

        let decision = apply_sample(&state, true, at(5, 0));
        assert_eq!(decision.new_state.down_since, None);
        assert_eq!(
            decision.transition,
            Some((DeviceStatus::Down, DeviceStatus::Up))
        );
        assert_eq!(decision.downtime_secs, Some(300));
    }

    #[test]
    fn test_should_not_mutate_state_when_device_stays_up() {
        let state = DeviceState::default();
        let decision = apply_sample(&state, true, at(1, 0));
        assert_eq!(decision.new_state, state);
        assert!(decision.transition.is_none());
    }

    #[test]
    fn test_should_start_flapping_after_third_transition_in_window() {
        let mut state = DeviceState::default();

        // Alternate UP/DOWN every 60s; flapping engages on transition 3.
        let mut flap_started_at = None;
        for (i, minute) in (0u32..5).enumerate() {
            let cur_up = i % 2 == 1;
            let decision = apply_sample(&state, cur_up, at(minute, 0));
            if decision.flap_started {
                flap_started_at = Some(i + 1);
            }
            state = decision.new_state;
        }

        assert_eq!(flap_started_at, Some(3), "third transition starts flapping");
        assert!(state.is_flapping);
        assert!(state.flapping_since.is_some());
    }

    #[test]
    fn test_should_clear_flapping_when_window_quiets_down() {
        let mut state = DeviceState::default();
        for (i, minute) in (0u32..4).enumerate() {
            let decision = apply_sample(&state, i % 2 == 1, at(minute, 0));
            state = decision.new_state;
        }
        assert!(state.is_flapping);

        // Twenty quiet minutes later the window holds no transitions and
        // the suppression hold has lapsed.
        let decision = apply_sample(&state, state.down_since.is_none(), at(24, 0));
        assert!(decision.flap_cleared);
        assert!(!decision.new_state.is_flapping);
        assert_eq!(decision.new_state.flap_count, 0);
    }

    #[test]
    fn test_should_hold_suppression_until_ten_minutes_after_last_flip() {
        let mut state = DeviceState::default();
        for (i, minute) in (0u32..4).enumerate() {
            let decision = apply_sample(&state, i % 2 == 1, at(minute, 0));
            state = decision.new_state;
        }
        assert!(state.is_flapping, "four flips engage suppression");

        // Five quiet minutes: the window is below the clear threshold but
        // the last flip (minute 3) is inside the ten-minute hold.
        let decision = apply_sample(&state, state.down_since.is_none(), at(8, 0));
        assert!(!decision.flap_cleared);
        assert!(decision.new_state.is_flapping, "hold keeps suppression on");
        state = decision.new_state;

        // Eleven minutes past the last flip the hold lapses.
        let decision = apply_sample(&state, state.down_since.is_none(), at(14, 0));
        assert!(decision.flap_cleared);
        assert!(!decision.new_state.is_flapping);
    }

    #[test]
    fn test_should_build_rtt_sample_only_when_device_answered() {
        let device = Device {
            id: DeviceId::generate(),
            ip: "10.0.0.1".parse().unwrap(),
            hostname: None,
            name: "r1".to_string(),
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
            created_at: at(0, 0),
            updated_at: at(0, 0),
        };

        let alive = PingOutcome::from_rtts(2, &[12.0]);
        let samples = build_samples(&device, &alive, at(0, 0));
        assert_eq!(samples.len(), 3);

        let dead = PingOutcome::unreachable(2);
        let samples = build_samples(&device, &dead, at(0, 0));
        assert_eq!(samples.len(), 2, "no rtt sample without a reply");
        assert!(samples.iter().any(|s| s.metric == "ping_status"));
    }
}
