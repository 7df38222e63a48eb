//! End-to-end state machine scenarios: outage duration preservation across
//! DOWN cycles and flap suppression, driven through the real ping worker
//! against a real SQLite store with a scripted prober and a frozen clock.

mod support;

use branchwatch::alerts::{
    AlertEvaluator, RULE_DEVICE_FLAPPING, RULE_DEVICE_UNREACHABLE, dedup,
};
use branchwatch::cache::TtlCache;
use branchwatch::config::AlertThresholds;
use branchwatch::domain_types::{ChannelCapacity, RuleName, Severity};
use branchwatch::events::ChangeStream;
use branchwatch::storage::{
    AlertFilter, AlertStore, DeviceState, DeviceStore, NewAlert, NewDevice, SqliteAlertStore,
    SqliteDeviceStore, SqliteInterfaceStore,
};
use branchwatch::time_provider::FixedTimeProvider;
use branchwatch::workers::PingWorker;
use chrono::{TimeZone, Utc};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use support::{RecordingTimeseries, ScriptedProbe, test_database};

struct Rig {
    devices: Arc<SqliteDeviceStore>,
    alerts: Arc<SqliteAlertStore>,
    probe: Arc<ScriptedProbe>,
    timeseries: Arc<RecordingTimeseries>,
    events: Arc<ChangeStream>,
    clock: FixedTimeProvider,
    worker: PingWorker,
    evaluator: AlertEvaluator,
}

async fn rig(dir: &tempfile::TempDir, start: chrono::DateTime<Utc>) -> Rig {
    let connection = test_database(dir).await;
    let devices = Arc::new(SqliteDeviceStore::new(connection.clone()));
    let interfaces = Arc::new(SqliteInterfaceStore::new(connection.clone()));
    let alerts = Arc::new(SqliteAlertStore::new(connection));
    let probe = Arc::new(ScriptedProbe::new());
    let timeseries = Arc::new(RecordingTimeseries::new());
    let events = Arc::new(ChangeStream::new(ChannelCapacity::try_new(64).unwrap()));
    let cache = Arc::new(TtlCache::new());
    let clock = FixedTimeProvider::at(start);

    let worker = PingWorker::new(
        devices.clone(),
        alerts.clone(),
        probe.clone(),
        timeseries.clone(),
        events.clone(),
        cache,
        Arc::new(clock.clone()),
    );
    let evaluator = AlertEvaluator::new(
        devices.clone(),
        interfaces,
        alerts.clone(),
        AlertThresholds::default(),
        Arc::new(clock.clone()),
    );
    Rig {
        devices,
        alerts,
        probe,
        timeseries,
        events,
        clock,
        worker,
        evaluator,
    }
}

const DEVICE_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

#[tokio::test]
async fn test_should_preserve_downtime_when_device_recovers_after_restarts() {
    let dir = tempfile::tempdir().expect("temp dir");
    let outage_start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let rig = rig(&dir, outage_start).await;

    let id = rig
        .devices
        .upsert_device(&NewDevice::bare(DEVICE_IP, "branch-router"))
        .await
        .expect("device");
    rig.devices
        .update_state(
            id,
            &DeviceState {
                down_since: Some(outage_start),
                ..DeviceState::default()
            },
        )
        .await
        .expect("seed outage");
    rig.alerts
        .create_if_absent(&NewAlert {
            device_id: id,
            rule_name: RuleName::try_new(RULE_DEVICE_UNREACHABLE).unwrap(),
            severity: Severity::Critical,
            message: "Device branch-router (10.0.0.1) is unreachable".to_string(),
            value: Some("down".to_string()),
            threshold: None,
            triggered_at: outage_start,
        })
        .await
        .expect("seed alert");

    // Three DOWN samples; down_since must never move forward.
    for minute in [1, 2, 3] {
        rig.clock
            .set(Utc.with_ymd_and_hms(2025, 1, 1, 0, minute, 0).unwrap());
        rig.probe.push(DEVICE_IP, ScriptedProbe::dead());
        let summary = rig.worker.run_batch(&[id]).await;
        assert_eq!(summary.probed, 1);
        assert_eq!(summary.transitions, 0, "DOWN->DOWN is not a transition");

        let device = rig
            .devices
            .get_device(id)
            .await
            .expect("lookup")
            .expect("device exists");
        assert_eq!(
            device.state.down_since,
            Some(outage_start),
            "down_since must stay at the original outage start"
        );
    }

    // Recovery at 00:05.
    let recovery = Utc.with_ymd_and_hms(2025, 1, 1, 0, 5, 0).unwrap();
    rig.clock.set(recovery);
    rig.probe.push(DEVICE_IP, ScriptedProbe::alive(12.0));
    let mut subscription = rig.events.subscribe();
    let summary = rig.worker.run_batch(&[id]).await;
    assert_eq!(summary.transitions, 1);

    let device = rig
        .devices
        .get_device(id)
        .await
        .expect("lookup")
        .expect("device exists");
    assert_eq!(device.state.down_since, None);

    let resolved = rig
        .alerts
        .list_alerts(&AlertFilter {
            device_id: Some(id),
            active: Some(false),
            ..AlertFilter::default()
        })
        .await
        .expect("resolved listing");
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].resolved_at, Some(recovery));

    let event = subscription.recv().await.expect("recovery event");
    assert_eq!(event.downtime_secs, Some(300), "outage lasted five minutes");

    // The recovery sample reached the time-series sink.
    assert!(
        rig.timeseries
            .written()
            .iter()
            .any(|s| s.metric == "ping_status"),
        "ping samples were shipped"
    );
}

#[tokio::test]
async fn test_should_suppress_transition_alerts_when_device_flaps() {
    let dir = tempfile::tempdir().expect("temp dir");
    let start = Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap();
    let rig = rig(&dir, start).await;

    let id = rig
        .devices
        .upsert_device(&NewDevice::bare(DEVICE_IP, "flappy-ap"))
        .await
        .expect("device");

    // Alternate UP/DOWN every 60 seconds for 5 samples.
    for (i, alive) in [false, true, false, true, false].into_iter().enumerate() {
        rig.clock
            .set(start + chrono::Duration::minutes(i64::try_from(i).unwrap()));
        rig.probe.push(
            DEVICE_IP,
            if alive {
                ScriptedProbe::alive(8.0)
            } else {
                ScriptedProbe::dead()
            },
        );
        rig.worker.run_batch(&[id]).await;

        let device = rig
            .devices
            .get_device(id)
            .await
            .expect("lookup")
            .expect("device exists");
        if i >= 2 {
            assert!(
                device.state.is_flapping,
                "flapping engages on the third transition"
            );
        }
    }

    let all = rig
        .alerts
        .list_alerts(&AlertFilter {
            device_id: Some(id),
            ..AlertFilter::default()
        })
        .await
        .expect("alert listing");

    let flapping: Vec<_> = all
        .iter()
        .filter(|a| a.rule_name.as_str() == RULE_DEVICE_FLAPPING)
        .collect();
    assert_eq!(flapping.len(), 1, "exactly one flapping alert");
    assert!(flapping[0].resolved_at.is_none());

    assert!(
        !all.iter()
            .any(|a| a.rule_name.as_str() == RULE_DEVICE_UNREACHABLE),
        "no unreachable rows were created across the flap"
    );
}

#[tokio::test]
async fn test_should_raise_no_unreachable_rows_when_worker_and_evaluator_share_a_flap() {
    let dir = tempfile::tempdir().expect("temp dir");
    let start = Utc.with_ymd_and_hms(2025, 2, 2, 12, 0, 0).unwrap();
    let rig = rig(&dir, start).await;

    let id = rig
        .devices
        .upsert_device(&NewDevice::bare(DEVICE_IP, "flappy-ap"))
        .await
        .expect("device");

    // Live cadences: a ping sample every 60s, evaluator ticks every 10s in
    // between, all on the same clock. The first two down periods are the
    // dangerous ones; `is_flapping` is still false there.
    for (i, alive) in [false, true, false, true, false].into_iter().enumerate() {
        let sample_at = start + chrono::Duration::minutes(i64::try_from(i).unwrap());
        rig.clock.set(sample_at);
        rig.probe.push(
            DEVICE_IP,
            if alive {
                ScriptedProbe::alive(8.0)
            } else {
                ScriptedProbe::dead()
            },
        );
        rig.worker.run_batch(&[id]).await;

        for tick in 1..6 {
            rig.clock
                .set(sample_at + chrono::Duration::seconds(tick * 10));
            rig.evaluator.run_cycle().await.expect("evaluator tick");
        }
    }

    let all = rig
        .alerts
        .list_alerts(&AlertFilter {
            device_id: Some(id),
            ..AlertFilter::default()
        })
        .await
        .expect("alert listing");

    let unreachable_rules = dedup::group_of(RULE_DEVICE_UNREACHABLE)
        .expect("built-in group")
        .rules;
    assert!(
        all.iter()
            .all(|a| !unreachable_rules.contains(&a.rule_name.as_str())),
        "no unreachable rows may exist, active or resolved: {all:?}"
    );

    let flapping: Vec<_> = all
        .iter()
        .filter(|a| a.rule_name.as_str() == RULE_DEVICE_FLAPPING && a.resolved_at.is_none())
        .collect();
    assert_eq!(flapping.len(), 1, "exactly one active flapping alert");
}

#[tokio::test]
async fn test_should_resolve_flapping_alert_when_window_quiets_down() {
    let dir = tempfile::tempdir().expect("temp dir");
    let start = Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap();
    let rig = rig(&dir, start).await;

    let id = rig
        .devices
        .upsert_device(&NewDevice::bare(DEVICE_IP, "flappy-ap"))
        .await
        .expect("device");

    for (i, alive) in [false, true, false, true].into_iter().enumerate() {
        rig.clock
            .set(start + chrono::Duration::minutes(i64::try_from(i).unwrap()));
        rig.probe.push(
            DEVICE_IP,
            if alive {
                ScriptedProbe::alive(8.0)
            } else {
                ScriptedProbe::dead()
            },
        );
        rig.worker.run_batch(&[id]).await;
    }

    // Twenty quiet minutes later a steady UP sample clears suppression.
    rig.clock.set(start + chrono::Duration::minutes(24));
    rig.probe.push(DEVICE_IP, ScriptedProbe::alive(8.0));
    rig.worker.run_batch(&[id]).await;

    let device = rig
        .devices
        .get_device(id)
        .await
        .expect("lookup")
        .expect("device exists");
    assert!(!device.state.is_flapping);

    let active = rig.alerts.active_for_device(id).await.expect("actives");
    assert!(
        active
            .iter()
            .all(|a| a.rule_name.as_str() != RULE_DEVICE_FLAPPING),
        "flapping alert resolves once the window quiets"
    );
}
