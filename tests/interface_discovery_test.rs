//! Interface discovery end-to-end: IF-MIB walk rows become classified
//! interface rows, rediscovery is idempotent, and loopbacks are recorded
//! without entering critical monitoring.

mod support;

use branchwatch::config::ProbeConfig;
use branchwatch::crypto::CredentialCipher;
use branchwatch::probe::SnmpValue;
use branchwatch::probe::oids;
use branchwatch::storage::{
    DeviceStore, InterfaceKind, InterfaceStore, NewDevice, SqliteDeviceStore,
    SqliteInterfaceStore,
};
use branchwatch::time_provider::FixedTimeProvider;
use branchwatch::workers::{InterfaceDiscoveryWorker, SnmpAccess};
use chrono::{TimeZone, Utc};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use support::{ScriptedSnmp, test_database};

fn column_row(base: &[u64], index: u32, value: SnmpValue) -> (String, SnmpValue) {
    (format!("{}.{index}", oids::to_dotted(base)), value)
}

fn text(value: &str) -> SnmpValue {
    SnmpValue::OctetString(value.as_bytes().to_vec())
}

/// Scripts a three-interface router: an ISP uplink, an access port, and a
/// loopback.
fn script_if_mib(snmp: &ScriptedSnmp) {
    snmp.script_walk(
        oids::IF_DESCR,
        vec![
            column_row(oids::IF_DESCR, 1, text("GigabitEthernet0/0")),
            column_row(oids::IF_DESCR, 2, text("GigabitEthernet0/1")),
            column_row(oids::IF_DESCR, 3, text("Loopback0")),
        ],
    );
    snmp.script_walk(
        oids::IF_NAME,
        vec![
            column_row(oids::IF_NAME, 1, text("Gi0/0")),
            column_row(oids::IF_NAME, 2, text("Gi0/1")),
            column_row(oids::IF_NAME, 3, text("Lo0")),
        ],
    );
    snmp.script_walk(
        oids::IF_ALIAS,
        vec![
            column_row(oids::IF_ALIAS, 1, text("Magti_Internet")),
            column_row(oids::IF_ALIAS, 2, text("user_port")),
        ],
    );
    snmp.script_walk(
        oids::IF_TYPE,
        vec![
            column_row(oids::IF_TYPE, 1, SnmpValue::Integer(6)),
            column_row(oids::IF_TYPE, 2, SnmpValue::Integer(6)),
            column_row(oids::IF_TYPE, 3, SnmpValue::Integer(24)),
        ],
    );
    snmp.script_walk(
        oids::IF_OPER_STATUS,
        vec![
            column_row(oids::IF_OPER_STATUS, 1, SnmpValue::Integer(1)),
            column_row(oids::IF_OPER_STATUS, 2, SnmpValue::Integer(2)),
            column_row(oids::IF_OPER_STATUS, 3, SnmpValue::Integer(1)),
        ],
    );
    snmp.script_walk(
        oids::IF_HIGH_SPEED,
        vec![column_row(oids::IF_HIGH_SPEED, 1, SnmpValue::Gauge(1000))],
    );
}

#[tokio::test]
async fn test_should_mirror_walk_results_when_discovering_twice() {
    let dir = tempfile::tempdir().expect("temp dir");
    let connection = test_database(&dir).await;
    let devices = Arc::new(SqliteDeviceStore::new(connection.clone()));
    let interfaces = Arc::new(SqliteInterfaceStore::new(connection));
    let snmp = Arc::new(ScriptedSnmp::new());
    script_if_mib(&snmp);

    let clock = FixedTimeProvider::at(Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap());
    let worker = InterfaceDiscoveryWorker::new(
        devices.clone(),
        interfaces.clone(),
        snmp,
        SnmpAccess::new(
            CredentialCipher::from_passphrase("test-key"),
            "public".to_string(),
            &ProbeConfig::default(),
        ),
        Arc::new(clock.clone()),
    );

    let id = devices
        .upsert_device(&NewDevice::bare(
            IpAddr::V4(Ipv4Addr::new(10, 2, 0, 5)),
            "branch-router",
        ))
        .await
        .expect("device");

    let first = worker.run_batch(&[id]).await;
    assert_eq!(first.devices, 1);
    assert_eq!(first.interfaces, 3, "one row per distinct ifIndex");

    let rows = interfaces.list_for_device(id).await.expect("listing");
    assert_eq!(rows.len(), 3);

    let uplink = rows
        .iter()
        .find(|i| i.if_index.as_u32() == 1)
        .expect("uplink row");
    assert_eq!(uplink.classification.interface_type, InterfaceKind::Isp);
    assert_eq!(uplink.classification.isp_provider.as_deref(), Some("magti"));
    assert!(uplink.classification.is_critical);
    assert_eq!(uplink.snapshot.speed_bps, Some(1_000_000_000));

    let loopback = rows
        .iter()
        .find(|i| i.if_index.as_u32() == 3)
        .expect("loopback row");
    assert_eq!(
        loopback.classification.interface_type,
        InterfaceKind::Loopback
    );
    assert!(!loopback.is_monitored_critical());

    // Rediscovery yields the same rows and classifications.
    clock.advance(chrono::Duration::hours(6));
    let second = worker.run_batch(&[id]).await;
    assert_eq!(second.interfaces, 3);

    let rows_again = interfaces.list_for_device(id).await.expect("listing");
    assert_eq!(rows_again.len(), 3, "no duplicate rows on rediscovery");
    for (before, after) in rows.iter().zip(rows_again.iter()) {
        assert_eq!(before.id, after.id, "row identity is stable");
        assert_eq!(
            before.classification.interface_type,
            after.classification.interface_type
        );
    }
    assert!(
        rows_again
            .iter()
            .all(|i| i.last_seen > rows.iter().find(|b| b.id == i.id).unwrap().last_seen),
        "last_seen refreshes on every successful walk"
    );

    let critical = interfaces.list_critical().await.expect("critical listing");
    assert_eq!(critical.len(), 1, "only the ISP uplink is critical");
}
