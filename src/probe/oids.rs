//! Universal and vendor-specific OID tables
//!
//! Tier 1 is MIB-II (RFC 1213) plus the ifXTable 64-bit counters; it works
//! on any SNMP-capable device. Tier 2 is loaded per device after vendor
//! detection against the `sysObjectID` prefix map. Unknown vendors fall
//! back to the universal set only.

/// How a polled value should be interpreted when converted to a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OidKind {
    /// Monotonic counter (32 or 64 bit)
    Counter,
    /// Point-in-time gauge
    Gauge,
    /// Textual value, not shipped to the time-series store
    Text,
}

/// One pollable OID with its metric name
#[derive(Debug, Clone, Copy)]
pub struct OidSpec {
    /// Metric name used for time-series labels
    pub metric: &'static str,
    /// Numeric OID
    pub oid: &'static [u64],
    /// Value interpretation
    pub kind: OidKind,
    /// Whether the OID is a table column (walked) or a scalar (get)
    pub is_table: bool,
}

// ── System group (scalars) ─────────────────────────────────────────

/// sysDescr.0
pub const SYS_DESCR: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];
/// sysObjectID.0, the vendor detection input
pub const SYS_OBJECT_ID: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 2, 0];
/// sysUpTime.0
pub const SYS_UPTIME: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 3, 0];
/// sysName.0
pub const SYS_NAME: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 5, 0];
/// sysLocation.0
pub const SYS_LOCATION: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 6, 0];

// ── ifTable columns (walked during discovery) ──────────────────────

/// ifDescr
pub const IF_DESCR: &[u64] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 2];
/// ifType
pub const IF_TYPE: &[u64] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 3];
/// ifMtu
pub const IF_MTU: &[u64] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 4];
/// ifSpeed
pub const IF_SPEED: &[u64] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 5];
/// ifPhysAddress
pub const IF_PHYS_ADDRESS: &[u64] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 6];
/// ifAdminStatus (1=up, 2=down, 3=testing)
pub const IF_ADMIN_STATUS: &[u64] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 7];
/// ifOperStatus (1=up, 2=down)
pub const IF_OPER_STATUS: &[u64] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 8];
/// ifInDiscards
pub const IF_IN_DISCARDS: &[u64] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 13];
/// ifInErrors
pub const IF_IN_ERRORS: &[u64] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 14];
/// ifOutDiscards
pub const IF_OUT_DISCARDS: &[u64] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 19];
/// ifOutErrors
pub const IF_OUT_ERRORS: &[u64] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 20];

// ── ifXTable columns (64-bit counters and names) ───────────────────

/// ifName
pub const IF_NAME: &[u64] = &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 1];
/// ifHCInOctets
pub const IF_HC_IN_OCTETS: &[u64] = &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 6];
/// ifHCInUcastPkts
pub const IF_HC_IN_UCAST_PKTS: &[u64] = &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 7];
/// ifHCOutOctets
pub const IF_HC_OUT_OCTETS: &[u64] = &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 10];
/// ifHCOutUcastPkts
pub const IF_HC_OUT_UCAST_PKTS: &[u64] = &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 11];
/// ifHighSpeed (Mbps)
pub const IF_HIGH_SPEED: &[u64] = &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 15];
/// ifAlias
pub const IF_ALIAS: &[u64] = &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 18];

// ── LLDP remote table (IEEE 802.1AB) ───────────────────────────────

/// lldpRemChassisId
pub const LLDP_REM_CHASSIS_ID: &[u64] = &[1, 0, 8802, 1, 1, 2, 1, 4, 1, 1, 5];
/// lldpRemPortId
pub const LLDP_REM_PORT_ID: &[u64] = &[1, 0, 8802, 1, 1, 2, 1, 4, 1, 1, 7];
/// lldpRemPortDesc
pub const LLDP_REM_PORT_DESC: &[u64] = &[1, 0, 8802, 1, 1, 2, 1, 4, 1, 1, 8];
/// lldpRemSysName
pub const LLDP_REM_SYS_NAME: &[u64] = &[1, 0, 8802, 1, 1, 2, 1, 4, 1, 1, 9];

// ── CDP cache table (Cisco fallback) ───────────────────────────────

/// cdpCacheAddress
pub const CDP_CACHE_ADDRESS: &[u64] = &[1, 3, 6, 1, 4, 1, 9, 9, 23, 1, 2, 1, 1, 4];
/// cdpCacheDeviceId
pub const CDP_CACHE_DEVICE_ID: &[u64] = &[1, 3, 6, 1, 4, 1, 9, 9, 23, 1, 2, 1, 1, 6];
/// cdpCacheDevicePort
pub const CDP_CACHE_DEVICE_PORT: &[u64] = &[1, 3, 6, 1, 4, 1, 9, 9, 23, 1, 2, 1, 1, 7];
/// cdpCachePlatform
pub const CDP_CACHE_PLATFORM: &[u64] = &[1, 3, 6, 1, 4, 1, 9, 9, 23, 1, 2, 1, 1, 8];

/// Universal counters polled for every SNMP-enabled device
pub const UNIVERSAL_POLL_SET: &[OidSpec] = &[
    OidSpec {
        metric: "snmp_sys_uptime_ticks",
        oid: SYS_UPTIME,
        kind: OidKind::Gauge,
        is_table: false,
    },
    OidSpec {
        metric: "if_hc_in_octets",
        oid: IF_HC_IN_OCTETS,
        kind: OidKind::Counter,
        is_table: true,
    },
    OidSpec {
        metric: "if_hc_out_octets",
        oid: IF_HC_OUT_OCTETS,
        kind: OidKind::Counter,
        is_table: true,
    },
    OidSpec {
        metric: "if_in_errors",
        oid: IF_IN_ERRORS,
        kind: OidKind::Counter,
        is_table: true,
    },
    OidSpec {
        metric: "if_out_errors",
        oid: IF_OUT_ERRORS,
        kind: OidKind::Counter,
        is_table: true,
    },
    OidSpec {
        metric: "if_in_discards",
        oid: IF_IN_DISCARDS,
        kind: OidKind::Counter,
        is_table: true,
    },
    OidSpec {
        metric: "if_out_discards",
        oid: IF_OUT_DISCARDS,
        kind: OidKind::Counter,
        is_table: true,
    },
];

/// Interface metric poll set: HC octet/packet counters, errors, discards,
/// and operational status, walked per device by the interface-metrics job
pub const INTERFACE_COUNTER_SET: &[OidSpec] = &[
    OidSpec {
        metric: "if_hc_in_octets",
        oid: IF_HC_IN_OCTETS,
        kind: OidKind::Counter,
        is_table: true,
    },
    OidSpec {
        metric: "if_hc_out_octets",
        oid: IF_HC_OUT_OCTETS,
        kind: OidKind::Counter,
        is_table: true,
    },
    OidSpec {
        metric: "if_hc_in_ucast_pkts",
        oid: IF_HC_IN_UCAST_PKTS,
        kind: OidKind::Counter,
        is_table: true,
    },
    OidSpec {
        metric: "if_hc_out_ucast_pkts",
        oid: IF_HC_OUT_UCAST_PKTS,
        kind: OidKind::Counter,
        is_table: true,
    },
    OidSpec {
        metric: "if_in_errors",
        oid: IF_IN_ERRORS,
        kind: OidKind::Counter,
        is_table: true,
    },
    OidSpec {
        metric: "if_out_errors",
        oid: IF_OUT_ERRORS,
        kind: OidKind::Counter,
        is_table: true,
    },
    OidSpec {
        metric: "if_in_discards",
        oid: IF_IN_DISCARDS,
        kind: OidKind::Counter,
        is_table: true,
    },
    OidSpec {
        metric: "if_out_discards",
        oid: IF_OUT_DISCARDS,
        kind: OidKind::Counter,
        is_table: true,
    },
    OidSpec {
        metric: "if_oper_status",
        oid: IF_OPER_STATUS,
        kind: OidKind::Gauge,
        is_table: true,
    },
];

/// Maps a `sysObjectID` prefix to a vendor label
///
/// Longest-prefix semantics are unnecessary: enterprise numbers are the
/// third-from-root arc, so a simple starts-with scan is exact.
pub const VENDOR_DETECTION: &[(&str, &str)] = &[
    ("1.3.6.1.4.1.9.", "Cisco"),
    ("1.3.6.1.4.1.12356.", "Fortinet"),
    ("1.3.6.1.4.1.2636.", "Juniper"),
    ("1.3.6.1.4.1.11.", "HP"),
    ("1.3.6.1.4.1.14823.", "Aruba"),
    ("1.3.6.1.4.1.2011.", "Huawei"),
    ("1.3.6.1.4.1.14988.", "MikroTik"),
    ("1.3.6.1.4.1.41112.", "Ubiquiti"),
    ("1.3.6.1.4.1.25461.", "Palo Alto"),
    ("1.3.6.1.4.1.674.", "Dell"),
    ("1.3.6.1.4.1.30065.", "Arista"),
    ("1.3.6.1.4.1.1916.", "Extreme Networks"),
    ("1.3.6.1.4.1.2272.", "Checkpoint"),
    ("1.3.6.1.4.1.8072.", "Linux/Net-SNMP"),
    ("1.3.6.1.4.1.311.", "Microsoft Windows"),
    ("1.3.6.1.4.1.318.", "APC"),
    ("1.3.6.1.4.1.534.", "Eaton"),
    ("1.3.6.1.4.1.6876.", "VMware"),
];

/// Cisco CPU/memory/temperature health set
pub const CISCO_POLL_SET: &[OidSpec] = &[
    OidSpec {
        metric: "cisco_cpu_5s_pct",
        oid: &[1, 3, 6, 1, 4, 1, 9, 9, 109, 1, 1, 1, 1, 3],
        kind: OidKind::Gauge,
        is_table: true,
    },
    OidSpec {
        metric: "cisco_cpu_1m_pct",
        oid: &[1, 3, 6, 1, 4, 1, 9, 9, 109, 1, 1, 1, 1, 4],
        kind: OidKind::Gauge,
        is_table: true,
    },
    OidSpec {
        metric: "cisco_cpu_5m_pct",
        oid: &[1, 3, 6, 1, 4, 1, 9, 9, 109, 1, 1, 1, 1, 5],
        kind: OidKind::Gauge,
        is_table: true,
    },
    OidSpec {
        metric: "cisco_mem_used_bytes",
        oid: &[1, 3, 6, 1, 4, 1, 9, 9, 48, 1, 1, 1, 5],
        kind: OidKind::Gauge,
        is_table: true,
    },
    OidSpec {
        metric: "cisco_mem_free_bytes",
        oid: &[1, 3, 6, 1, 4, 1, 9, 9, 48, 1, 1, 1, 6],
        kind: OidKind::Gauge,
        is_table: true,
    },
    OidSpec {
        metric: "cisco_temp_celsius",
        oid: &[1, 3, 6, 1, 4, 1, 9, 9, 13, 1, 3, 1, 3],
        kind: OidKind::Gauge,
        is_table: true,
    },
];

/// Fortinet CPU/memory/session health set
pub const FORTINET_POLL_SET: &[OidSpec] = &[
    OidSpec {
        metric: "fortinet_cpu_pct",
        oid: &[1, 3, 6, 1, 4, 1, 12356, 101, 4, 1, 3, 0],
        kind: OidKind::Gauge,
        is_table: false,
    },
    OidSpec {
        metric: "fortinet_mem_pct",
        oid: &[1, 3, 6, 1, 4, 1, 12356, 101, 4, 1, 4, 0],
        kind: OidKind::Gauge,
        is_table: false,
    },
    OidSpec {
        metric: "fortinet_sessions",
        oid: &[1, 3, 6, 1, 4, 1, 12356, 101, 4, 1, 8, 0],
        kind: OidKind::Gauge,
        is_table: false,
    },
];

/// MikroTik CPU/memory/temperature health set
pub const MIKROTIK_POLL_SET: &[OidSpec] = &[
    OidSpec {
        metric: "mikrotik_cpu_pct",
        oid: &[1, 3, 6, 1, 4, 1, 14988, 1, 1, 3, 11, 0],
        kind: OidKind::Gauge,
        is_table: false,
    },
    OidSpec {
        metric: "mikrotik_temp_celsius",
        oid: &[1, 3, 6, 1, 4, 1, 14988, 1, 1, 3, 10, 0],
        kind: OidKind::Gauge,
        is_table: false,
    },
];

/// Net-SNMP (Linux) host resource set
pub const NET_SNMP_POLL_SET: &[OidSpec] = &[
    OidSpec {
        metric: "host_cpu_idle_pct",
        oid: &[1, 3, 6, 1, 4, 1, 2021, 11, 53, 0],
        kind: OidKind::Counter,
        is_table: false,
    },
    OidSpec {
        metric: "host_load_1m",
        oid: &[1, 3, 6, 1, 4, 1, 2021, 10, 1, 3, 1],
        kind: OidKind::Gauge,
        is_table: false,
    },
    OidSpec {
        metric: "host_mem_free_kb",
        oid: &[1, 3, 6, 1, 4, 1, 2021, 4, 6, 0],
        kind: OidKind::Gauge,
        is_table: false,
    },
];

/// Detects a vendor from a `sysObjectID` value in dotted form
#[must_use]
pub fn detect_vendor(sys_object_id: &str) -> Option<&'static str> {
    let normalized = if sys_object_id.ends_with('.') {
        sys_object_id.to_string()
    } else {
        format!("{sys_object_id}.")
    };
    VENDOR_DETECTION
        .iter()
        .find(|(prefix, _)| normalized.starts_with(prefix))
        .map(|(_, vendor)| *vendor)
}

/// The vendor-specific poll set for a detected vendor, when one exists
#[must_use]
pub fn vendor_poll_set(vendor: &str) -> Option<&'static [OidSpec]> {
    match vendor {
        "Cisco" => Some(CISCO_POLL_SET),
        "Fortinet" => Some(FORTINET_POLL_SET),
        "MikroTik" => Some(MIKROTIK_POLL_SET),
        "Linux/Net-SNMP" => Some(NET_SNMP_POLL_SET),
        _ => None,
    }
}

/// Renders an OID slice in dotted form
#[must_use]
pub fn to_dotted(oid: &[u64]) -> String {
    oid.iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(".")
}
