//! SNMP prober over snmp2 sessions
//!
//! Sessions are synchronous UDP exchanges, so each request batch runs on the
//! blocking pool with an outer tokio deadline; a semaphore bounds the number
//! of in-flight exchanges across all workers. GETBULK is preferred whenever
//! more than one value is requested, falling back to plain GET for single
//! scalars.
//!
//! SNMPv3 construction is confined to [`build_v3_auth`] so the protocol
//! mapping has exactly one audit point.

use async_trait::async_trait;
use snmp2::{Oid, SyncSession, Value};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::ProbeConfig;
use crate::probe::{
    AuthProtocol, PrivProtocol, ProbeError, SecurityLevel, SnmpCredential, SnmpTarget,
};

/// Owned, typed SNMP value
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpValue {
    /// INTEGER
    Integer(i64),
    /// Counter32
    Counter32(u32),
    /// Counter64
    Counter64(u64),
    /// Gauge32 / Unsigned32
    Gauge(u32),
    /// TimeTicks (hundredths of a second)
    Timeticks(u32),
    /// OCTET STRING
    OctetString(Vec<u8>),
    /// OBJECT IDENTIFIER, dotted
    Oid(String),
    /// IpAddress
    IpAddress([u8; 4]),
    /// NULL, noSuchObject, noSuchInstance, endOfMibView
    Null,
}

impl SnmpValue {
    /// Numeric view for counters and gauges
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Integer(v) => u64::try_from(*v).ok(),
            Self::Counter32(v) | Self::Gauge(v) | Self::Timeticks(v) => Some(u64::from(*v)),
            Self::Counter64(v) => Some(*v),
            _ => None,
        }
    }

    /// Signed numeric view
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Counter32(v) | Self::Gauge(v) | Self::Timeticks(v) => Some(i64::from(*v)),
            Self::Counter64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Text view; octet strings are decoded lossily
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::OctetString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            Self::Oid(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Formats an OCTET STRING as a colon-separated MAC address
    #[must_use]
    pub fn as_mac(&self) -> Option<String> {
        match self {
            Self::OctetString(bytes) if bytes.len() == 6 => Some(
                bytes
                    .iter()
                    .map(|b| format!("{b:02x}"))
                    .collect::<Vec<_>>()
                    .join(":"),
            ),
            _ => None,
        }
    }
}

/// SNMP polling seam used by workers and discovery pipelines
#[async_trait]
pub trait SnmpClient: Send + Sync {
    /// GET of a single scalar
    async fn get(&self, target: &SnmpTarget, oid: &[u64]) -> Result<SnmpValue, ProbeError>;

    /// Multi-scalar fetch; prefers one GETBULK exchange over N GETs.
    /// Returns `(dotted_oid, value)` pairs for the instances that answered.
    async fn get_many(
        &self,
        target: &SnmpTarget,
        oids: &[&[u64]],
    ) -> Result<Vec<(String, SnmpValue)>, ProbeError>;

    /// Walks a subtree, returning `(dotted_oid, value)` pairs in order
    async fn walk(
        &self,
        target: &SnmpTarget,
        base: &[u64],
    ) -> Result<Vec<(String, SnmpValue)>, ProbeError>;
}

/// Production SNMP poller
pub struct SnmpPoller {
    limiter: Arc<Semaphore>,
    walk_max: usize,
}

impl SnmpPoller {
    /// Creates the poller with the configured concurrency bound
    #[must_use]
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            limiter: Arc::new(Semaphore::new(config.snmp_concurrency.as_usize())),
            walk_max: config.snmp_walk_max,
        }
    }

    /// Outer deadline for a whole exchange including retries
    fn deadline(target: &SnmpTarget) -> Duration {
        target.timeout * (u32::from(target.retries) + 1) + Duration::from_secs(1)
    }

    async fn run_blocking<T, F>(&self, target: &SnmpTarget, op: F) -> Result<T, ProbeError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SyncSession) -> Result<T, ProbeError> + Send + 'static,
    {
        let _permit = self
            .limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProbeError::Cancelled)?;

        let ip = target.ip;
        let deadline = Self::deadline(target);
        let owned_target = target.clone();

        let task = tokio::task::spawn_blocking(move || {
            let mut session = open_session(&owned_target)?;
            op(&mut session)
        });

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(ProbeError::Snmp {
                ip,
                message: format!("probe task failed: {join_error}"),
            }),
            Err(_) => Err(ProbeError::Timeout {
                ip,
                timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

#[async_trait]
impl SnmpClient for SnmpPoller {
    async fn get(&self, target: &SnmpTarget, oid: &[u64]) -> Result<SnmpValue, ProbeError> {
        let ip = target.ip;
        let retries = target.retries;
        let oid_owned = oid.to_vec();
        self.run_blocking(target, move |session| {
            let oid = build_oid(&oid_owned)?;
            let mut last_error = None;
            for _ in 0..=retries {
                match session.get(&oid) {
                    Ok(pdu) => {
                        let mut values = collect_varbinds(pdu);
                        if let Some((_, value)) = values.pop() {
                            return Ok(value);
                        }
                        return Ok(SnmpValue::Null);
                    }
                    Err(e) => last_error = Some(e),
                }
            }
            Err(classify_error(ip, &last_error))
        })
        .await
    }

    async fn get_many(
        &self,
        target: &SnmpTarget,
        oids: &[&[u64]],
    ) -> Result<Vec<(String, SnmpValue)>, ProbeError> {
        if oids.is_empty() {
            return Ok(Vec::new());
        }
        let ip = target.ip;
        let retries = target.retries;
        // GETBULK non-repeaters behave as GETNEXT: requesting the scalar
        // node (without the .0 instance) yields the .0 instance back.
        let requested: Vec<Vec<u64>> = oids
            .iter()
            .map(|oid| {
                if oid.last() == Some(&0) {
                    oid[..oid.len() - 1].to_vec()
                } else {
                    oid.to_vec()
                }
            })
            .collect();

        self.run_blocking(target, move |session| {
            let built: Vec<Oid<'_>> = requested
                .iter()
                .map(|parts| build_oid(parts))
                .collect::<Result<_, _>>()?;
            let refs: Vec<&Oid<'_>> = built.iter().collect();
            let non_repeaters = u32::try_from(refs.len()).unwrap_or(u32::MAX);

            let mut last_error = None;
            for _ in 0..=retries {
                match session.getbulk(&refs, non_repeaters, 0) {
                    Ok(pdu) => return Ok(collect_varbinds(pdu)),
                    Err(e) => last_error = Some(e),
                }
            }
            Err(classify_error(ip, &last_error))
        })
        .await
    }

    async fn walk(
        &self,
        target: &SnmpTarget,
        base: &[u64],
    ) -> Result<Vec<(String, SnmpValue)>, ProbeError> {
        let ip = target.ip;
        let retries = target.retries;
        let walk_max = self.walk_max;
        let base_owned = base.to_vec();
        let base_dotted = super::oids::to_dotted(base);

        self.run_blocking(target, move |session| {
            let mut results: Vec<(String, SnmpValue)> = Vec::new();
            let mut cursor = base_owned.clone();

            'walk: while results.len() < walk_max {
                let oid = build_oid(&cursor)?;
                let mut attempt_error = None;
                let mut rows = None;
                for _ in 0..=retries {
                    match session.getbulk(&[&oid], 0, 32) {
                        Ok(pdu) => {
                            rows = Some(collect_varbinds(pdu));
                            break;
                        }
                        Err(e) => attempt_error = Some(e),
                    }
                }
                let Some(rows) = rows else {
                    return Err(classify_error(ip, &attempt_error));
                };
                if rows.is_empty() {
                    break;
                }

                let mut advanced = false;
                for (dotted, value) in rows {
                    if !in_subtree(&dotted, &base_dotted) {
                        break 'walk;
                    }
                    cursor = parse_dotted(&dotted)
                        .ok_or_else(|| ProbeError::MalformedOid { oid: dotted.clone() })?;
                    results.push((dotted, value));
                    advanced = true;
                    if results.len() >= walk_max {
                        break 'walk;
                    }
                }
                if !advanced {
                    break;
                }
            }

            debug!(%ip, base = %base_dotted, rows = results.len(), "walk finished");
            Ok(results)
        })
        .await
    }
}

/// Opens a session for the target's credential
fn open_session(target: &SnmpTarget) -> Result<SyncSession, ProbeError> {
    let addr = target.socket_addr();
    match &target.credential {
        SnmpCredential::V2c { community } => {
            SyncSession::new_v2c(addr.as_str(), community.as_bytes(), Some(target.timeout), 0)
                .map_err(|e| ProbeError::Snmp {
                    ip: target.ip,
                    message: format!("session open failed: {e:?}"),
                })
        }
        SnmpCredential::V3 {
            user,
            auth_protocol,
            auth_key,
            priv_protocol,
            priv_key,
            level,
        } => {
            let security = build_v3_auth(
                user,
                *auth_protocol,
                auth_key.as_deref(),
                *priv_protocol,
                priv_key.as_deref(),
                *level,
            )?;
            SyncSession::new_v3(addr.as_str(), Some(target.timeout), 0, security).map_err(|e| {
                ProbeError::Snmp {
                    ip: target.ip,
                    message: format!("v3 session open failed: {e:?}"),
                }
            })
        }
    }
}

/// Maps the stored credential onto the wire-level v3 security parameters
fn build_v3_auth(
    user: &str,
    auth_protocol: Option<AuthProtocol>,
    auth_key: Option<&str>,
    priv_protocol: Option<PrivProtocol>,
    priv_key: Option<&str>,
    level: SecurityLevel,
) -> Result<snmp2::v3::Security, ProbeError> {
    use snmp2::v3::{Auth, AuthProtocol as WireAuth, Cipher as WirePriv, Security};

    let wire_auth = |p: AuthProtocol| match p {
        AuthProtocol::Md5 => WireAuth::Md5,
        AuthProtocol::Sha => WireAuth::Sha1,
    };
    let wire_priv = |p: PrivProtocol| match p {
        PrivProtocol::Des => WirePriv::Des,
        PrivProtocol::Aes => WirePriv::Aes128,
    };
    let missing = |what: &str| ProbeError::CredentialMissing {
        reason: format!("v3 level requires {what}"),
    };

    match level {
        SecurityLevel::NoAuthNoPriv => {
            Ok(Security::new(user.as_bytes(), &[]).with_auth(Auth::NoAuthNoPriv))
        }
        SecurityLevel::AuthNoPriv => {
            let protocol = auth_protocol.ok_or_else(|| missing("an auth protocol"))?;
            let key = auth_key.ok_or_else(|| missing("an auth key"))?;
            Ok(Security::new(user.as_bytes(), key.as_bytes())
                .with_auth(Auth::AuthNoPriv)
                .with_auth_protocol(wire_auth(protocol)))
        }
        SecurityLevel::AuthPriv => {
            let protocol = auth_protocol.ok_or_else(|| missing("an auth protocol"))?;
            let key = auth_key.ok_or_else(|| missing("an auth key"))?;
            let privacy = priv_protocol.ok_or_else(|| missing("a privacy protocol"))?;
            let privacy_key = priv_key.ok_or_else(|| missing("a privacy key"))?;
            Ok(Security::new(user.as_bytes(), key.as_bytes())
                .with_auth(Auth::AuthPriv {
                    cipher: wire_priv(privacy),
                    privacy_password: privacy_key.as_bytes().to_vec(),
                })
                .with_auth_protocol(wire_auth(protocol)))
        }
    }
}

fn build_oid(parts: &[u64]) -> Result<Oid<'static>, ProbeError> {
    Oid::from(parts).map_err(|_| ProbeError::MalformedOid {
        oid: super::oids::to_dotted(parts),
    })
}

fn collect_varbinds(pdu: snmp2::Pdu<'_>) -> Vec<(String, SnmpValue)> {
    pdu.varbinds
        .into_iter()
        .map(|(oid, value)| (oid.to_string(), to_owned_value(&value)))
        .collect()
}

fn to_owned_value(value: &Value<'_>) -> SnmpValue {
    match value {
        Value::Integer(v) => SnmpValue::Integer(*v),
        Value::Counter32(v) => SnmpValue::Counter32(*v),
        Value::Counter64(v) => SnmpValue::Counter64(*v),
        Value::Unsigned32(v) => SnmpValue::Gauge(*v),
        Value::Timeticks(v) => SnmpValue::Timeticks(*v),
        Value::OctetString(bytes) => SnmpValue::OctetString(bytes.to_vec()),
        Value::ObjectIdentifier(oid) => SnmpValue::Oid(oid.to_string()),
        Value::IpAddress(octets) => SnmpValue::IpAddress(*octets),
        _ => SnmpValue::Null,
    }
}

fn classify_error(ip: IpAddr, error: &Option<snmp2::Error>) -> ProbeError {
    let message = error
        .as_ref()
        .map_or_else(|| "no response".to_string(), |e| format!("{e:?}"));
    let lowered = message.to_lowercase();
    if lowered.contains("auth") || lowered.contains("credential") {
        ProbeError::AuthFailed { ip }
    } else if lowered.contains("timed out") || lowered.contains("wouldblock") {
        ProbeError::Timeout { ip, timeout_ms: 0 }
    } else {
        ProbeError::Snmp { ip, message }
    }
}

/// True when `dotted` lies under the `base` subtree
#[must_use]
pub fn in_subtree(dotted: &str, base_dotted: &str) -> bool {
    dotted == base_dotted || dotted.starts_with(&format!("{base_dotted}."))
}

/// Parses a dotted OID back into numeric parts
#[must_use]
pub fn parse_dotted(dotted: &str) -> Option<Vec<u64>> {
    dotted
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

/// The index components that remain after stripping a table-column prefix
#[must_use]
pub fn index_suffix(dotted: &str, base: &[u64]) -> Option<Vec<u64>> {
    let base_dotted = super::oids::to_dotted(base);
    let rest = dotted.strip_prefix(&format!("{base_dotted}."))?;
    parse_dotted(rest)
}

/// The single trailing index of a one-dimensional table column
#[must_use]
pub fn table_index(dotted: &str, base: &[u64]) -> Option<u32> {
    let suffix = index_suffix(dotted, base)?;
    match suffix.as_slice() {
        [index] => u32::try_from(*index).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::oids;

    #[test]
    fn test_should_extract_table_index_when_oid_is_under_column() {
        let dotted = "1.3.6.1.2.1.2.2.1.2.42";
        assert_eq!(table_index(dotted, oids::IF_DESCR), Some(42));
        assert_eq!(table_index(dotted, oids::IF_TYPE), None);
    }

    #[test]
    fn test_should_extract_multipart_suffix_when_table_is_multi_indexed() {
        // lldpRemSysName is indexed (timeMark, localPortNum, index)
        let dotted = "1.0.8802.1.1.2.1.4.1.1.9.0.7.1";
        let suffix = index_suffix(dotted, oids::LLDP_REM_SYS_NAME).expect("suffix");
        assert_eq!(suffix, vec![0, 7, 1]);
    }

    #[test]
    fn test_should_detect_subtree_membership_when_walking() {
        assert!(in_subtree("1.3.6.1.2.1.2.2.1.2.1", "1.3.6.1.2.1.2.2.1.2"));
        assert!(!in_subtree("1.3.6.1.2.1.2.2.1.20.1", "1.3.6.1.2.1.2.2.1.2"));
    }

    #[test]
    fn test_should_convert_numeric_values_when_reading_counters() {
        assert_eq!(SnmpValue::Counter64(10).as_u64(), Some(10));
        assert_eq!(SnmpValue::Integer(-1).as_u64(), None);
        assert_eq!(SnmpValue::Gauge(7).as_i64(), Some(7));
        assert_eq!(
            SnmpValue::OctetString(b"Gi0/0".to_vec()).as_text().as_deref(),
            Some("Gi0/0")
        );
    }

    #[test]
    fn test_should_format_mac_address_when_octet_string_is_six_bytes() {
        let mac = SnmpValue::OctetString(vec![0x00, 0x11, 0x22, 0xaa, 0xbb, 0xcc]);
        assert_eq!(mac.as_mac().as_deref(), Some("00:11:22:aa:bb:cc"));
        assert_eq!(SnmpValue::OctetString(vec![1, 2]).as_mac(), None);
    }

    #[test]
    fn test_should_require_auth_material_when_level_demands_it() {
        let result = build_v3_auth("monitor", None, None, None, None, SecurityLevel::AuthNoPriv);
        assert!(matches!(
            result,
            Err(ProbeError::CredentialMissing { .. })
        ));
    }
}
