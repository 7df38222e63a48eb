//! Probers: ICMP reachability and SNMP polling
//!
//! Both probers sit behind traits so workers and discovery pipelines can be
//! driven with mock transports in tests. The production implementations are
//! [`icmp::IcmpProber`] (surge-ping, bounded by a semaphore) and
//! [`snmp::SnmpPoller`] (snmp2 sessions driven through blocking tasks with
//! explicit deadlines).

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

use crate::crypto::{CredentialCipher, CryptoError};

pub mod icmp;
pub mod oids;
pub mod snmp;

pub use icmp::{IcmpProber, PingOutcome, ReachabilityProbe};
pub use snmp::{SnmpClient, SnmpPoller, SnmpValue};

/// Probe errors
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ICMP error for {ip}: {message}")]
    Icmp { ip: IpAddr, message: String },

    #[error("SNMP error for {ip}: {message}")]
    Snmp { ip: IpAddr, message: String },

    #[error("SNMP timeout for {ip} after {timeout_ms}ms")]
    Timeout { ip: IpAddr, timeout_ms: u64 },

    #[error("SNMP authentication failed for {ip}")]
    AuthFailed { ip: IpAddr },

    #[error("Device has no usable SNMP credential: {reason}")]
    CredentialMissing { reason: String },

    #[error("Credential error: {0}")]
    Credential(#[from] CryptoError),

    #[error("Malformed OID: {oid}")]
    MalformedOid { oid: String },

    #[error("Probe task was cancelled")]
    Cancelled,
}

/// Security level for SNMPv3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// No authentication, no privacy
    NoAuthNoPriv,
    /// Authentication only
    AuthNoPriv,
    /// Authentication and privacy
    AuthPriv,
}

/// SNMPv3 authentication protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProtocol {
    /// HMAC-MD5-96
    Md5,
    /// HMAC-SHA-96
    Sha,
}

/// SNMPv3 privacy protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivProtocol {
    /// CBC-DES
    Des,
    /// CFB128-AES-128
    Aes,
}

/// SNMP credential in its decrypted, in-memory form
///
/// Serialized to JSON and sealed by [`CredentialCipher`] before it touches
/// the device row; the plaintext lives only in prober call frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "version", rename_all = "lowercase")]
pub enum SnmpCredential {
    /// Community-based v2c
    V2c {
        /// Community string
        community: String,
    },
    /// User-based v3
    V3 {
        /// Security name
        user: String,
        /// Authentication protocol, when the level requires one
        auth_protocol: Option<AuthProtocol>,
        /// Authentication key
        auth_key: Option<String>,
        /// Privacy protocol, when the level requires one
        priv_protocol: Option<PrivProtocol>,
        /// Privacy key
        priv_key: Option<String>,
        /// Security level
        level: SecurityLevel,
    },
}

impl SnmpCredential {
    /// Seals the credential for storage on the device row
    ///
    /// # Errors
    ///
    /// Returns an error when serialization or encryption fails.
    pub fn seal(&self, cipher: &CredentialCipher) -> Result<String, ProbeError> {
        let json = serde_json::to_string(self).map_err(|e| ProbeError::CredentialMissing {
            reason: e.to_string(),
        })?;
        Ok(cipher.seal(&json)?)
    }

    /// Opens a sealed credential from the device row
    ///
    /// # Errors
    ///
    /// Returns an error when decryption fails or the plaintext is not a
    /// credential.
    pub fn open_sealed(cipher: &CredentialCipher, sealed: &str) -> Result<Self, ProbeError> {
        let json = cipher.open(sealed)?;
        serde_json::from_str(&json).map_err(|e| ProbeError::CredentialMissing {
            reason: format!("sealed payload is not a credential: {e}"),
        })
    }

    /// Plain v2c credential from a community string
    #[must_use]
    pub fn v2c(community: impl Into<String>) -> Self {
        Self::V2c {
            community: community.into(),
        }
    }
}

/// One SNMP polling target
#[derive(Debug, Clone)]
pub struct SnmpTarget {
    /// Device address
    pub ip: IpAddr,
    /// UDP port, normally 161
    pub port: u16,
    /// Decrypted credential
    pub credential: SnmpCredential,
    /// Per-request deadline
    pub timeout: Duration,
    /// Retransmits after the first attempt
    pub retries: u8,
}

impl SnmpTarget {
    /// Target with default timeout and retry settings
    #[must_use]
    pub fn new(ip: IpAddr, port: u16, credential: SnmpCredential) -> Self {
        Self {
            ip,
            port,
            credential,
            timeout: Duration::from_secs(5),
            retries: 1,
        }
    }

    /// The socket address string for session construction
    #[must_use]
    pub fn socket_addr(&self) -> String {
        match self.ip {
            IpAddr::V4(v4) => format!("{}:{}", v4, self.port),
            IpAddr::V6(v6) => format!("[{}]:{}", v6, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_should_roundtrip_credential_through_sealed_form() {
        let cipher = CredentialCipher::from_passphrase("unit-test-key");
        let credential = SnmpCredential::V3 {
            user: "monitor".to_string(),
            auth_protocol: Some(AuthProtocol::Sha),
            auth_key: Some("auth-secret".to_string()),
            priv_protocol: Some(PrivProtocol::Aes),
            priv_key: Some("priv-secret".to_string()),
            level: SecurityLevel::AuthPriv,
        };

        let sealed = credential.seal(&cipher).expect("seal succeeds");
        assert!(!sealed.contains("auth-secret"), "plaintext must not leak");

        let opened = SnmpCredential::open_sealed(&cipher, &sealed).expect("open succeeds");
        match opened {
            SnmpCredential::V3 { user, level, .. } => {
                assert_eq!(user, "monitor");
                assert_eq!(level, SecurityLevel::AuthPriv);
            }
            SnmpCredential::V2c { .. } => panic!("wrong variant after roundtrip"),
        }
    }

    #[test]
    fn test_should_format_socket_address_for_both_ip_families() {
        let v4 = SnmpTarget::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
            161,
            SnmpCredential::v2c("public"),
        );
        assert_eq!(v4.socket_addr(), "10.0.0.5:161");

        let v6 = SnmpTarget::new("::1".parse().unwrap(), 1161, SnmpCredential::v2c("public"));
        assert_eq!(v6.socket_addr(), "[::1]:1161");
    }
}
