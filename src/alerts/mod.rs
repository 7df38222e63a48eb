//! Alert evaluation: condition derivation, deduplication, fault
//! classification, and auto-resolution
//!
//! The evaluator runs on its own cadence, reads device and interface rows
//! through the storage gateways, and writes alert rows back. It is designed
//! fail-safe: per-device errors are counted and skipped, and any dedup
//! uncertainty biases toward creating the alert rather than losing it.

use thiserror::Error;

use crate::database::DatabaseError;

pub mod dedup;
pub mod evaluator;
pub mod isp_fault;

pub use dedup::{DEDUP_GROUPS, DedupGroup, group_of};
pub use evaluator::{AlertEvaluator, EvaluatorSummary};
pub use isp_fault::{FaultAnalysis, FaultInput, FaultKind, classify_fault};

/// Built-in rule name: device unreachable (CRITICAL)
pub const RULE_DEVICE_UNREACHABLE: &str = "Device Unreachable";
/// Built-in rule name: device flapping (HIGH)
pub const RULE_DEVICE_FLAPPING: &str = "Device Flapping";
/// Built-in rule name: high latency (MEDIUM)
pub const RULE_HIGH_LATENCY: &str = "High Latency";
/// Built-in rule name: high packet loss (MEDIUM)
pub const RULE_PACKET_LOSS: &str = "High Packet Loss";
/// Built-in rule name: critical interface operationally down (MEDIUM)
pub const RULE_CRITICAL_INTERFACE_DOWN: &str = "Critical Interface Down";
/// Built-in rule name: traffic anomaly against the learned baseline
pub const RULE_TRAFFIC_ANOMALY: &str = "Traffic Anomaly";

/// Evaluator errors
#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("Storage error during evaluation: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Rule name rejected: {name}")]
    BadRuleName { name: String },
}
