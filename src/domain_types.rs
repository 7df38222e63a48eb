//! Domain types for the branchwatch monitoring engine
//!
//! This module defines strongly-typed domain values to prevent primitive
//! obsession and improve type safety throughout the codebase.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a monitored device
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Creates a new random device ID
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Unique identifier for a device interface
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct InterfaceId(Uuid);

impl InterfaceId {
    /// Creates a new random interface ID
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Unique identifier for a branch (organizational unit)
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct BranchId(Uuid);

impl BranchId {
    /// Creates a new random branch ID
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Unique identifier for an alert history row
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct AlertId(Uuid);

impl AlertId {
    /// Creates a new random alert ID
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// SNMP interface index as reported by IF-MIB
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct IfIndex(u32);

impl IfIndex {
    /// Gets the value as u32
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.into_inner()
    }

    /// Gets the value as i64 for SQLite binding
    #[must_use]
    pub fn as_i64(&self) -> i64 {
        i64::from(self.into_inner())
    }
}

/// Name of an alert rule (the dedup key together with the device)
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        AsRef,
        TryFrom,
        Into
    )
)]
pub struct RuleName(String);

impl RuleName {
    /// Borrow the rule name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }
}

/// Device batch size for dispatched work units
///
/// Bounded per the auto-scaling rule: batches below 50 devices waste queue
/// round-trips, batches above 500 run past the soft task deadline.
#[nutype(
    validate(greater_or_equal = 50, less_or_equal = 500),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, TryFrom, Into),
)]
pub struct BatchSize(usize);

impl BatchSize {
    /// Gets the value as usize
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Number of worker tasks consuming the priority queues
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 64),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, TryFrom, Into),
)]
pub struct WorkerCount(usize);

impl WorkerCount {
    /// Gets the value as usize
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Bounded capacity for internal channels
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, TryFrom, Into),
)]
pub struct ChannelCapacity(usize);

impl ChannelCapacity {
    /// Gets the value as usize
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Database connection pool size
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 100),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, TryFrom, Into, Default),
    default = 10,
)]
pub struct ConnectionPoolSize(usize);

impl ConnectionPoolSize {
    /// Gets the value as usize
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Maximum outstanding probe requests (ICMP or SNMP)
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 512),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, TryFrom, Into, Default),
    default = 50,
)]
pub struct ProbeConcurrency(usize);

impl ProbeConcurrency {
    /// Gets the value as usize
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Retention period for housekeeping, in days
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 365),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, TryFrom, Into),
)]
pub struct RetentionDays(u32);

impl RetentionDays {
    /// Gets the value as a chrono duration
    #[must_use]
    pub fn as_duration(&self) -> ChronoDuration {
        ChronoDuration::days(i64::from(self.into_inner()))
    }
}

/// Classification confidence in the closed interval [0, 1]
#[nutype(
    validate(finite, greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Display, TryFrom, Into),
)]
pub struct Confidence(f64);

impl Confidence {
    /// A confidence of exactly zero
    #[must_use]
    pub fn zero() -> Self {
        Self::clamped(0.0)
    }

    /// A confidence of exactly one
    #[must_use]
    pub fn certain() -> Self {
        Self::clamped(1.0)
    }

    /// Clamps an arbitrary float into a valid confidence
    #[must_use]
    pub fn clamped(value: f64) -> Self {
        let v = if value.is_finite() { value } else { 0.0 };
        Self::try_new(v.clamp(0.0, 1.0)).unwrap_or_else(|_| {
            // 0.0 always validates
            Self::try_new(0.0).unwrap()
        })
    }

    /// Gets the value as f64
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.into_inner()
    }
}

/// Alert severity, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Informational only
    #[default]
    Info,
    /// Low urgency
    Low,
    /// Medium urgency
    Medium,
    /// High urgency
    High,
    /// Requires immediate attention
    Critical,
}

impl Severity {
    /// Numeric priority used by the dedup comparison (higher wins)
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Info => 1,
            Self::Low => 2,
            Self::Medium => 3,
            Self::High => 4,
            Self::Critical => 5,
        }
    }

    /// Parses the stored string form; unknown values degrade to `Info`
    #[must_use]
    pub fn from_db(value: &str) -> Self {
        match value {
            "LOW" => Self::Low,
            "MEDIUM" => Self::Medium,
            "HIGH" => Self::High,
            "CRITICAL" => Self::Critical,
            _ => Self::Info,
        }
    }

    /// The stored string form
    #[must_use]
    pub fn as_db(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db())
    }
}

/// Reachability as observed by the ping worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Latest ping succeeded
    Up,
    /// Latest ping failed
    Down,
}

impl DeviceStatus {
    /// True when the status is [`DeviceStatus::Up`]
    #[must_use]
    pub fn is_up(self) -> bool {
        matches!(self, Self::Up)
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}

/// Flap detection window, minutes: a device showing three or more
/// reachability transitions inside this window is flapping. Shared by the
/// ping worker's state machine and the alert evaluator so both sides judge
/// the same window.
pub const FLAP_WINDOW_MINUTES: i64 = 5;

/// Bounded ring of the most recent reachability transitions
///
/// Device rows carry the last [`TransitionRing::CAPACITY`] UP/DOWN flips so
/// flapping detection never needs a table scan. Serialized to JSON in the
/// device row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRing {
    entries: Vec<DateTime<Utc>>,
}

impl TransitionRing {
    /// Maximum retained transitions
    pub const CAPACITY: usize = 10;

    /// Creates an empty ring
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a transition, evicting the oldest entry when full
    pub fn push(&mut self, at: DateTime<Utc>) {
        if self.entries.len() == Self::CAPACITY {
            self.entries.remove(0);
        }
        self.entries.push(at);
    }

    /// Number of retained transitions
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no transitions are retained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counts transitions that fall inside the trailing window ending at `now`
    #[must_use]
    pub fn count_within(&self, now: DateTime<Utc>, window: ChronoDuration) -> usize {
        let cutoff = now - window;
        self.entries.iter().filter(|t| **t >= cutoff).count()
    }

    /// The most recent transition, if any
    #[must_use]
    pub fn last(&self) -> Option<DateTime<Utc>> {
        self.entries.last().copied()
    }

    /// Serializes to the JSON column form
    ///
    /// # Errors
    ///
    /// Returns an error when serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.entries)
    }

    /// Deserializes from the JSON column form; a missing or corrupt column
    /// yields an empty ring rather than poisoning the device row.
    #[must_use]
    pub fn from_json(raw: Option<&str>) -> Self {
        let entries = raw
            .and_then(|s| serde_json::from_str::<Vec<DateTime<Utc>>>(s).ok())
            .unwrap_or_default();
        let mut ring = Self { entries };
        while ring.entries.len() > Self::CAPACITY {
            ring.entries.remove(0);
        }
        ring
    }
}
