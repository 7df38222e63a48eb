//! Alert deduplication groups
//!
//! Rules inside one group are duplicates of each other for the purpose of
//! active-alert uniqueness per device: at most one alert in the group may be
//! active, and a higher-severity arrival auto-resolves the lower actives in
//! the same evaluator tick. Equal-or-lower arrivals are suppressed.

use crate::domain_types::Severity;
use crate::storage::AlertRecord;

/// A named dedup group and its member rule names
#[derive(Debug, Clone, Copy)]
pub struct DedupGroup {
    /// Group key
    pub name: &'static str,
    /// Rule names that are equivalent within the group
    pub rules: &'static [&'static str],
}

/// The built-in dedup groups
pub const DEDUP_GROUPS: &[DedupGroup] = &[
    DedupGroup {
        name: "device_unreachable",
        rules: &[
            "Ping Unavailable",
            "Device Down - High Priority",
            "Device Down - Critical",
            "Device Unreachable",
        ],
    },
    DedupGroup {
        name: "high_latency",
        rules: &["High Latency", "Network Performance Degraded"],
    },
    DedupGroup {
        name: "packet_loss",
        rules: &["High Packet Loss", "Network Quality Issues"],
    },
];

/// The group a rule belongs to, when it belongs to one
#[must_use]
pub fn group_of(rule_name: &str) -> Option<&'static DedupGroup> {
    DEDUP_GROUPS
        .iter()
        .find(|group| group.rules.contains(&rule_name))
}

/// What the dedup pass decided for an incoming alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupDecision {
    /// No equivalent active alert; create it
    Create,
    /// An equal-or-higher severity alert in the group is already active
    Suppress,
    /// Create it, then resolve these superseded lower-severity actives
    Supersede(Vec<crate::domain_types::AlertId>),
}

/// Compares an incoming alert against the group's active rows
///
/// Rules outside any group always create (uniqueness for them is enforced
/// only per rule name by the conditional insert).
#[must_use]
pub fn decide(rule_name: &str, severity: Severity, group_actives: &[AlertRecord]) -> DedupDecision {
    if group_of(rule_name).is_none() || group_actives.is_empty() {
        return DedupDecision::Create;
    }

    let highest_active = group_actives
        .iter()
        .map(|a| a.severity)
        .max()
        .unwrap_or(Severity::Info);

    if highest_active >= severity {
        return DedupDecision::Suppress;
    }

    let superseded = group_actives
        .iter()
        .filter(|a| a.severity < severity)
        .map(|a| a.id)
        .collect();
    DedupDecision::Supersede(superseded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::{AlertId, DeviceId, RuleName};
    use chrono::Utc;

    fn active(rule: &str, severity: Severity) -> AlertRecord {
        AlertRecord {
            id: AlertId::generate(),
            device_id: DeviceId::generate(),
            rule_name: RuleName::try_new(rule).expect("rule name"),
            severity,
            message: String::new(),
            value: None,
            threshold: None,
            triggered_at: Utc::now(),
            resolved_at: None,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            notifications_sent: 0,
        }
    }

    #[test]
    fn test_should_find_group_membership_for_builtin_rules() {
        assert_eq!(group_of("Device Unreachable").map(|g| g.name), Some("device_unreachable"));
        assert_eq!(group_of("High Latency").map(|g| g.name), Some("high_latency"));
        assert!(group_of("Custom Rule 7").is_none());
    }

    #[test]
    fn test_should_suppress_when_equal_severity_is_active() {
        let actives = vec![active("Device Unreachable", Severity::Critical)];
        let decision = decide("Device Down - Critical", Severity::Critical, &actives);
        assert_eq!(decision, DedupDecision::Suppress);
    }

    #[test]
    fn test_should_supersede_lower_actives_when_higher_severity_arrives() {
        let low = active("Device Down - High Priority", Severity::High);
        let low_id = low.id;
        let decision = decide("Device Down - Critical", Severity::Critical, &[low]);
        assert_eq!(decision, DedupDecision::Supersede(vec![low_id]));
    }

    #[test]
    fn test_should_create_when_group_has_no_actives() {
        assert_eq!(
            decide("Device Unreachable", Severity::Critical, &[]),
            DedupDecision::Create
        );
    }

    #[test]
    fn test_should_create_when_rule_is_outside_any_group() {
        let actives = vec![active("Device Unreachable", Severity::Critical)];
        assert_eq!(
            decide("Custom Rule 7", Severity::Low, &actives),
            DedupDecision::Create
        );
    }
}
