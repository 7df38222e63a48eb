//! ISP fault classification
//!
//! Given the device ping state, interface statuses, and counter readings,
//! decides whether a connectivity fault sits on the customer side or the
//! provider side. The decision table is ordered; the first matching row
//! wins, and an unmatched input is explicitly undetermined with zero
//! confidence rather than a guess.

use crate::domain_types::Confidence;

/// Where the fault most likely sits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Local hardware, power, cabling, or configuration
    CustomerSide,
    /// Provider circuit or provider network quality
    IspSide,
    /// Evidence is insufficient to assign a side
    Undetermined,
}

/// Classifier input, as collected by the evaluator
#[derive(Debug, Clone, Default)]
pub struct FaultInput {
    /// Device answers ICMP
    pub device_up: bool,
    /// ifOperStatus is up
    pub oper_up: bool,
    /// ifAdminStatus is up
    pub admin_up: bool,
    /// CRC error count
    pub crc_errors: u64,
    /// Inbound error count
    pub in_errors: u64,
    /// Inbound discard count
    pub in_discards: u64,
    /// Inbound octets, for rate computation
    pub in_octets: u64,
    /// Provider label for the affected uplink
    pub isp_name: Option<String>,
}

/// Classification result
#[derive(Debug, Clone)]
pub struct FaultAnalysis {
    /// Assigned side
    pub kind: FaultKind,
    /// Confidence in the assignment
    pub confidence: Confidence,
    /// Human explanation
    pub reason: String,
    /// What the operator should do next
    pub recommended_action: String,
    /// Provider label, when the fault points at one
    pub affected_isp: Option<String>,
}

fn pct(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        (numerator as f64 / denominator as f64) * 100.0
    }
}

/// Runs the decision table
#[must_use]
pub fn classify_fault(input: &FaultInput) -> FaultAnalysis {
    let provider = input
        .isp_name
        .clone()
        .unwrap_or_else(|| "ISP".to_string());

    if !input.device_up {
        return FaultAnalysis {
            kind: FaultKind::CustomerSide,
            confidence: Confidence::clamped(0.95),
            reason: "Device unreachable via ping - indicates power outage, hardware failure, \
                     or local network issue"
                .to_string(),
            recommended_action: "Check device power supply, console access, or replace hardware. \
                                 Verify local network connectivity."
                .to_string(),
            affected_isp: None,
        };
    }

    if !input.oper_up && !input.admin_up {
        return FaultAnalysis {
            kind: FaultKind::CustomerSide,
            confidence: Confidence::certain(),
            reason: "Interface was manually disabled by network administrator".to_string(),
            recommended_action: "Enable interface using 'no shutdown' if this downtime was \
                                 unintended"
                .to_string(),
            affected_isp: None,
        };
    }

    if !input.oper_up {
        if input.crc_errors > 100 {
            return FaultAnalysis {
                kind: FaultKind::CustomerSide,
                confidence: Confidence::clamped(0.85),
                reason: format!(
                    "High CRC errors ({}) indicate a physical layer issue - bad cable, \
                     damaged port, or EMI interference",
                    input.crc_errors
                ),
                recommended_action: "Inspect and replace the cable between the router and the \
                                     provider equipment. Check the port for damage."
                    .to_string(),
                affected_isp: None,
            };
        }
        return FaultAnalysis {
            kind: FaultKind::Undetermined,
            confidence: Confidence::clamped(0.50),
            reason: format!(
                "Interface down with clean counters - could be a {provider} circuit outage \
                 or remote equipment failure"
            ),
            recommended_action: format!(
                "Contact {provider} to verify circuit status; check the remote end in parallel."
            ),
            affected_isp: Some(provider),
        };
    }

    // Link is up from here on.
    let error_rate = pct(input.in_errors, input.in_octets);
    if error_rate > 1.0 || input.in_errors > 1000 {
        return FaultAnalysis {
            kind: FaultKind::IspSide,
            confidence: Confidence::clamped(0.90),
            reason: format!(
                "High error rate on {provider} uplink ({} errors, {error_rate:.2}%) points at \
                 provider network congestion or circuit quality",
                input.in_errors
            ),
            recommended_action: format!(
                "Open a ticket with {provider} referencing the error counters; request a \
                 circuit quality check."
            ),
            affected_isp: Some(provider),
        };
    }

    let discard_rate = pct(input.in_discards, input.in_octets);
    if discard_rate > 2.0 || input.in_discards > 5000 {
        return FaultAnalysis {
            kind: FaultKind::IspSide,
            confidence: Confidence::clamped(0.75),
            reason: format!(
                "High discard rate ({} discards, {discard_rate:.2}%) suggests congestion, \
                 possibly on the {provider} side",
                input.in_discards
            ),
            recommended_action: format!(
                "Review link utilization; if below capacity, escalate congestion to {provider}."
            ),
            affected_isp: Some(provider),
        };
    }

    if input.crc_errors > 50 {
        return FaultAnalysis {
            kind: FaultKind::CustomerSide,
            confidence: Confidence::clamped(0.80),
            reason: format!(
                "CRC errors ({}) with the link up indicate physical layer degradation",
                input.crc_errors
            ),
            recommended_action: "Inspect cabling and transceivers before the link degrades \
                                 further."
                .to_string(),
            affected_isp: None,
        };
    }

    FaultAnalysis {
        kind: FaultKind::Undetermined,
        confidence: Confidence::zero(),
        reason: "No decision rule matched the observed state".to_string(),
        recommended_action: "Collect more counters and re-evaluate.".to_string(),
        affected_isp: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_up() -> FaultInput {
        FaultInput {
            device_up: true,
            oper_up: true,
            admin_up: true,
            ..FaultInput::default()
        }
    }

    #[test]
    fn test_should_blame_customer_when_device_ping_is_down() {
        let analysis = classify_fault(&FaultInput {
            device_up: false,
            ..FaultInput::default()
        });
        assert_eq!(analysis.kind, FaultKind::CustomerSide);
        assert!((analysis.confidence.as_f64() - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn test_should_blame_customer_with_certainty_when_interface_is_admin_down() {
        let analysis = classify_fault(&FaultInput {
            device_up: true,
            oper_up: false,
            admin_up: false,
            ..FaultInput::default()
        });
        assert_eq!(analysis.kind, FaultKind::CustomerSide);
        assert!((analysis.confidence.as_f64() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_should_blame_customer_when_link_down_with_high_crc() {
        let analysis = classify_fault(&FaultInput {
            device_up: true,
            oper_up: false,
            admin_up: true,
            crc_errors: 150,
            ..FaultInput::default()
        });
        assert_eq!(analysis.kind, FaultKind::CustomerSide);
        assert!((analysis.confidence.as_f64() - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_should_stay_undetermined_when_link_down_with_clean_counters() {
        let analysis = classify_fault(&FaultInput {
            device_up: true,
            oper_up: false,
            admin_up: true,
            crc_errors: 10,
            isp_name: Some("magti".to_string()),
            ..FaultInput::default()
        });
        assert_eq!(analysis.kind, FaultKind::Undetermined);
        assert!((analysis.confidence.as_f64() - 0.50).abs() < f64::EPSILON);
        assert_eq!(analysis.affected_isp.as_deref(), Some("magti"));
    }

    #[test]
    fn test_should_blame_isp_when_error_count_is_high_on_live_link() {
        // in_errors=5000 with in_octets=100_000_000 is a 0.005% rate but
        // the absolute count alone crosses the threshold.
        let analysis = classify_fault(&FaultInput {
            in_errors: 5000,
            in_octets: 100_000_000,
            isp_name: Some("magti".to_string()),
            ..healthy_up()
        });
        assert_eq!(analysis.kind, FaultKind::IspSide);
        assert!((analysis.confidence.as_f64() - 0.90).abs() < f64::EPSILON);
        assert!(analysis.reason.contains("magti"), "message names the provider");
    }

    #[test]
    fn test_should_blame_isp_with_lower_confidence_when_discards_dominate() {
        let analysis = classify_fault(&FaultInput {
            in_discards: 6000,
            ..healthy_up()
        });
        assert_eq!(analysis.kind, FaultKind::IspSide);
        assert!((analysis.confidence.as_f64() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_should_blame_customer_when_live_link_accumulates_crc() {
        let analysis = classify_fault(&FaultInput {
            crc_errors: 60,
            ..healthy_up()
        });
        assert_eq!(analysis.kind, FaultKind::CustomerSide);
        assert!((analysis.confidence.as_f64() - 0.80).abs() < f64::EPSILON);
    }

    #[test]
    fn test_should_return_zero_confidence_when_nothing_matches() {
        let analysis = classify_fault(&healthy_up());
        assert_eq!(analysis.kind, FaultKind::Undetermined);
        assert!(analysis.confidence.as_f64().abs() < f64::EPSILON);
    }
}
