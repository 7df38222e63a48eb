//! Interface classification parser
//!
//! Maps `ifAlias` / `ifDescr` / `ifName` text onto an interface role, an
//! optional normalized ISP provider, and a criticality flag. Patterns are
//! matched in a fixed order (most specific role first); the first matching
//! pattern wins for a given text source, and the source with the highest
//! weighted confidence wins overall (`ifAlias` 1.0, `ifDescr` 0.7,
//! `ifName` 0.5).

use regex::Regex;
use std::sync::OnceLock;

use crate::domain_types::Confidence;
use crate::storage::{InterfaceClassification, InterfaceKind, InterfaceSnapshot};

/// ifType code for softwareLoopback in IF-MIB
const IF_TYPE_SOFTWARE_LOOPBACK: i64 = 24;

/// Provider alias table: canonical name, then the spellings seen in the field
const ISP_PROVIDERS: &[(&str, &[&str])] = &[
    ("magti", &["magti", "magticom", "magtico"]),
    ("silknet", &["silknet", "silkn", "silk"]),
    ("veon", &["veon", "beeline", "bline"]),
    ("geocell", &["geocell", "gcell"]),
    ("caucasus", &["caucasus", "caucasus_online"]),
    ("globaltel", &["globaltel"]),
];

/// Pattern table in match-priority order
const PATTERNS: &[(InterfaceKind, &[&str])] = &[
    (
        InterfaceKind::Isp,
        &[
            r"(?i)(magti|silknet|veon|beeline|geocell|caucasus|globaltel)[\s_-]*(internet|inet|wan|uplink|isp|bgp)",
            r"(?i)(internet|inet|wan|uplink|isp|bgp)[\s_-]*(magti|silknet|veon|beeline|geocell|caucasus|globaltel)",
            r"(?i)\bisp[\s_-]*\d*\b",
            r"(?i)\bwan[\s_-]*\d*\b",
            r"(?i)(internet|inet)[\s_-]*(uplink|link|connection)",
            r"(?i)bgp[\s_-]*(peer|neighbor|uplink)",
            r"(?i)upstream[\s_-]*\d*",
            r"(?i)provider[\s_-]*\d*",
        ],
    ),
    (
        InterfaceKind::Trunk,
        &[
            r"(?i)trunk[\s_-]*(to|link)?[\s_-]*\w*",
            r"(?i)\btrnk[\s_-]*\w*",
            r"(?i)\bpo\d+\b",
            r"(?i)port[\s_-]*channel[\s_-]*\d+",
            r"(?i)\blag\d+\b",
            r"(?i)link[\s_-]*aggregation[\s_-]*\d+",
            r"(?i)core[\s_-]*(link|uplink|switch)",
            r"(?i)backbone",
            r"(?i)aggregation[\s_-]*(switch|layer)",
        ],
    ),
    (
        InterfaceKind::ServerLink,
        &[
            r"(?i)server[\s_-]*(connection|link|port|host)",
            r"(?i)srv[\s_-]*(host|conn|link)",
            r"(?i)(esxi|vcenter|vmware|hyper-v)[\s_-]*\d*",
            r"(?i)vm[\s_-]*host[\s_-]*\d*",
            r"(?i)(web|app|database|db|sql)[\s_-]*server",
            r"(?i)(storage|nas|san)[\s_-]*(link|connection)",
        ],
    ),
    (
        InterfaceKind::BranchLink,
        &[
            r"(?i)branch[\s_-]*(office|link|connection)?[\s_-]*\w*",
            r"(?i)vpn[\s_-]*(tunnel|connection|link)",
            r"(?i)tunnel[\s_-]*\d*",
            r"(?i)(remote|site)[\s_-]*(office|link|connection)",
            r"(?i)to[\s_-]*\w+[\s_-]*(branch|office|site)",
            r"(?i)(rustavi|kutaisi|batumi|zugdidi|telavi|gori|mtskheta|poti|kobuleti|marneuli|gardabani|borjomi)[\s_-]*(branch|office|link)?",
        ],
    ),
    (
        InterfaceKind::Management,
        &[
            r"(?i)management",
            r"(?i)\bmgmt\b",
            r"(?i)\badmin\b",
            r"(?i)control[\s_-]*plane",
        ],
    ),
    (
        InterfaceKind::Access,
        &[
            r"(?i)access[\s_-]*(port|switch|vlan)",
            r"(?i)user[\s_-]*(port|access)",
            r"(?i)employee[\s_-]*(port|access)",
            r"(?i)desktop[\s_-]*(port|access)",
        ],
    ),
    (
        InterfaceKind::Loopback,
        &[r"(?i)loopback[\s_-]*\d*", r"(?i)\blo\d+\b"],
    ),
    (
        InterfaceKind::Voice,
        &[
            r"(?i)voice[\s_-]*(vlan|port)",
            r"(?i)voip",
            r"(?i)phone[\s_-]*(port|vlan)",
        ],
    ),
    (
        InterfaceKind::Camera,
        &[
            r"(?i)(camera|cctv|nvr|ipcam)[\s_-]*\d*",
            r"(?i)surveillance",
        ],
    ),
];

/// Compiled classification tables
pub struct InterfaceParser {
    compiled: Vec<(InterfaceKind, Vec<Regex>)>,
}

static PARSER: OnceLock<InterfaceParser> = OnceLock::new();

/// The shared parser instance (patterns compile once per process)
#[must_use]
pub fn parser() -> &'static InterfaceParser {
    PARSER.get_or_init(InterfaceParser::new)
}

impl Default for InterfaceParser {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceParser {
    /// Compiles the pattern table
    ///
    /// # Panics
    ///
    /// Panics if a built-in pattern fails to compile, which is a programming
    /// error caught by the test suite.
    #[must_use]
    pub fn new() -> Self {
        let compiled = PATTERNS
            .iter()
            .map(|(kind, patterns)| {
                let regexes = patterns
                    .iter()
                    .map(|p| Regex::new(p).expect("built-in pattern compiles"))
                    .collect();
                (*kind, regexes)
            })
            .collect();
        Self { compiled }
    }

    /// Classifies an interface from its IF-MIB snapshot
    #[must_use]
    pub fn classify(&self, snapshot: &InterfaceSnapshot) -> InterfaceClassification {
        // ifType is authoritative for loopbacks regardless of naming.
        if snapshot.if_type == Some(IF_TYPE_SOFTWARE_LOOPBACK) {
            return InterfaceClassification {
                interface_type: InterfaceKind::Loopback,
                isp_provider: None,
                is_critical: false,
                confidence: Confidence::certain(),
            };
        }

        let sources = [
            (snapshot.if_alias.as_deref(), 1.0),
            (snapshot.if_descr.as_deref(), 0.7),
            (snapshot.if_name.as_deref(), 0.5),
        ];

        let mut best: Option<(InterfaceKind, f64)> = None;
        for (text, weight) in sources {
            let Some(text) = text else { continue };
            if let Some((kind, confidence)) = self.classify_text(text) {
                let weighted = confidence * weight;
                if best.is_none_or(|(_, prev)| weighted > prev) {
                    best = Some((kind, weighted));
                }
            }
        }

        match best {
            Some((kind, confidence)) => {
                let isp_provider = if kind == InterfaceKind::Isp {
                    extract_provider(snapshot)
                } else {
                    None
                };
                InterfaceClassification {
                    interface_type: kind,
                    isp_provider,
                    // ISP uplinks are always critical.
                    is_critical: kind == InterfaceKind::Isp,
                    confidence: Confidence::clamped(confidence),
                }
            }
            None => InterfaceClassification::default(),
        }
    }

    /// Classifies a single text field, returning the role and raw confidence
    fn classify_text(&self, text: &str) -> Option<(InterfaceKind, f64)> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        for (kind, regexes) in &self.compiled {
            for regex in regexes {
                if let Some(found) = regex.find(text) {
                    return Some((*kind, match_confidence(text, found.len())));
                }
            }
        }
        None
    }
}

/// Confidence grows with how much of the text the pattern explains
fn match_confidence(text: &str, match_len: usize) -> f64 {
    let coverage = match_len as f64 / text.len().max(1) as f64;
    (0.5 + 0.5 * coverage).min(1.0)
}

/// Normalizes the ISP provider from whichever text source names one
#[must_use]
pub fn extract_provider(snapshot: &InterfaceSnapshot) -> Option<String> {
    for text in [
        snapshot.if_alias.as_deref(),
        snapshot.if_descr.as_deref(),
        snapshot.if_name.as_deref(),
    ]
    .into_iter()
    .flatten()
    {
        let lowered = text.to_lowercase();
        for (canonical, aliases) in ISP_PROVIDERS {
            if aliases.iter().any(|alias| lowered.contains(alias)) {
                return Some((*canonical).to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_alias(alias: &str) -> InterfaceSnapshot {
        InterfaceSnapshot {
            if_alias: Some(alias.to_string()),
            ..InterfaceSnapshot::default()
        }
    }

    #[test]
    fn test_should_classify_isp_and_extract_provider_when_alias_names_one() {
        let result = parser().classify(&with_alias("Magti_Internet"));
        assert_eq!(result.interface_type, InterfaceKind::Isp);
        assert_eq!(result.isp_provider.as_deref(), Some("magti"));
        assert!(result.is_critical, "ISP interfaces are always critical");
        assert!(result.confidence.as_f64() > 0.5);
    }

    #[test]
    fn test_should_normalize_beeline_to_veon_when_rebranded_name_appears() {
        let result = parser().classify(&with_alias("internet_beeline"));
        assert_eq!(result.interface_type, InterfaceKind::Isp);
        assert_eq!(result.isp_provider.as_deref(), Some("veon"));
    }

    #[test]
    fn test_should_classify_port_channel_as_trunk_when_named_po() {
        let snapshot = InterfaceSnapshot {
            if_name: Some("Po1".to_string()),
            ..InterfaceSnapshot::default()
        };
        let result = parser().classify(&snapshot);
        assert_eq!(result.interface_type, InterfaceKind::Trunk);
        assert!(!result.is_critical);
    }

    #[test]
    fn test_should_classify_loopback_from_if_type_when_naming_is_misleading() {
        let snapshot = InterfaceSnapshot {
            if_alias: Some("Magti_Internet".to_string()),
            if_type: Some(IF_TYPE_SOFTWARE_LOOPBACK),
            ..InterfaceSnapshot::default()
        };
        let result = parser().classify(&snapshot);
        assert_eq!(result.interface_type, InterfaceKind::Loopback);
        assert!(!result.is_critical, "loopbacks never count as critical");
    }

    #[test]
    fn test_should_prefer_alias_over_name_when_sources_disagree() {
        let snapshot = InterfaceSnapshot {
            if_alias: Some("Branch_Rustavi".to_string()),
            if_name: Some("Gi0/1".to_string()),
            ..InterfaceSnapshot::default()
        };
        let result = parser().classify(&snapshot);
        assert_eq!(result.interface_type, InterfaceKind::BranchLink);
    }

    #[test]
    fn test_should_classify_camera_port_when_alias_mentions_cctv() {
        let result = parser().classify(&with_alias("CCTV_4"));
        assert_eq!(result.interface_type, InterfaceKind::Camera);
    }

    #[test]
    fn test_should_return_other_when_no_pattern_matches() {
        let result = parser().classify(&with_alias("xyzzy"));
        assert_eq!(result.interface_type, InterfaceKind::Other);
        assert!(result.confidence.as_f64().abs() < f64::EPSILON);
    }

    #[test]
    fn test_should_classify_each_snapshot_identically_when_run_twice() {
        let snapshot = with_alias("Silknet ISP Uplink");
        let first = parser().classify(&snapshot);
        let second = parser().classify(&snapshot);
        assert_eq!(first.interface_type, second.interface_type);
        assert_eq!(first.isp_provider, second.isp_provider);
        assert!((first.confidence.as_f64() - second.confidence.as_f64()).abs() < f64::EPSILON);
    }
}
