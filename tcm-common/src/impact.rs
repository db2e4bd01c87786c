//! Network-impact classification for test definitions.
//!
//! Decides whether executing a definition is likely to disrupt
//! reachability to the device (service restarts, WAN/LAN/interface
//! changes). Flags accumulate across test cases and never reset.

use crate::definition::TestDefinition;
use crate::types::ImpactAssessment;
use memchr::memmem;

/// Action keywords that, combined with a "network" service, indicate a
/// full network restart.
pub static NETWORK_RESTART_ACTIONS: &[&str] = &["restart", "reset", "reboot"];

/// Service keywords that put WAN reachability at risk.
pub static WAN_SERVICES: &[&str] = &["wan", "internet", "ppp", "dhcp", "modem"];

/// Service keywords that put LAN reachability at risk.
pub static LAN_SERVICES: &[&str] = &["lan", "network", "interface", "wifi", "ethernet"];

/// Subsystems that make a `restart` inside `params.command` count as a
/// network restart.
pub static RESTART_COMMAND_TARGETS: &[&str] = &["network", "wan", "firewall", "interface"];

/// Check whether any of the keywords occurs in the haystack.
fn contains_any(haystack: &str, keywords: &[&str]) -> bool {
    let bytes = haystack.as_bytes();
    keywords
        .iter()
        .any(|kw| memmem::find(bytes, kw.as_bytes()).is_some())
}

/// Classify a definition's network impact.
///
/// Pure function over the test cases. Restart detection takes
/// precedence per case; the command-based rule applies independently.
/// Unusable fields (a non-object `params`, a non-string command) simply
/// contribute nothing.
pub fn classify(definition: &TestDefinition) -> ImpactAssessment {
    let mut impacts = definition.impacts.unwrap_or_default();

    for case in &definition.test_cases {
        let service = case.service.to_lowercase();
        let action = case.action.to_lowercase();

        if service.contains("network") && contains_any(&action, NETWORK_RESTART_ACTIONS) {
            impacts.restarts_network = true;
            impacts.affects_wan = true;
            impacts.affects_lan = true;
        } else if contains_any(&service, WAN_SERVICES) {
            impacts.affects_wan = true;
        } else if contains_any(&service, LAN_SERVICES) {
            impacts.affects_lan = true;
        }

        if let Some(command) = case.params.get("command").and_then(|v| v.as_str()) {
            let command = command.to_lowercase();
            if command.contains("restart") && contains_any(&command, RESTART_COMMAND_TARGETS) {
                impacts.restarts_network = true;
                impacts.affects_wan = true;
                impacts.affects_lan = true;
            }
        }
    }

    impacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::TestCase;

    fn definition(cases: &[(&str, &str)]) -> TestDefinition {
        TestDefinition {
            test_cases: cases
                .iter()
                .map(|(service, action)| TestCase {
                    service: service.to_string(),
                    action: action.to_string(),
                    params: serde_json::Value::Null,
                    description: None,
                })
                .collect(),
            impacts: None,
        }
    }

    #[test]
    fn test_network_restart_sets_all_flags() {
        let impacts = classify(&definition(&[("network", "restart")]));
        assert!(impacts.restarts_network);
        assert!(impacts.affects_wan);
        assert!(impacts.affects_lan);
    }

    #[test]
    fn test_restart_implies_wan_and_lan() {
        for action in ["restart", "reset", "reboot"] {
            let impacts = classify(&definition(&[("network", action)]));
            assert!(impacts.restarts_network, "action {action}");
            assert!(impacts.affects_wan && impacts.affects_lan, "action {action}");
        }
    }

    #[test]
    fn test_wan_service_detection() {
        for service in ["wan", "internet", "pppoe", "dhcp_client", "modem"] {
            let impacts = classify(&definition(&[(service, "status")]));
            assert!(impacts.affects_wan, "service {service}");
            assert!(!impacts.restarts_network, "service {service}");
        }
    }

    #[test]
    fn test_lan_service_detection() {
        for service in ["lan", "interface", "wifi", "ethernet"] {
            let impacts = classify(&definition(&[(service, "reload")]));
            assert!(impacts.affects_lan, "service {service}");
            assert!(!impacts.affects_wan, "service {service}");
        }
    }

    #[test]
    fn test_restart_precedence_over_lan_match() {
        // "network" with a restart action must take the restart rule,
        // not merely the LAN rule.
        let impacts = classify(&definition(&[("network", "soft_reset")]));
        assert!(impacts.restarts_network);
    }

    #[test]
    fn test_network_without_restart_is_lan_only() {
        let impacts = classify(&definition(&[("network", "status")]));
        assert!(impacts.affects_lan);
        assert!(!impacts.affects_wan);
        assert!(!impacts.restarts_network);
    }

    #[test]
    fn test_flags_accumulate_monotonically() {
        let impacts = classify(&definition(&[
            ("wan", "status"),
            ("firewall", "reload"),
            ("lan", "status"),
        ]));
        // The harmless middle case must not clear the earlier WAN flag.
        assert!(impacts.affects_wan);
        assert!(impacts.affects_lan);
        assert!(!impacts.restarts_network);
    }

    #[test]
    fn test_command_param_rule_applies_independently() {
        let def = TestDefinition {
            test_cases: vec![TestCase {
                service: "system".to_string(),
                action: "exec".to_string(),
                params: serde_json::json!({"command": "/etc/init.d/network restart"}),
                description: None,
            }],
            impacts: None,
        };
        let impacts = classify(&def);
        assert!(impacts.restarts_network);
        assert!(impacts.affects_wan && impacts.affects_lan);
    }

    #[test]
    fn test_restart_command_without_network_target_ignored() {
        let def = TestDefinition {
            test_cases: vec![TestCase {
                service: "system".to_string(),
                action: "exec".to_string(),
                params: serde_json::json!({"command": "/etc/init.d/cron restart"}),
                description: None,
            }],
            impacts: None,
        };
        assert_eq!(classify(&def), ImpactAssessment::default());
    }

    #[test]
    fn test_malformed_params_never_fail_classification() {
        let def = TestDefinition {
            test_cases: vec![TestCase {
                service: "wan".to_string(),
                action: "status".to_string(),
                params: serde_json::json!([1, 2, 3]),
                description: None,
            }],
            impacts: None,
        };
        let impacts = classify(&def);
        assert!(impacts.affects_wan);
    }

    #[test]
    fn test_case_insensitive_matching() {
        let impacts = classify(&definition(&[("Network", "RESTART")]));
        assert!(impacts.restarts_network);
    }

    #[test]
    fn test_embedded_impacts_are_preserved() {
        let mut def = definition(&[("system", "info")]);
        def.impacts = Some(ImpactAssessment {
            affects_wan: true,
            affects_lan: false,
            restarts_network: false,
        });
        let impacts = classify(&def);
        assert!(impacts.affects_wan);
    }
}
