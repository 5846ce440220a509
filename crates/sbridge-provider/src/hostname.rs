use std::sync::OnceLock;

use regex::Regex;
use sbridge_domain::ProviderNode;

use crate::error::ProviderError;

fn standalone_dns_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^ip-[0-9A-Za-z]{8}$").expect("static pattern"))
}

/// Decides whether a provider-reported hostname is acceptable.
///
/// With configured `valid_hostnames` patterns, any match accepts. With
/// none, the per-node default applies: `ip-XXXXXXXX` when the node uses
/// standalone DNS, otherwise `{node_prefix}{name}` lowercased.
#[derive(Debug, Clone, Default)]
pub struct HostnamePolicy {
    patterns: Vec<Regex>,
}

impl HostnamePolicy {
    pub fn from_patterns(patterns: &[String]) -> Result<Self, ProviderError> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|_| ProviderError::InvalidPattern(p.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn accepts(&self, node: &ProviderNode) -> bool {
        let Some(hostname) = node.hostname.as_deref() else {
            return false;
        };
        if !self.patterns.is_empty() {
            return self.patterns.iter().any(|p| p.is_match(hostname));
        }
        if node.software_configuration.standalone_dns_enabled() {
            return standalone_dns_pattern().is_match(hostname);
        }
        let prefix = node.software_configuration.node_prefix().unwrap_or("");
        let expected = format!("{}{}", prefix, node.name).to_ascii_lowercase();
        hostname.to_ascii_lowercase() == expected
    }
}

#[cfg(test)]
mod tests {
    use sbridge_domain::{NodeState, SoftwareConfig, TargetState};
    use serde_json::{Map, Value};

    use super::*;

    fn node(name: &str, hostname: Option<&str>, config: Map<String, Value>) -> ProviderNode {
        ProviderNode {
            name: name.to_string(),
            node_array: "htc".to_string(),
            vm_size: "Standard_F4".to_string(),
            placement_group: None,
            private_ip: None,
            hostname: hostname.map(String::from),
            state: NodeState::Ready,
            target_state: TargetState::Started,
            keep_alive: false,
            software_configuration: SoftwareConfig(config),
        }
    }

    #[test]
    fn default_policy_expects_prefixed_node_name() {
        let mut config = Map::new();
        config.insert("node_prefix".into(), Value::String("c7-".into()));
        let policy = HostnamePolicy::default();
        assert!(policy.accepts(&node("HTC-1", Some("c7-htc-1"), config.clone())));
        assert!(!policy.accepts(&node("HTC-1", Some("htc-1"), config)));
    }

    #[test]
    fn standalone_dns_expects_ip_style_hostname() {
        let mut config = Map::new();
        config.insert("standalone_dns_enabled".into(), Value::Bool(true));
        let policy = HostnamePolicy::default();
        assert!(policy.accepts(&node("htc-1", Some("ip-0A000005"), config.clone())));
        assert!(!policy.accepts(&node("htc-1", Some("htc-1"), config)));
    }

    #[test]
    fn configured_patterns_override_defaults() {
        let policy =
            HostnamePolicy::from_patterns(&["^custom-[0-9]+$".to_string()]).unwrap();
        assert!(policy.accepts(&node("htc-1", Some("custom-42"), Map::new())));
        assert!(!policy.accepts(&node("htc-1", Some("htc-1"), Map::new())));
    }

    #[test]
    fn missing_hostname_is_never_accepted() {
        let policy = HostnamePolicy::default();
        assert!(!policy.accepts(&node("htc-1", None, Map::new())));
    }

    #[test]
    fn invalid_patterns_are_rejected_at_construction() {
        let err = HostnamePolicy::from_patterns(&["[".to_string()]).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidPattern(_)));
    }
}
