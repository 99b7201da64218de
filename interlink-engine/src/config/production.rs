//! Production configuration: items, connections, and routing rules.

// Layer 1: Standard library imports
use std::collections::HashSet;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use super::item::ItemConfig;
use crate::error::EngineError;

/// How a connection between two items is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    /// Normal message flow.
    Standard,
    /// Error/bad-message flow.
    Error,
    /// Fire-and-forget side channel.
    Async,
}

impl Default for ConnectionKind {
    fn default() -> Self {
        ConnectionKind::Standard
    }
}

/// A directed connection between two item names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub kind: ConnectionKind,
}

/// A content-based routing rule record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    /// Lower numbers evaluate first; ties break by position.
    #[serde(default)]
    pub priority: i32,
    /// Condition expression; empty matches everything.
    #[serde(default)]
    pub condition: String,
    /// `send`, `transform`, or `delete`.
    #[serde(default = "default_action")]
    pub action: String,
    /// Target item names for `send`/`transform`.
    #[serde(default)]
    pub targets: Vec<String>,
    /// Transform id applied before sending.
    #[serde(default)]
    pub transform: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_action() -> String {
    "send".to_string()
}

fn default_enabled() -> bool {
    true
}

/// A complete production definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionConfig {
    pub name: String,
    #[serde(default)]
    pub items: Vec<ItemConfig>,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl ProductionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
            connections: Vec::new(),
            rules: Vec::new(),
        }
    }

    /// Look up an item config by name.
    pub fn item(&self, name: &str) -> Option<&ItemConfig> {
        self.items.iter().find(|i| i.name == name)
    }

    /// Validate the whole production; any failure is fatal at startup.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::configuration(
                "production name must not be empty",
            ));
        }

        let mut names = HashSet::new();
        for item in &self.items {
            item.validate()?;
            if !names.insert(item.name.as_str()) {
                return Err(EngineError::configuration(format!(
                    "duplicate item name: '{}'",
                    item.name
                )));
            }
        }

        for conn in &self.connections {
            for endpoint in [&conn.from, &conn.to] {
                if !names.contains(endpoint.as_str()) {
                    return Err(EngineError::configuration(format!(
                        "connection references unknown item: '{endpoint}'"
                    )));
                }
            }
        }

        for rule in &self.rules {
            match rule.action.as_str() {
                "send" | "transform" | "delete" => {}
                other => {
                    return Err(EngineError::configuration(format!(
                        "rule '{}' has unknown action: '{other}'",
                        rule.name
                    )));
                }
            }
            if rule.action != "delete" && rule.targets.is_empty() {
                return Err(EngineError::configuration(format!(
                    "rule '{}' with action '{}' needs at least one target",
                    rule.name, rule.action
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config() -> ProductionConfig {
        let mut config = ProductionConfig::new("Test.Production");
        config
            .items
            .push(ItemConfig::new("A", "li.hosts.Hl7MllpService"));
        config
            .items
            .push(ItemConfig::new("B", "li.hosts.RoutingProcess"));
        config
    }

    #[test]
    fn test_valid_config() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_duplicate_item_names() {
        let mut cfg = config();
        cfg.items.push(ItemConfig::new("A", "li.hosts.Hl7MllpService"));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_connection_endpoints_must_exist() {
        let mut cfg = config();
        cfg.connections.push(ConnectionConfig {
            from: "A".into(),
            to: "missing".into(),
            kind: ConnectionKind::Standard,
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rule_action_validated() {
        let mut cfg = config();
        cfg.rules.push(RuleConfig {
            name: "R1".into(),
            priority: 0,
            condition: String::new(),
            action: "teleport".into(),
            targets: vec!["B".into()],
            transform: None,
            enabled: true,
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_send_rule_needs_targets() {
        let mut cfg = config();
        cfg.rules.push(RuleConfig {
            name: "R1".into(),
            priority: 0,
            condition: String::new(),
            action: "send".into(),
            targets: vec![],
            transform: None,
            enabled: true,
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_delete_rule_needs_no_targets() {
        let mut cfg = config();
        cfg.rules.push(RuleConfig {
            name: "R1".into(),
            priority: 0,
            condition: String::new(),
            action: "delete".into(),
            targets: vec![],
            transform: None,
            enabled: true,
        });
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_json_shape() {
        let json = r#"{
            "name": "Demo",
            "items": [
                {
                    "name": "HL7.In.TCP",
                    "class_name": "li.hosts.Hl7MllpService",
                    "adapter_settings": {"Port": 2575},
                    "host_settings": {"TargetConfigNames": "HL7.Router"}
                }
            ],
            "connections": [],
            "rules": [
                {
                    "name": "ADT",
                    "condition": "{MSH-9.1} = \"ADT\"",
                    "action": "send",
                    "targets": ["HL7.In.TCP"]
                }
            ]
        }"#;
        let cfg: ProductionConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.items[0].adapter_settings.get_i64("Port", 0), 2575);
        assert_eq!(
            cfg.items[0].target_config_names(),
            vec!["HL7.Router".to_string()]
        );
        assert_eq!(cfg.rules[0].targets, vec!["HL7.In.TCP".to_string()]);
    }
}
