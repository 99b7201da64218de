//! Routing rules and first-match evaluation.

// Layer 1: Standard library imports
use std::str::FromStr;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use tracing::warn;

// Layer 3: Internal module imports
use super::eval::ConditionEvaluator;
use crate::config::RuleConfig;
use crate::error::EngineError;
use crate::hl7::ParsedView;

/// Action taken when a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Forward to the rule's targets.
    Send,
    /// Apply the transform, then forward.
    Transform,
    /// Drop the message, recording the decision.
    Delete,
}

impl FromStr for RuleAction {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "send" => Ok(RuleAction::Send),
            "transform" => Ok(RuleAction::Transform),
            "delete" => Ok(RuleAction::Delete),
            other => Err(EngineError::configuration(format!(
                "unknown rule action: '{other}'"
            ))),
        }
    }
}

/// Validation mode for routing processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// No validation.
    None,
    /// Log validation errors and continue.
    Warn,
    /// Hand invalid messages to the bad-message handler (or drop).
    Error,
}

impl FromStr for ValidationMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ValidationMode::None),
            "warn" => Ok(ValidationMode::Warn),
            "error" => Ok(ValidationMode::Error),
            other => Err(EngineError::configuration(format!(
                "unknown validation mode: '{other}'"
            ))),
        }
    }
}

/// A single routing rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingRule {
    pub name: String,
    /// Lower numbers evaluate first; ties break by insertion order.
    pub priority: i32,
    pub condition: String,
    pub action: RuleAction,
    pub targets: Vec<String>,
    pub transform: Option<String>,
    pub enabled: bool,
}

impl RoutingRule {
    /// Convenience constructor for a send rule.
    pub fn send(
        name: impl Into<String>,
        condition: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            condition: condition.into(),
            action: RuleAction::Send,
            targets: vec![target.into()],
            transform: None,
            enabled: true,
        }
    }

    fn from_config(config: &RuleConfig) -> Result<Self, EngineError> {
        Ok(Self {
            name: config.name.clone(),
            priority: config.priority,
            condition: config.condition.clone(),
            action: config.action.parse()?,
            targets: config.targets.clone(),
            transform: config.transform.clone(),
            enabled: config.enabled,
        })
    }
}

/// Outcome of evaluating the rule list against one message.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingResult {
    pub matched: bool,
    pub rule_name: Option<String>,
    pub action: Option<RuleAction>,
    pub targets: Vec<String>,
    pub transform: Option<String>,
}

impl RoutingResult {
    /// The no-match outcome.
    pub fn no_match() -> Self {
        Self {
            matched: false,
            rule_name: None,
            action: None,
            targets: Vec::new(),
            transform: None,
        }
    }
}

/// An ordered rule list with first-match-wins evaluation.
///
/// Rules evaluate in priority order (lower first, ties by insertion).
/// When nothing matches and default targets are configured, a synthetic
/// rule named `default` sends to them.
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<RoutingRule>,
    evaluator: ConditionEvaluator,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configuration records.
    pub fn from_configs(configs: &[RuleConfig]) -> Result<Self, EngineError> {
        let mut set = Self::new();
        for config in configs {
            set.add_rule(RoutingRule::from_config(config)?);
        }
        Ok(set)
    }

    /// Append a rule, keeping insertion order for priority ties.
    pub fn add_rule(&mut self, rule: RoutingRule) {
        self.rules.push(rule);
    }

    /// Remove every rule.
    pub fn clear(&mut self) {
        self.rules.clear();
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate the rule list against a message view.
    ///
    /// A rule whose condition fails to evaluate is skipped with a warning,
    /// matching the propagation policy for localized errors.
    pub fn evaluate(&self, view: &ParsedView, default_targets: &[String]) -> RoutingResult {
        let mut order: Vec<usize> = (0..self.rules.len()).collect();
        order.sort_by_key(|&i| (self.rules[i].priority, i));

        for i in order {
            let rule = &self.rules[i];
            if !rule.enabled {
                continue;
            }
            match self.evaluator.evaluate(&rule.condition, view) {
                Ok(true) => {
                    return RoutingResult {
                        matched: true,
                        rule_name: Some(rule.name.clone()),
                        action: Some(rule.action),
                        targets: rule.targets.clone(),
                        transform: rule.transform.clone(),
                    };
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(rule = %rule.name, error = %e, "rule evaluation failed, skipping");
                }
            }
        }

        if !default_targets.is_empty() {
            return RoutingResult {
                matched: true,
                rule_name: Some("default".to_string()),
                action: Some(RuleAction::Send),
                targets: default_targets.to_vec(),
                transform: None,
            };
        }

        RoutingResult::no_match()
    }
}
