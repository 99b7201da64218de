//! Item configuration: one record per host in a production.

// Layer 1: Standard library imports
use std::collections::BTreeMap;
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::broker::MessagingPattern;
use crate::error::EngineError;

/// A single setting value. Configurations are free to write `"true"`,
/// `true`, `"30"`, or `30`; the typed getters coerce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl SettingValue {
    /// String form of the value.
    pub fn as_str(&self) -> String {
        match self {
            SettingValue::Bool(b) => b.to_string(),
            SettingValue::Int(i) => i.to_string(),
            SettingValue::Float(f) => f.to_string(),
            SettingValue::Str(s) => s.clone(),
        }
    }

    /// Integer form, coercing numeric strings.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SettingValue::Int(i) => Some(*i),
            SettingValue::Float(f) => Some(*f as i64),
            SettingValue::Bool(b) => Some(i64::from(*b)),
            SettingValue::Str(s) => s.trim().parse().ok(),
        }
    }

    /// Float form, coercing numeric strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Int(i) => Some(*i as f64),
            SettingValue::Float(f) => Some(*f),
            SettingValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            SettingValue::Str(s) => s.trim().parse().ok(),
        }
    }

    /// Boolean form, coercing `"true"`/`"false"` (case-insensitive) and
    /// non-zero numbers.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            SettingValue::Int(i) => Some(*i != 0),
            SettingValue::Float(f) => Some(*f != 0.0),
            SettingValue::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
        }
    }
}

impl From<&str> for SettingValue {
    fn from(s: &str) -> Self {
        SettingValue::Str(s.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(s: String) -> Self {
        SettingValue::Str(s)
    }
}

impl From<i64> for SettingValue {
    fn from(i: i64) -> Self {
        SettingValue::Int(i)
    }
}

impl From<bool> for SettingValue {
    fn from(b: bool) -> Self {
        SettingValue::Bool(b)
    }
}

/// A settings map with case-insensitive key lookup.
///
/// # Examples
///
/// ```rust
/// use interlink_engine::config::Settings;
///
/// let mut settings = Settings::new();
/// settings.set("Port", 2575i64);
/// settings.set("StayConnected", "-1");
///
/// assert_eq!(settings.get_i64("port", 0), 2575);
/// assert_eq!(settings.get_i64("stayconnected", 0), -1);
/// assert_eq!(settings.get_str("Missing"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(BTreeMap<String, SettingValue>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive lookup: exact match first, then a scan.
    pub fn get(&self, name: &str) -> Option<&SettingValue> {
        if let Some(v) = self.0.get(name) {
            return Some(v);
        }
        let lower = name.to_ascii_lowercase();
        self.0
            .iter()
            .find(|(k, _)| k.to_ascii_lowercase() == lower)
            .map(|(_, v)| v)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<SettingValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get_str(&self, name: &str) -> Option<String> {
        self.get(name).map(SettingValue::as_str)
    }

    pub fn get_or(&self, name: &str, default: &str) -> String {
        self.get_str(name).unwrap_or_else(|| default.to_string())
    }

    pub fn get_i64(&self, name: &str, default: i64) -> i64 {
        self.get(name).and_then(SettingValue::as_i64).unwrap_or(default)
    }

    pub fn get_u64(&self, name: &str, default: u64) -> u64 {
        let value = self.get_i64(name, default as i64);
        if value < 0 {
            default
        } else {
            value as u64
        }
    }

    pub fn get_usize(&self, name: &str, default: usize) -> usize {
        self.get_u64(name, default as u64) as usize
    }

    pub fn get_f64(&self, name: &str, default: f64) -> f64 {
        self.get(name).and_then(SettingValue::as_f64).unwrap_or(default)
    }

    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        self.get(name).and_then(SettingValue::as_bool).unwrap_or(default)
    }

    /// Seconds-valued setting as a `Duration` (fractional values allowed).
    pub fn get_duration_secs(&self, name: &str, default: Duration) -> Duration {
        match self.get(name).and_then(SettingValue::as_f64) {
            Some(secs) if secs >= 0.0 => Duration::from_secs_f64(secs),
            _ => default,
        }
    }

    /// Comma-separated list setting, trimmed, empties removed.
    pub fn get_list(&self, name: &str) -> Vec<String> {
        self.get_str(name)
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SettingValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, SettingValue)> for Settings {
    fn from_iter<I: IntoIterator<Item = (String, SettingValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Configuration for one production item (host).
///
/// `class_name` is resolved through the class registry at build time;
/// `adapter_settings` configure the protocol layer and `host_settings` the
/// business logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemConfig {
    /// Unique name within the production.
    pub name: String,
    /// Implementation identifier, e.g. `li.hosts.Hl7MllpService`.
    pub class_name: String,
    /// Worker pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Disabled items are built but not started.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Human-readable comment.
    #[serde(default)]
    pub comment: String,
    /// Protocol-layer settings.
    #[serde(default)]
    pub adapter_settings: Settings,
    /// Business-logic settings.
    #[serde(default)]
    pub host_settings: Settings,
}

fn default_pool_size() -> usize {
    1
}

fn default_enabled() -> bool {
    true
}

impl ItemConfig {
    pub fn new(name: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class_name: class_name.into(),
            pool_size: 1,
            enabled: true,
            comment: String::new(),
            adapter_settings: Settings::new(),
            host_settings: Settings::new(),
        }
    }

    /// Downstream fan-out targets (`TargetConfigNames`, comma-separated).
    pub fn target_config_names(&self) -> Vec<String> {
        self.host_settings.get_list("TargetConfigNames")
    }

    /// The item's messaging pattern (`MessagingPattern`, default async).
    pub fn messaging_pattern(&self) -> MessagingPattern {
        self.host_settings
            .get_str("MessagingPattern")
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    /// Validate structural requirements.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::configuration("item name must not be empty"));
        }
        if self.class_name.trim().is_empty() {
            return Err(EngineError::configuration(format!(
                "item '{}' is missing class_name",
                self.name
            )));
        }
        if self.pool_size == 0 {
            return Err(EngineError::configuration(format!(
                "item '{}' pool_size must be >= 1",
                self.name
            )));
        }
        Ok(())
    }
}
