//! JSON configuration loading and the sample configuration for `init`.

// Layer 1: Standard library imports
use std::path::{Path, PathBuf};

// Layer 2: Third-party crate imports
use tracing::info;

// Layer 3: Internal module imports
use super::item::ItemConfig;
use super::production::{ProductionConfig, RuleConfig};
use crate::error::EngineError;

/// Environment variable naming the base directory for item file paths.
pub const WORKSPACES_ROOT_ENV: &str = "WORKSPACES_ROOT";

/// Load and validate a production configuration from a JSON file.
pub fn load_path(path: impl AsRef<Path>) -> Result<ProductionConfig, EngineError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| EngineError::Configuration {
        reason: format!("cannot read config '{}': {e}", path.display()),
    })?;

    let config: ProductionConfig =
        serde_json::from_str(&text).map_err(|e| EngineError::Configuration {
            reason: format!("malformed config '{}': {e}", path.display()),
        })?;
    config.validate()?;

    info!(
        production = %config.name,
        items = config.items.len(),
        rules = config.rules.len(),
        "configuration loaded"
    );
    Ok(config)
}

/// Resolve an item-relative file path against `WORKSPACES_ROOT` when set.
///
/// Absolute paths pass through untouched.
pub fn resolve_workspace_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::var(WORKSPACES_ROOT_ENV) {
        Ok(root) if !root.trim().is_empty() => PathBuf::from(root).join(path),
        _ => path.to_path_buf(),
    }
}

/// A small but complete sample production, emitted by `interlink init`.
pub fn sample_config() -> ProductionConfig {
    let mut inbound = ItemConfig::new("HL7.In.TCP", "li.hosts.Hl7MllpService");
    inbound.adapter_settings.set("Port", 2575i64);
    inbound.adapter_settings.set("Host", "0.0.0.0");
    inbound.adapter_settings.set("ReadTimeout", 30i64);
    inbound.host_settings.set("TargetConfigNames", "HL7.Router");
    inbound.host_settings.set("AckMode", "Immediate");

    let mut router = ItemConfig::new("HL7.Router", "li.hosts.RoutingProcess");
    router.host_settings.set("Validation", "Warn");

    let mut outbound = ItemConfig::new("HL7.Out.PAS", "li.hosts.Hl7MllpOperation");
    outbound.adapter_settings.set("IPAddress", "127.0.0.1");
    outbound.adapter_settings.set("Port", 2576i64);
    outbound.adapter_settings.set("AckTimeout", 30i64);
    outbound.adapter_settings.set("MaxRetries", 3i64);
    outbound
        .host_settings
        .set("ReplyCodeActions", ":?R=F,:?E=S,:*=S");

    let mut config = ProductionConfig::new("Sample.Production");
    config.items = vec![inbound, router, outbound];
    config.rules = vec![RuleConfig {
        name: "ADT_To_PAS".into(),
        priority: 10,
        condition: "{MSH-9.1} = \"ADT\"".into(),
        action: "send".into(),
        targets: vec!["HL7.Out.PAS".into()],
        transform: None,
        enabled: true,
    }];
    config
}

/// Pretty-printed JSON form of [`sample_config`].
pub fn sample_config_json() -> Result<String, EngineError> {
    serde_json::to_string_pretty(&sample_config()).map_err(|e| EngineError::Configuration {
        reason: format!("sample serialization failed: {e}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sample_config_is_valid() {
        let config = sample_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.items.len(), 3);
    }

    #[test]
    fn test_sample_roundtrips_through_loader() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("production.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(sample_config_json().unwrap().as_bytes())
            .unwrap();

        let loaded = load_path(&path).unwrap();
        assert_eq!(loaded, sample_config());
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = load_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[test]
    fn test_malformed_json_is_configuration_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_path(&path).unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[test]
    fn test_invalid_config_rejected_by_loader() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("dup.json");
        std::fs::write(
            &path,
            r#"{"name": "P", "items": [
                {"name": "A", "class_name": "x"},
                {"name": "A", "class_name": "x"}
            ]}"#,
        )
        .unwrap();
        assert!(load_path(&path).is_err());
    }

    #[test]
    fn test_workspace_path_resolution_absolute_passthrough() {
        let p = resolve_workspace_path("/var/data/inbound");
        assert_eq!(p, PathBuf::from("/var/data/inbound"));
    }
}
