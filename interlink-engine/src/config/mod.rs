//! Production configuration records and the JSON loader.
//!
//! Configuration errors are fatal at startup: a production never transitions
//! to `running` with a malformed config.

pub mod item;
pub mod loader;
pub mod production;

pub use item::{ItemConfig, SettingValue, Settings};
pub use loader::{load_path, resolve_workspace_path, sample_config, sample_config_json};
pub use production::{ConnectionConfig, ConnectionKind, ProductionConfig, RuleConfig};
