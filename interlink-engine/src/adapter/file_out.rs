//! Outbound file adapter: writes each message to a file.
//!
//! Filename templates support `%timestamp%`, `%date%`, `%time%`, `%id%`,
//! and `%type%`. With `TempFileSuffix` set, writes go to a temp name first
//! and are renamed into place for atomicity.

// Layer 1: Standard library imports
use std::io::Write;
use std::path::PathBuf;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

// Layer 3: Internal module imports
use super::traits::{Adapter, AdapterCore, AdapterMetricsSnapshot, AdapterState, OutboundAdapter};
use crate::config::{resolve_workspace_path, Settings};
use crate::error::EngineError;

const DEFAULT_FILENAME: &str = "msg_%timestamp%_%id%.hl7";

/// File-writing adapter for outbound operations.
///
/// Settings: `FilePath` (required), `Filename` (template), `Overwrite`
/// (`error` | `overwrite` | `append`), `TempFileSuffix` (empty disables the
/// write-rename step).
pub struct FileOutboundAdapter {
    core: AdapterCore,
    directory: parking_lot::Mutex<Option<PathBuf>>,
}

impl FileOutboundAdapter {
    pub fn new(host_name: &str, settings: Settings) -> Self {
        Self {
            core: AdapterCore::new("file-outbound", host_name, settings),
            directory: parking_lot::Mutex::new(None),
        }
    }

    fn resolve_filename(&self, message_type: Option<&str>) -> String {
        let template = self
            .core
            .settings()
            .get_or("Filename", DEFAULT_FILENAME);
        let now = Utc::now();
        let id = Uuid::new_v4().simple().to_string();
        let msg_type = message_type.unwrap_or("unknown").replace('^', "_");

        template
            .replace("%timestamp%", &now.format("%Y%m%d_%H%M%S_%6f").to_string())
            .replace("%date%", &now.format("%Y%m%d").to_string())
            .replace("%time%", &now.format("%H%M%S").to_string())
            .replace("%id%", &id[..8])
            .replace("%type%", &msg_type)
    }
}

#[async_trait]
impl Adapter for FileOutboundAdapter {
    fn kind(&self) -> &'static str {
        self.core.kind()
    }

    fn state(&self) -> AdapterState {
        self.core.state()
    }

    fn metrics(&self) -> AdapterMetricsSnapshot {
        self.core.metrics().snapshot()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn start(&self) -> Result<(), EngineError> {
        self.core.begin_start()?;
        let file_path = match self.core.settings().get_str("FilePath") {
            Some(path) => resolve_workspace_path(&path),
            None => {
                self.core.set_state(AdapterState::Error);
                return Err(EngineError::configuration(format!(
                    "host '{}': file outbound adapter requires FilePath",
                    self.core.host_name()
                )));
            }
        };
        std::fs::create_dir_all(&file_path)?;
        *self.directory.lock() = Some(file_path);
        self.core.mark_running();
        info!(host = self.core.host_name(), "file outbound adapter started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        if !matches!(self.state(), AdapterState::Running | AdapterState::Error) {
            return Ok(());
        }
        self.core.set_state(AdapterState::Stopped);
        info!(host = self.core.host_name(), "file outbound adapter stopped");
        Ok(())
    }
}

#[async_trait]
impl OutboundAdapter for FileOutboundAdapter {
    async fn send(
        &self,
        payload: &[u8],
        message_type: Option<&str>,
    ) -> Result<Vec<u8>, EngineError> {
        let directory = self
            .directory
            .lock()
            .clone()
            .ok_or_else(|| EngineError::Send {
                reason: "file outbound adapter not started".into(),
            })?;

        let filename = self.resolve_filename(message_type);
        let target = directory.join(&filename);
        let overwrite = self.core.settings().get_or("Overwrite", "error");
        let temp_suffix = self.core.settings().get_or("TempFileSuffix", ".tmp");

        if target.exists() {
            match overwrite.as_str() {
                "error" => {
                    self.core.metrics().record_error();
                    return Err(EngineError::Send {
                        reason: format!("file already exists: {}", target.display()),
                    });
                }
                "append" => {
                    let mut file = std::fs::OpenOptions::new().append(true).open(&target)?;
                    file.write_all(payload)?;
                    self.core.metrics().record_sent(payload.len());
                    debug!(file = %filename, size = payload.len(), "message appended");
                    return Ok(Vec::new());
                }
                _ => {} // overwrite: fall through to a plain write
            }
        }

        if temp_suffix.is_empty() {
            std::fs::write(&target, payload)?;
        } else {
            let temp = directory.join(format!("{filename}{temp_suffix}"));
            std::fs::write(&temp, payload)?;
            std::fs::rename(&temp, &target)?;
        }

        self.core.metrics().record_sent(payload.len());
        debug!(file = %filename, size = payload.len(), "message written");
        Ok(Vec::new())
    }
}
