//! Inbound file adapter: polls a directory for message files.
//!
//! Per poll tick, matching top-level files are processed oldest-first. Each
//! file is claimed by an atomic rename into the work directory, read, handed
//! to the host, and then archived (with a timestamped name) or deleted. A
//! failed file is moved back to its original name for the next tick.

// Layer 1: Standard library imports
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use chrono::Utc;
use glob::Pattern;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// Layer 3: Internal module imports
use super::traits::{
    Adapter, AdapterCore, AdapterMetrics, AdapterMetricsSnapshot, AdapterState, IngressHandler,
};
use crate::config::{resolve_workspace_path, Settings};
use crate::error::EngineError;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_FILE_SPEC: &str = "*.hl7";
const DEFAULT_ARCHIVE_PATH: &str = "archive";
const DEFAULT_WORK_PATH: &str = "work";

/// Directory-polling adapter for inbound services.
///
/// Settings: `FilePath` (required), `FileSpec` (glob, default `*.hl7`),
/// `PollInterval` (seconds), `ArchivePath` (empty string deletes processed
/// files), `WorkPath`, `SemaphoreSpec` (optional; when set a data file is
/// only processed once its matching semaphore file exists).
pub struct FileInboundAdapter {
    core: AdapterCore,
    ingress: Arc<dyn IngressHandler>,
    runtime: parking_lot::Mutex<Option<Runtime>>,
}

struct Runtime {
    token: CancellationToken,
    poll_task: tokio::task::JoinHandle<()>,
}

struct PollerConfig {
    file_path: PathBuf,
    file_spec: Pattern,
    archive_path: Option<PathBuf>,
    work_path: Option<PathBuf>,
    semaphore_suffix: Option<String>,
}

impl FileInboundAdapter {
    pub fn new(host_name: &str, settings: Settings, ingress: Arc<dyn IngressHandler>) -> Self {
        Self {
            core: AdapterCore::new("file-inbound", host_name, settings),
            ingress,
            runtime: parking_lot::Mutex::new(None),
        }
    }

    fn poller_config(&self) -> Result<PollerConfig, EngineError> {
        let settings = self.core.settings();
        let file_path = settings.get_str("FilePath").ok_or_else(|| {
            EngineError::configuration(format!(
                "host '{}': file inbound adapter requires FilePath",
                self.core.host_name()
            ))
        })?;
        let file_path = resolve_workspace_path(&file_path);

        let spec_text = settings.get_or("FileSpec", DEFAULT_FILE_SPEC);
        let file_spec = Pattern::new(&spec_text).map_err(|e| {
            EngineError::configuration(format!("invalid FileSpec '{spec_text}': {e}"))
        })?;

        let archive_setting = settings.get_or("ArchivePath", DEFAULT_ARCHIVE_PATH);
        let archive_path = if archive_setting.is_empty() {
            None
        } else {
            Some(resolve_relative(&file_path, &archive_setting))
        };

        let work_setting = settings.get_or("WorkPath", DEFAULT_WORK_PATH);
        let work_path = if work_setting.is_empty() {
            None
        } else {
            Some(resolve_relative(&file_path, &work_setting))
        };

        let semaphore_suffix = settings.get_str("SemaphoreSpec").and_then(|spec| {
            Path::new(&spec)
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
        });

        Ok(PollerConfig {
            file_path,
            file_spec,
            archive_path,
            work_path,
            semaphore_suffix,
        })
    }

    async fn poll_directory(
        config: &PollerConfig,
        ingress: &Arc<dyn IngressHandler>,
        metrics: &AdapterMetrics,
        token: &CancellationToken,
    ) {
        let mut files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
        let entries = match std::fs::read_dir(&config.file_path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "directory listing failed");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            if !config.file_spec.matches(&name) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            files.push((path, modified));
        }
        files.sort_by_key(|(_, modified)| *modified);

        for (path, _) in files {
            if token.is_cancelled() {
                break;
            }
            if let Some(suffix) = &config.semaphore_suffix {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                let semaphore = config.file_path.join(format!("{stem}{suffix}"));
                if !semaphore.exists() {
                    continue; // wait for the semaphore to appear
                }
            }
            Self::process_file(&path, config, ingress, metrics).await;
        }
    }

    async fn process_file(
        path: &Path,
        config: &PollerConfig,
        ingress: &Arc<dyn IngressHandler>,
        metrics: &AdapterMetrics,
    ) {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        // Claim by rename: another poller losing the race just skips.
        let read_path = match &config.work_path {
            Some(work) => {
                let claimed = work.join(&file_name);
                if let Err(e) = std::fs::rename(path, &claimed) {
                    debug!(file = %file_name, error = %e, "claim failed, skipping");
                    return;
                }
                claimed
            }
            None => path.to_path_buf(),
        };

        let result = async {
            let data = std::fs::read(&read_path)?;
            metrics.record_received(data.len());
            debug!(file = %file_name, size = data.len(), "file message received");
            ingress
                .on_message_received(data)
                .await
                .map(|_| ())
        }
        .await;

        match result {
            Ok(()) => {
                let disposed = match &config.archive_path {
                    Some(archive) => {
                        let stem = read_path
                            .file_stem()
                            .map(|s| s.to_string_lossy().to_string())
                            .unwrap_or_default();
                        let ext = read_path
                            .extension()
                            .map(|e| format!(".{}", e.to_string_lossy()))
                            .unwrap_or_default();
                        let ts = Utc::now().format("%Y%m%d_%H%M%S_%6f");
                        let target = archive.join(format!("{stem}_{ts}{ext}"));
                        std::fs::rename(&read_path, &target)
                    }
                    None => std::fs::remove_file(&read_path),
                };
                if let Err(e) = disposed {
                    warn!(file = %file_name, error = %e, "file disposal failed");
                    metrics.record_error();
                }
                // Clean up the semaphore so the file is not reprocessed.
                if let Some(suffix) = &config.semaphore_suffix {
                    let stem = Path::new(&file_name)
                        .file_stem()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_default();
                    let _ = std::fs::remove_file(config.file_path.join(format!("{stem}{suffix}")));
                }
            }
            Err(e) => {
                warn!(file = %file_name, error = %e, "file processing failed");
                metrics.record_error();
                // Return the file to its original name for the next tick.
                if config.work_path.is_some() {
                    let original = config.file_path.join(&file_name);
                    if let Err(e) = std::fs::rename(&read_path, &original) {
                        warn!(file = %file_name, error = %e, "failed to restore claimed file");
                    }
                }
            }
        }
    }
}

fn resolve_relative(base: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[async_trait]
impl Adapter for FileInboundAdapter {
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

        let config = match self.poller_config() {
            Ok(config) => config,
            Err(e) => {
                self.core.set_state(AdapterState::Error);
                return Err(e);
            }
        };

        std::fs::create_dir_all(&config.file_path)?;
        if let Some(archive) = &config.archive_path {
            std::fs::create_dir_all(archive)?;
        }
        if let Some(work) = &config.work_path {
            std::fs::create_dir_all(work)?;
            // Files left in the work directory belong to a run that died
            // between claim and archive; return them for reprocessing.
            // Duplicate detection is the application's responsibility.
            for entry in std::fs::read_dir(work)?.flatten() {
                let orphan = entry.path();
                if !orphan.is_file() {
                    continue;
                }
                let name = entry.file_name();
                let restored = config.file_path.join(&name);
                match std::fs::rename(&orphan, &restored) {
                    Ok(()) => {
                        warn!(file = %name.to_string_lossy(), "orphaned claim returned for reprocessing");
                    }
                    Err(e) => {
                        warn!(file = %name.to_string_lossy(), error = %e, "orphaned claim restore failed");
                    }
                }
            }
        }

        let poll_interval = self
            .core
            .settings()
            .get_duration_secs("PollInterval", DEFAULT_POLL_INTERVAL);
        let token = CancellationToken::new();
        let poll_token = token.clone();
        let ingress = Arc::clone(&self.ingress);
        let metrics = self.core.metrics_handle();

        let poll_task = tokio::spawn(async move {
            loop {
                Self::poll_directory(&config, &ingress, &metrics, &poll_token).await;
                tokio::select! {
                    _ = poll_token.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        });

        *self.runtime.lock() = Some(Runtime { token, poll_task });
        self.core.mark_running();
        info!(
            host = self.core.host_name(),
            interval = ?poll_interval,
            "file inbound adapter started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        if !matches!(self.state(), AdapterState::Running | AdapterState::Error) {
            return Ok(());
        }
        self.core.set_state(AdapterState::Stopping);
        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            runtime.token.cancel();
            let _ = runtime.poll_task.await;
        }
        self.core.set_state(AdapterState::Stopped);
        info!(host = self.core.host_name(), "file inbound adapter stopped");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    struct Collector {
        seen: Mutex<Vec<Vec<u8>>>,
        fail: bool,
    }

    #[async_trait]
    impl IngressHandler for Collector {
        async fn on_message_received(&self, raw: Vec<u8>) -> Result<Option<Vec<u8>>, EngineError> {
            if self.fail {
                return Err(EngineError::validation("rejected"));
            }
            self.seen.lock().push(raw);
            Ok(None)
        }
    }

    fn settings(dir: &TempDir) -> Settings {
        let mut s = Settings::new();
        s.set("FilePath", dir.path().to_string_lossy().to_string());
        s.set("PollInterval", "0.05");
        s
    }

    async fn wait_for<F: Fn() -> bool>(what: F) {
        for _ in 0..100 {
            if what() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn test_file_picked_up_and_archived() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("msg1.hl7"), b"MSH|one").unwrap();

        let collector = Arc::new(Collector {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        let adapter =
            FileInboundAdapter::new("HL7.In.File", settings(&dir), Arc::clone(&collector) as _);
        adapter.start().await.unwrap();

        wait_for(|| collector.seen.lock().len() == 1).await;
        assert_eq!(collector.seen.lock()[0], b"MSH|one");

        // The source file is gone; an archived copy exists.
        wait_for(|| !dir.path().join("msg1.hl7").exists()).await;
        let archived: Vec<_> = std::fs::read_dir(dir.path().join("archive"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(archived.len(), 1);
        assert!(archived[0].starts_with("msg1_"));

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_non_matching_files_ignored() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not hl7").unwrap();

        let collector = Arc::new(Collector {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        let adapter =
            FileInboundAdapter::new("HL7.In.File", settings(&dir), Arc::clone(&collector) as _);
        adapter.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(collector.seen.lock().is_empty());
        assert!(dir.path().join("notes.txt").exists());

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_mode_when_archive_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("msg1.hl7"), b"MSH|one").unwrap();

        let mut s = settings(&dir);
        s.set("ArchivePath", "");
        let collector = Arc::new(Collector {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        let adapter = FileInboundAdapter::new("HL7.In.File", s, Arc::clone(&collector) as _);
        adapter.start().await.unwrap();

        wait_for(|| collector.seen.lock().len() == 1).await;
        wait_for(|| !dir.path().join("msg1.hl7").exists()).await;
        assert!(!dir.path().join("archive").exists());

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_file_returned_for_retry() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("msg1.hl7"), b"MSH|bad").unwrap();

        let collector = Arc::new(Collector {
            seen: Mutex::new(Vec::new()),
            fail: true,
        });
        let adapter =
            FileInboundAdapter::new("HL7.In.File", settings(&dir), Arc::clone(&collector) as _);
        adapter.start().await.unwrap();

        // Give it a few ticks: the file keeps coming back to its original name.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(dir.path().join("msg1.hl7").exists());
        assert!(adapter.metrics().errors_total > 0);

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_semaphore_gates_processing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("msg1.hl7"), b"MSH|one").unwrap();

        let mut s = settings(&dir);
        s.set("SemaphoreSpec", "*.sem");
        let collector = Arc::new(Collector {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        let adapter = FileInboundAdapter::new("HL7.In.File", s, Arc::clone(&collector) as _);
        adapter.start().await.unwrap();

        // Without the semaphore nothing happens.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(collector.seen.lock().is_empty());

        // Drop the semaphore; the file is processed and both are cleaned up.
        std::fs::write(dir.path().join("msg1.sem"), b"").unwrap();
        wait_for(|| collector.seen.lock().len() == 1).await;
        wait_for(|| !dir.path().join("msg1.sem").exists()).await;

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_orphaned_work_files_reprocessed_on_start() {
        let dir = TempDir::new().unwrap();
        // A previous run claimed this file and then died.
        std::fs::create_dir_all(dir.path().join("work")).unwrap();
        std::fs::write(dir.path().join("work").join("msg1.hl7"), b"MSH|orphan").unwrap();

        let collector = Arc::new(Collector {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        let adapter =
            FileInboundAdapter::new("HL7.In.File", settings(&dir), Arc::clone(&collector) as _);
        adapter.start().await.unwrap();

        wait_for(|| collector.seen.lock().len() == 1).await;
        assert_eq!(collector.seen.lock()[0], b"MSH|orphan");

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_path_is_configuration_error() {
        let collector = Arc::new(Collector {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        let adapter = FileInboundAdapter::new("HL7.In.File", Settings::new(), collector);
        assert!(matches!(
            adapter.start().await,
            Err(EngineError::Configuration { .. })
        ));
    }
}
