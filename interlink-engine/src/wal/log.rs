//! The write-ahead log proper: rotating files, durability dial, recovery.
//!
//! File format, per entry:
//! `[u32 BE entry_length][entry bytes][u32 BE checksum_length][checksum bytes]`
//! where the entry bytes are the JSON body and the checksum is the SHA-256
//! hex of those bytes. All writes go through a single writer guarded by one
//! lock; rotation and checkpoint are exclusive with writes.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// Layer 3: Internal module imports
use super::types::{SyncMode, WalConfig, WalEntry, WalState};
use crate::error::EngineError;

/// Write-ahead log handle. Clones share the same log.
///
/// # Examples
///
/// ```rust,no_run
/// use interlink_engine::wal::{Wal, WalConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), interlink_engine::error::EngineError> {
/// let wal = Wal::new(WalConfig::default());
/// wal.start().await?;
///
/// let entry_id = wal
///     .append("HL7.In.TCP", "msg-1", b"MSH|...".to_vec(), Some("ADT_A01".into()))
///     .await?;
/// wal.mark_processing(&entry_id).await?;
/// wal.complete(&entry_id).await?;
///
/// wal.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Wal {
    inner: Arc<WalInner>,
}

struct WalInner {
    config: WalConfig,
    core: Mutex<WalCore>,
    shutdown: CancellationToken,
    tasks: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

struct WalCore {
    sequence: u64,
    /// Live entries: pending, processing, and not-yet-expired failed.
    entries: HashMap<String, WalEntry>,
    file: Option<File>,
    current_path: Option<PathBuf>,
    current_size: u64,
}

impl Wal {
    /// Create a WAL over the configured directory. Call [`Wal::start`]
    /// before use.
    pub fn new(config: WalConfig) -> Self {
        Self {
            inner: Arc::new(WalInner {
                config,
                core: Mutex::new(WalCore {
                    sequence: 0,
                    entries: HashMap::new(),
                    file: None,
                    current_path: None,
                    current_size: 0,
                }),
                shutdown: CancellationToken::new(),
                tasks: parking_lot::Mutex::new(Vec::new()),
            }),
        }
    }

    /// Retry budget configured for this log.
    pub fn max_retries(&self) -> u32 {
        self.inner.config.max_retries
    }

    /// Delay before re-submitting a retryable failure.
    pub fn retry_delay(&self) -> std::time::Duration {
        self.inner.config.retry_delay
    }

    /// Start the WAL: recover existing files, open a fresh file, and spawn
    /// the sync/checkpoint loops.
    pub async fn start(&self) -> Result<(), EngineError> {
        std::fs::create_dir_all(&self.inner.config.directory)?;

        {
            let mut core = self.inner.core.lock().await;
            self.recover(&mut core)?;
            self.rotate(&mut core)?;
        }

        if self.inner.config.sync_mode == SyncMode::Async {
            let wal = self.clone();
            let interval = self.inner.config.sync_interval;
            let token = self.inner.shutdown.clone();
            self.inner.tasks.lock().push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = wal.sync().await {
                                error!(error = %e, "wal sync failed");
                            }
                        }
                    }
                }
            }));
        }

        {
            let wal = self.clone();
            let interval = self.inner.config.checkpoint_interval;
            let token = self.inner.shutdown.clone();
            self.inner.tasks.lock().push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await; // skip the immediate first tick
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = wal.checkpoint().await {
                                error!(error = %e, "wal checkpoint failed");
                            }
                        }
                    }
                }
            }));
        }

        let pending = self.pending().await.len();
        info!(
            directory = %self.inner.config.directory.display(),
            pending,
            sync_mode = ?self.inner.config.sync_mode,
            "wal started"
        );
        Ok(())
    }

    /// Stop background loops and flush the current file.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        if let Err(e) = self.sync().await {
            warn!(error = %e, "final wal sync failed");
        }
        let pending = self.pending().await.len();
        info!(pending, "wal stopped");
    }

    /// Append a new pending entry, returning its id.
    pub async fn append(
        &self,
        host_name: &str,
        message_id: &str,
        payload: Vec<u8>,
        message_type: Option<String>,
    ) -> Result<String, EngineError> {
        let mut core = self.inner.core.lock().await;
        core.sequence += 1;
        let now_ms = Utc::now().timestamp_millis();

        let entry = WalEntry {
            id: format!("{host_name}-{}-{now_ms}", core.sequence),
            sequence: core.sequence,
            timestamp_ms: now_ms,
            state: WalState::Pending,
            host_name: host_name.to_string(),
            message_id: message_id.to_string(),
            message_type,
            payload,
            retry_count: 0,
            error: None,
        };

        self.write_entry(&mut core, &entry)?;
        let id = entry.id.clone();
        core.entries.insert(id.clone(), entry);
        debug!(entry_id = %id, host = host_name, message_id, "wal entry appended");
        Ok(id)
    }

    /// Mark an entry as being processed.
    pub async fn mark_processing(&self, entry_id: &str) -> Result<(), EngineError> {
        let mut core = self.inner.core.lock().await;
        let mut entry = core
            .entries
            .get(entry_id)
            .cloned()
            .ok_or_else(|| EngineError::Wal {
                reason: format!("entry not found: {entry_id}"),
            })?;
        entry.state = WalState::Processing;
        self.write_entry(&mut core, &entry)?;
        core.entries.insert(entry_id.to_string(), entry);
        Ok(())
    }

    /// Mark an entry completed. Idempotent: completing an unknown or
    /// already-completed entry is a no-op.
    pub async fn complete(&self, entry_id: &str) -> Result<(), EngineError> {
        let mut core = self.inner.core.lock().await;
        let Some(mut entry) = core.entries.remove(entry_id) else {
            return Ok(());
        };
        entry.state = WalState::Completed;
        self.write_entry(&mut core, &entry)?;
        debug!(entry_id, "wal entry completed");
        Ok(())
    }

    /// Record a failure against an entry.
    ///
    /// Returns `true` iff the entry remains retryable (the retry counter was
    /// incremented and is still below the budget); the caller is responsible
    /// for re-submission. Returns `false` when the entry is now permanently
    /// failed or unknown.
    pub async fn fail(&self, entry_id: &str, error_text: &str) -> Result<bool, EngineError> {
        let mut core = self.inner.core.lock().await;
        let Some(mut entry) = core.entries.get(entry_id).cloned() else {
            return Ok(false);
        };

        entry.retry_count += 1;
        entry.error = Some(error_text.to_string());

        let retryable = entry.retry_count < self.inner.config.max_retries;
        if retryable {
            entry.state = WalState::Pending;
            warn!(
                entry_id,
                retry = entry.retry_count,
                max_retries = self.inner.config.max_retries,
                error = error_text,
                "wal entry failed, will retry"
            );
        } else {
            entry.state = WalState::Failed;
            warn!(
                entry_id,
                retries = entry.retry_count,
                error = error_text,
                "wal entry failed permanently"
            );
        }

        self.write_entry(&mut core, &entry)?;
        core.entries.insert(entry_id.to_string(), entry);
        Ok(retryable)
    }

    /// Mark an entry permanently failed, regardless of its retry budget.
    ///
    /// Used for non-retryable outcomes such as a reject ACK mapped to `F`.
    pub async fn fail_permanent(&self, entry_id: &str, error_text: &str) -> Result<(), EngineError> {
        let mut core = self.inner.core.lock().await;
        let Some(mut entry) = core.entries.get(entry_id).cloned() else {
            return Ok(());
        };
        entry.state = WalState::Failed;
        entry.error = Some(error_text.to_string());
        self.write_entry(&mut core, &entry)?;
        core.entries.insert(entry_id.to_string(), entry);
        warn!(entry_id, error = error_text, "wal entry failed permanently");
        Ok(())
    }

    /// All pending entries, ordered by sequence.
    pub async fn pending(&self) -> Vec<WalEntry> {
        let core = self.inner.core.lock().await;
        let mut out: Vec<WalEntry> = core
            .entries
            .values()
            .filter(|e| e.state == WalState::Pending)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.sequence);
        out
    }

    /// All permanently failed entries, ordered by sequence.
    pub async fn failed(&self) -> Vec<WalEntry> {
        let core = self.inner.core.lock().await;
        let mut out: Vec<WalEntry> = core
            .entries
            .values()
            .filter(|e| e.state == WalState::Failed)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.sequence);
        out
    }

    /// Number of pending entries.
    pub async fn pending_count(&self) -> usize {
        let core = self.inner.core.lock().await;
        core.entries
            .values()
            .filter(|e| e.state == WalState::Pending)
            .count()
    }

    /// Number of entries currently marked processing.
    pub async fn processing_count(&self) -> usize {
        let core = self.inner.core.lock().await;
        core.entries
            .values()
            .filter(|e| e.state == WalState::Processing)
            .count()
    }

    /// Flush and fsync the current file.
    pub async fn sync(&self) -> Result<(), EngineError> {
        let mut core = self.inner.core.lock().await;
        if let Some(file) = core.file.as_mut() {
            file.flush()?;
            file.sync_all()?;
        }
        Ok(())
    }

    /// Checkpoint: expire aged entries, rewrite live entries into a fresh
    /// file, and delete files that only held completed/expired history.
    pub async fn checkpoint(&self) -> Result<(), EngineError> {
        let mut core = self.inner.core.lock().await;
        let now_ms = Utc::now().timestamp_millis();
        let ttl = self.inner.config.entry_ttl;

        let expired_ids: Vec<String> = core
            .entries
            .values()
            .filter(|e| e.age(now_ms) > ttl)
            .map(|e| e.id.clone())
            .collect();
        for id in &expired_ids {
            if let Some(mut entry) = core.entries.remove(id) {
                entry.state = WalState::Expired;
                self.write_entry(&mut core, &entry)?;
                info!(entry_id = %id, "wal entry expired");
            }
        }

        // Rewrite every live entry into a fresh file, then drop the history.
        let previous = self.list_files()?;
        self.rotate(&mut core)?;
        let live: Vec<WalEntry> = core.entries.values().cloned().collect();
        for entry in &live {
            self.write_entry(&mut core, entry)?;
        }
        if let Some(file) = core.file.as_mut() {
            file.flush()?;
            file.sync_all()?;
        }

        for path in previous {
            if core.current_path.as_deref() != Some(path.as_path()) {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(file = %path.display(), error = %e, "wal file removal failed");
                } else {
                    debug!(file = %path.display(), "wal file removed");
                }
            }
        }

        Ok(())
    }

    fn write_entry(&self, core: &mut WalCore, entry: &WalEntry) -> Result<(), EngineError> {
        if core.file.is_none() {
            self.rotate(core)?;
        }

        let data = entry.to_bytes()?;
        let checksum = entry.checksum()?;
        let checksum_bytes = checksum.as_bytes();

        let mut frame = Vec::with_capacity(8 + data.len() + checksum_bytes.len());
        frame.extend_from_slice(&(data.len() as u32).to_be_bytes());
        frame.extend_from_slice(&data);
        frame.extend_from_slice(&(checksum_bytes.len() as u32).to_be_bytes());
        frame.extend_from_slice(checksum_bytes);

        let file = core.file.as_mut().ok_or_else(|| EngineError::Wal {
            reason: "wal file not open".into(),
        })?;
        file.write_all(&frame)?;
        if self.inner.config.sync_mode == SyncMode::Fsync {
            file.flush()?;
            file.sync_all()?;
        }
        core.current_size += frame.len() as u64;

        if core.current_size >= self.inner.config.max_file_size {
            self.rotate(core)?;
        }
        Ok(())
    }

    fn rotate(&self, core: &mut WalCore) -> Result<(), EngineError> {
        if let Some(file) = core.file.as_mut() {
            file.flush()?;
        }
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let path = self
            .inner
            .config
            .directory
            .join(format!("wal_{timestamp}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(file = %path.display(), "wal file rotated");
        core.file = Some(file);
        core.current_path = Some(path);
        core.current_size = 0;
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<PathBuf>, EngineError> {
        let mut files = Vec::new();
        if !self.inner.config.directory.exists() {
            return Ok(files);
        }
        for dir_entry in std::fs::read_dir(&self.inner.config.directory)? {
            let path = dir_entry?.path();
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            if path.is_file() && name.starts_with("wal_") && name.ends_with(".log") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Scan all files, keep the latest state per entry id, and re-queue
    /// live entries as pending with their retry counters untouched.
    fn recover(&self, core: &mut WalCore) -> Result<(), EngineError> {
        let mut latest: HashMap<String, WalEntry> = HashMap::new();

        for path in self.list_files()? {
            let mut file = match File::open(&path) {
                Ok(f) => f,
                Err(e) => {
                    error!(file = %path.display(), error = %e, "wal recovery open failed");
                    continue;
                }
            };
            let mut buf = Vec::new();
            if let Err(e) = file.read_to_end(&mut buf) {
                error!(file = %path.display(), error = %e, "wal recovery read failed");
                continue;
            }

            let mut pos = 0usize;
            while pos + 4 <= buf.len() {
                let len = u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
                    as usize;
                pos += 4;
                if pos + len > buf.len() {
                    warn!(file = %path.display(), "wal file truncated mid-entry");
                    break;
                }
                let data = &buf[pos..pos + len];
                pos += len;

                if pos + 4 > buf.len() {
                    warn!(file = %path.display(), "wal file truncated before checksum");
                    break;
                }
                let check_len =
                    u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
                        as usize;
                pos += 4;
                if pos + check_len > buf.len() {
                    warn!(file = %path.display(), "wal file truncated mid-checksum");
                    break;
                }
                let checksum = String::from_utf8_lossy(&buf[pos..pos + check_len]).to_string();
                pos += check_len;

                let entry = match WalEntry::from_bytes(data) {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "wal entry parse failed");
                        continue;
                    }
                };
                match entry.checksum() {
                    Ok(expected) if expected == checksum => {}
                    _ => {
                        warn!(entry_id = %entry.id, "wal checksum mismatch, entry skipped");
                        continue;
                    }
                }

                core.sequence = core.sequence.max(entry.sequence);
                latest.insert(entry.id.clone(), entry);
            }
        }

        let mut recovered = 0usize;
        for (id, mut entry) in latest {
            match entry.state {
                WalState::Pending | WalState::Processing => {
                    // A crash must not consume a retry: only the state is
                    // reset, the counter is preserved.
                    entry.state = WalState::Pending;
                    core.entries.insert(id, entry);
                    recovered += 1;
                }
                WalState::Failed => {
                    core.entries.insert(id, entry);
                }
                WalState::Completed | WalState::Expired => {}
            }
        }

        if recovered > 0 {
            info!(entries = recovered, "wal recovered in-flight entries");
        }
        Ok(())
    }
}
