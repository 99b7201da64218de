//! WAL entry and configuration types.

// Layer 1: Standard library imports
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// Layer 3: Internal module imports
use crate::error::EngineError;

/// State of a WAL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalState {
    /// Written to the log, not yet picked up.
    Pending,
    /// Currently being processed by a worker.
    Processing,
    /// Successfully processed.
    Completed,
    /// Permanently failed (retries exhausted or non-retryable).
    Failed,
    /// Entry TTL elapsed.
    Expired,
}

impl WalState {
    /// Returns `true` for states that survive recovery as live work.
    pub fn is_live(&self) -> bool {
        matches!(self, WalState::Pending | WalState::Processing)
    }
}

/// Durability dial for WAL writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// fsync after every write (safest, slowest).
    Fsync,
    /// Periodic fsync on a configurable interval (balanced).
    Async,
    /// No explicit sync (fastest, least safe).
    None,
}

impl Default for SyncMode {
    fn default() -> Self {
        SyncMode::Async
    }
}

impl FromStr for SyncMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fsync" => Ok(SyncMode::Fsync),
            "async" => Ok(SyncMode::Async),
            "none" => Ok(SyncMode::None),
            other => Err(EngineError::configuration(format!(
                "unknown WAL sync mode: '{other}'"
            ))),
        }
    }
}

/// WAL configuration.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory holding the rotating `wal_<ts>.log` files.
    pub directory: PathBuf,
    /// Rotate once the current file reaches this size.
    pub max_file_size: u64,
    /// Durability mode.
    pub sync_mode: SyncMode,
    /// Interval between syncs in `Async` mode.
    pub sync_interval: Duration,
    /// Interval between checkpoints.
    pub checkpoint_interval: Duration,
    /// Default retry budget for entries.
    pub max_retries: u32,
    /// Delay before a failed entry is re-submitted.
    pub retry_delay: Duration,
    /// Entries older than this are expired at checkpoint.
    pub entry_ttl: Duration,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./wal"),
            max_file_size: 100 * 1024 * 1024,
            sync_mode: SyncMode::default(),
            sync_interval: Duration::from_secs(1),
            checkpoint_interval: Duration::from_secs(60),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            entry_ttl: Duration::from_secs(3600),
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let mut out = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            out.push_str(&format!("{b:02x}"));
        }
        serializer.serialize_str(&out)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        if text.len() % 2 != 0 {
            return Err(serde::de::Error::custom("odd-length hex payload"));
        }
        (0..text.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&text[i..i + 2], 16)
                    .map_err(|_| serde::de::Error::custom("invalid hex payload"))
            })
            .collect()
    }
}

/// A single WAL entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    pub id: String,
    pub sequence: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub state: WalState,
    pub host_name: String,
    pub message_id: String,
    pub message_type: Option<String>,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    pub retry_count: u32,
    pub error: Option<String>,
}

impl WalEntry {
    /// Serialize the entry body for the on-disk frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EngineError> {
        serde_json::to_vec(self).map_err(|e| EngineError::Wal {
            reason: format!("entry serialization failed: {e}"),
        })
    }

    /// Deserialize an entry body from an on-disk frame.
    pub fn from_bytes(data: &[u8]) -> Result<Self, EngineError> {
        serde_json::from_slice(data).map_err(|e| EngineError::Wal {
            reason: format!("entry deserialization failed: {e}"),
        })
    }

    /// SHA-256 checksum over the serialized entry, hex-encoded.
    pub fn checksum(&self) -> Result<String, EngineError> {
        let bytes = self.to_bytes()?;
        let digest = Sha256::digest(&bytes);
        Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Entry age relative to `now_ms`.
    pub fn age(&self, now_ms: i64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.timestamp_ms).max(0) as u64)
    }
}
