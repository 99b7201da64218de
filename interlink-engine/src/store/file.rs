//! JSON-lines file store: append-only log with an in-memory index.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::warn;

// Layer 3: Internal module imports
use super::traits::{MessageFilter, MessageRecord, MessageStore};
use crate::error::EngineError;
use crate::message::MessageState;

/// Message store appending one JSON record per line to `messages.jsonl`.
///
/// The newest line for a record id wins; updates append a fresh copy.
/// The whole file is loaded into an index at open, so this store suits
/// moderate audit volumes, not unbounded history.
pub struct FileMessageStore {
    path: PathBuf,
    state: Mutex<FileStoreState>,
}

struct FileStoreState {
    index: HashMap<String, MessageRecord>,
    file: std::fs::File,
}

impl FileMessageStore {
    /// Open (or create) the store under `directory`.
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        let path = directory.join("messages.jsonl");

        let mut index = HashMap::new();
        if path.exists() {
            let reader = BufReader::new(std::fs::File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<MessageRecord>(&line) {
                    Ok(record) => {
                        index.insert(record.id.clone(), record);
                    }
                    Err(e) => warn!(error = %e, "skipping corrupt store line"),
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            state: Mutex::new(FileStoreState { index, file }),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn append(state: &mut FileStoreState, record: &MessageRecord) -> Result<(), EngineError> {
        let line = serde_json::to_string(record).map_err(|e| EngineError::Store {
            reason: format!("record serialization failed: {e}"),
        })?;
        state.file.write_all(line.as_bytes())?;
        state.file.write_all(b"\n")?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for FileMessageStore {
    async fn store(&self, record: MessageRecord) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        Self::append(&mut state, &record)?;
        state.index.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MessageRecord>, EngineError> {
        let state = self.state.lock().await;
        Ok(state.index.get(id).cloned())
    }

    async fn update_state(
        &self,
        id: &str,
        state_value: MessageState,
        error: Option<String>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        let mut record = state
            .index
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::Store {
                reason: format!("record not found: {id}"),
            })?;
        record.state = state_value;
        record.error = error;
        record.updated_at = Utc::now();
        Self::append(&mut state, &record)?;
        state.index.insert(record.id.clone(), record);
        Ok(())
    }

    async fn query(&self, filter: &MessageFilter) -> Result<Vec<MessageRecord>, EngineError> {
        let state = self.state.lock().await;
        let mut out: Vec<MessageRecord> = state
            .index
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.created_at);
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn count(&self, filter: &MessageFilter) -> Result<usize, EngineError> {
        let state = self.state.lock().await;
        Ok(state.index.values().filter(|r| filter.matches(r)).count())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::Message;
    use tempfile::TempDir;

    fn record(host: &str) -> MessageRecord {
        let message = Message::create(b"x".to_vec(), "text/plain", host);
        MessageRecord::from_message(host, &message)
    }

    #[tokio::test]
    async fn test_store_and_reload() {
        let dir = TempDir::new().unwrap();
        let id;
        {
            let store = FileMessageStore::open(dir.path()).unwrap();
            let r = record("A");
            id = r.id.clone();
            store.store(r).await.unwrap();
            store
                .update_state(&id, MessageState::Delivered, None)
                .await
                .unwrap();
        }

        // Reopen: the latest line for the id wins.
        let store = FileMessageStore::open(dir.path()).unwrap();
        let loaded = store.get(&id).await.unwrap().unwrap();
        assert_eq!(loaded.state, MessageState::Delivered);
        assert_eq!(store.count(&MessageFilter::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_with_filter() {
        let dir = TempDir::new().unwrap();
        let store = FileMessageStore::open(dir.path()).unwrap();
        store.store(record("A")).await.unwrap();
        store.store(record("B")).await.unwrap();

        let filter = MessageFilter {
            host_name: Some("B".into()),
            ..Default::default()
        };
        let results = store.query(&filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].host_name, "B");
    }

    #[tokio::test]
    async fn test_corrupt_lines_skipped() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileMessageStore::open(dir.path()).unwrap();
            store.store(record("A")).await.unwrap();
        }
        // Corrupt the file with a garbage line.
        let path = dir.path().join("messages.jsonl");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{broken\n").unwrap();

        let store = FileMessageStore::open(dir.path()).unwrap();
        assert_eq!(store.count(&MessageFilter::default()).await.unwrap(), 1);
    }
}
