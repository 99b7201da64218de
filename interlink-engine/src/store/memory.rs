//! In-memory store and queue implementations for tests and development.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

// Layer 3: Internal module imports
use super::traits::{ExternalQueue, MessageFilter, MessageRecord, MessageStore, QueuedMessage};
use crate::error::EngineError;
use crate::message::{MessagePriority, MessageState};
use crate::queue::ManagedQueue;

/// Message store backed by a concurrent map. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryMessageStore {
    records: DashMap<String, MessageRecord>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn store(&self, record: MessageRecord) -> Result<(), EngineError> {
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MessageRecord>, EngineError> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn update_state(
        &self,
        id: &str,
        state: MessageState,
        error: Option<String>,
    ) -> Result<(), EngineError> {
        let mut record = self.records.get_mut(id).ok_or_else(|| EngineError::Store {
            reason: format!("record not found: {id}"),
        })?;
        record.state = state;
        record.error = error;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn query(&self, filter: &MessageFilter) -> Result<Vec<MessageRecord>, EngineError> {
        let mut out: Vec<MessageRecord> = self
            .records
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        out.sort_by_key(|r| r.created_at);
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn count(&self, filter: &MessageFilter) -> Result<usize, EngineError> {
        Ok(self
            .records
            .iter()
            .filter(|r| filter.matches(r.value()))
            .count())
    }
}

/// In-process external-queue implementation.
///
/// Honours the lease contract: received messages stay invisible until
/// acked or nacked.
#[derive(Default)]
pub struct MemoryExternalQueue {
    queues: DashMap<String, ManagedQueue<QueuedMessage>>,
    leased: DashMap<String, QueuedMessage>,
}

impl crate::queue::QueueItem for QueuedMessage {
    fn priority(&self) -> MessagePriority {
        self.priority
    }
}

impl MemoryExternalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, name: &str) -> ManagedQueue<QueuedMessage> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| ManagedQueue::fifo(0))
            .clone()
    }
}

#[async_trait]
impl ExternalQueue for MemoryExternalQueue {
    async fn send(
        &self,
        queue: &str,
        payload: Vec<u8>,
        priority: Option<MessagePriority>,
        delay: Option<Duration>,
        correlation_id: Option<String>,
    ) -> Result<String, EngineError> {
        let message = QueuedMessage {
            id: Uuid::new_v4().to_string(),
            queue: queue.to_string(),
            payload,
            priority: priority.unwrap_or_default(),
            correlation_id,
        };
        let id = message.id.clone();
        let target = self.queue(queue);

        if let Some(delay) = delay {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                target.put(message).await;
            });
        } else {
            target.put(message).await;
        }
        Ok(id)
    }

    async fn receive(
        &self,
        queue: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<QueuedMessage>, EngineError> {
        let target = self.queue(queue);
        match target.get(timeout).await {
            Ok(message) => {
                self.leased.insert(message.id.clone(), message.clone());
                Ok(Some(message))
            }
            Err(EngineError::Timeout { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn ack(&self, message: &QueuedMessage) -> Result<(), EngineError> {
        self.leased.remove(&message.id);
        Ok(())
    }

    async fn nack(&self, message: &QueuedMessage, requeue: bool) -> Result<(), EngineError> {
        let leased = self.leased.remove(&message.id);
        if requeue {
            if let Some((_, message)) = leased {
                let queue = message.queue.clone();
                self.queue(&queue).put(message).await;
            }
        }
        Ok(())
    }

    async fn length(&self, queue: &str) -> Result<usize, EngineError> {
        Ok(self.queue(queue).len())
    }
}
