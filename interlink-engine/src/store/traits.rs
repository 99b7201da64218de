//! Store and queue contracts.

// Layer 1: Standard library imports
use std::collections::BTreeMap;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Layer 3: Internal module imports
use crate::error::EngineError;
use crate::message::{Message, MessagePriority, MessageState};

/// Audit record persisted for a processed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Store-assigned record id.
    pub id: String,
    /// Engine message id.
    pub message_id: String,
    /// Host that handled the message.
    pub host_name: String,
    pub message_type: Option<String>,
    pub state: MessageState,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
    pub source: Option<String>,
    pub target: Option<String>,
    pub correlation_id: Option<String>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl MessageRecord {
    /// Build an audit record from an engine message.
    pub fn from_message(host_name: &str, message: &Message) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            message_id: message.envelope.message_id.to_string(),
            host_name: host_name.to_string(),
            message_type: if message.envelope.message_type.is_empty() {
                None
            } else {
                Some(message.envelope.message_type.clone())
            },
            state: message.envelope.state,
            payload: message.payload.raw.clone(),
            created_at: now,
            updated_at: now,
            metadata: BTreeMap::new(),
            source: Some(message.envelope.routing.source.clone()),
            target: message.envelope.routing.destination.clone(),
            correlation_id: Some(message.envelope.correlation_id.to_string()),
            error: None,
            retry_count: message.envelope.retry_count,
        }
    }
}

/// Filter for store queries; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageFilter {
    pub host_name: Option<String>,
    pub state: Option<MessageState>,
    pub message_type: Option<String>,
    pub correlation_id: Option<String>,
    pub limit: Option<usize>,
}

impl MessageFilter {
    /// Does `record` satisfy this filter?
    pub fn matches(&self, record: &MessageRecord) -> bool {
        if let Some(host) = &self.host_name {
            if &record.host_name != host {
                return false;
            }
        }
        if let Some(state) = self.state {
            if record.state != state {
                return false;
            }
        }
        if let Some(message_type) = &self.message_type {
            if record.message_type.as_deref() != Some(message_type.as_str()) {
                return false;
            }
        }
        if let Some(correlation_id) = &self.correlation_id {
            if record.correlation_id.as_deref() != Some(correlation_id.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Audit/replay store for processed messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn store(&self, record: MessageRecord) -> Result<(), EngineError>;
    async fn get(&self, id: &str) -> Result<Option<MessageRecord>, EngineError>;
    async fn update_state(
        &self,
        id: &str,
        state: MessageState,
        error: Option<String>,
    ) -> Result<(), EngineError>;
    async fn query(&self, filter: &MessageFilter) -> Result<Vec<MessageRecord>, EngineError>;
    async fn count(&self, filter: &MessageFilter) -> Result<usize, EngineError>;
}

/// A message leased from an external queue, held until ack/nack.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub id: String,
    pub queue: String,
    pub payload: Vec<u8>,
    pub priority: MessagePriority,
    pub correlation_id: Option<String>,
}

/// Cross-process queue contract. When a host is configured with an external
/// queue, `submit` and the worker `get` delegate through this instead of
/// the in-process managed queue.
#[async_trait]
pub trait ExternalQueue: Send + Sync {
    async fn send(
        &self,
        queue: &str,
        payload: Vec<u8>,
        priority: Option<MessagePriority>,
        delay: Option<Duration>,
        correlation_id: Option<String>,
    ) -> Result<String, EngineError>;

    /// Lease the next message, waiting up to `timeout`.
    async fn receive(
        &self,
        queue: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<QueuedMessage>, EngineError>;

    async fn ack(&self, message: &QueuedMessage) -> Result<(), EngineError>;

    async fn nack(&self, message: &QueuedMessage, requeue: bool) -> Result<(), EngineError>;

    async fn length(&self, queue: &str) -> Result<usize, EngineError>;
}
