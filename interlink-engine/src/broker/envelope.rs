//! Envelopes and work items exchanged between hosts.

// Layer 1: Standard library imports
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Layer 3: Internal module imports
use crate::error::EngineError;
use crate::message::{Message, MessagePriority};
use crate::queue::QueueItem;

/// Messaging pattern for an inter-host request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingPattern {
    /// Fire-and-forget: the sender continues immediately.
    Async,
    /// Request/reply: the sender awaits a correlated response.
    Sync,
}

impl Default for MessagingPattern {
    fn default() -> Self {
        MessagingPattern::Async
    }
}

impl FromStr for MessagingPattern {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Legacy configurations spell the reliable variants out in full.
        match s.to_ascii_lowercase().as_str() {
            "async" | "async_reliable" | "concurrent_async" => Ok(MessagingPattern::Async),
            "sync" | "sync_reliable" | "concurrent_sync" => Ok(MessagingPattern::Sync),
            other => Err(EngineError::configuration(format!(
                "unknown messaging pattern: '{other}'"
            ))),
        }
    }
}

/// Envelope wrapping a message routed from one host to another.
#[derive(Debug, Clone)]
pub struct HostEnvelope {
    /// Correlation key for the pending-response table.
    pub correlation_id: Uuid,
    /// Async or sync handling at the target.
    pub pattern: MessagingPattern,
    /// Sending host name.
    pub source: String,
    /// Target host name.
    pub target: String,
    /// Queue priority at the target.
    pub priority: MessagePriority,
    /// Sync reply deadline.
    pub timeout: Duration,
    /// The message itself.
    pub message: Message,
    /// Optional request properties.
    pub properties: BTreeMap<String, String>,
}

impl HostEnvelope {
    /// Build an envelope for `message` from `source` to `target`.
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        message: Message,
        pattern: MessagingPattern,
    ) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            pattern,
            source: source.into(),
            target: target.into(),
            priority: message.envelope.priority,
            timeout: Duration::from_secs(30),
            message,
            properties: BTreeMap::new(),
        }
    }

    /// Builder method: set the queue priority.
    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder method: set the sync reply deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder method: attach a request property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Metadata a worker records when an item arrived as an envelope.
#[derive(Debug, Clone)]
pub struct EnvelopeMeta {
    pub correlation_id: Uuid,
    pub pattern: MessagingPattern,
    pub source: String,
}

/// A unit of work in a host queue: the message plus how it arrived.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub message: Message,
    /// Present when the item came through the inter-host fabric.
    pub envelope: Option<EnvelopeMeta>,
    /// WAL entry tracking this work, when the host has a WAL.
    pub wal_entry_id: Option<String>,
}

impl WorkItem {
    /// Raw external ingress (or fan-out) work.
    pub fn from_message(message: Message) -> Self {
        Self {
            message,
            envelope: None,
            wal_entry_id: None,
        }
    }

    /// Work delivered through the inter-host fabric.
    pub fn from_envelope(envelope: HostEnvelope) -> Self {
        let meta = EnvelopeMeta {
            correlation_id: envelope.correlation_id,
            pattern: envelope.pattern,
            source: envelope.source,
        };
        let mut message = envelope.message;
        // The envelope's priority wins over whatever the message carried.
        message.envelope.priority = envelope.priority;
        Self {
            message,
            envelope: Some(meta),
            wal_entry_id: None,
        }
    }

    /// Returns `true` when a sync waiter is parked on this item.
    pub fn is_sync(&self) -> bool {
        matches!(
            self.envelope,
            Some(EnvelopeMeta {
                pattern: MessagingPattern::Sync,
                ..
            })
        )
    }
}

impl QueueItem for WorkItem {
    fn priority(&self) -> MessagePriority {
        self.message.envelope.priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        Message::create(b"data".to_vec(), "text/plain", "src")
    }

    #[test]
    fn test_pattern_parse() {
        #[allow(clippy::unwrap_used)]
        {
            assert_eq!(
                "async".parse::<MessagingPattern>().unwrap(),
                MessagingPattern::Async
            );
            assert_eq!(
                "sync_reliable".parse::<MessagingPattern>().unwrap(),
                MessagingPattern::Sync
            );
            assert_eq!(
                "CONCURRENT_ASYNC".parse::<MessagingPattern>().unwrap(),
                MessagingPattern::Async
            );
        }
        assert!("broadcast".parse::<MessagingPattern>().is_err());
    }

    #[test]
    fn test_envelope_builder() {
        let env = HostEnvelope::new("A", "B", message(), MessagingPattern::Sync)
            .with_priority(MessagePriority::High)
            .with_timeout(Duration::from_secs(5))
            .with_property("reply-to", "A");

        assert_eq!(env.source, "A");
        assert_eq!(env.target, "B");
        assert_eq!(env.priority, MessagePriority::High);
        assert_eq!(env.timeout, Duration::from_secs(5));
        assert_eq!(env.properties.get("reply-to").map(String::as_str), Some("A"));
    }

    #[test]
    fn test_work_item_sync_detection() {
        let sync_item =
            WorkItem::from_envelope(HostEnvelope::new("A", "B", message(), MessagingPattern::Sync));
        assert!(sync_item.is_sync());

        let async_item = WorkItem::from_envelope(HostEnvelope::new(
            "A",
            "B",
            message(),
            MessagingPattern::Async,
        ));
        assert!(!async_item.is_sync());

        let raw_item = WorkItem::from_message(message());
        assert!(!raw_item.is_sync());
    }

    #[test]
    fn test_envelope_priority_wins() {
        let env = HostEnvelope::new("A", "B", message(), MessagingPattern::Async)
            .with_priority(MessagePriority::Urgent);
        let item = WorkItem::from_envelope(env);
        assert_eq!(item.message.envelope.priority, MessagePriority::Urgent);
        assert_eq!(
            crate::queue::QueueItem::priority(&item),
            MessagePriority::Urgent
        );
    }
}
