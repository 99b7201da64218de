//! Message envelope: identity, routing, governance, and lifecycle state.

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Layer 3: Internal module imports
// (none)

/// Message priority levels for priority queues.
///
/// Lower ordinal means more urgent; ties are broken FIFO by the queue.
///
/// # Examples
///
/// ```rust
/// use interlink_engine::message::MessagePriority;
///
/// assert!(MessagePriority::Urgent.ordinal() < MessagePriority::Low.ordinal());
/// assert_eq!(MessagePriority::default(), MessagePriority::Normal);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    /// Highest priority; processed before everything else.
    Urgent,
    /// Above-normal priority.
    High,
    /// Default priority.
    Normal,
    /// Lowest priority; bulk traffic.
    Low,
}

impl MessagePriority {
    /// Ordering key for priority queues (lower = more urgent).
    pub fn ordinal(&self) -> u8 {
        match self {
            MessagePriority::Urgent => 0,
            MessagePriority::High => 1,
            MessagePriority::Normal => 2,
            MessagePriority::Low => 3,
        }
    }
}

impl Default for MessagePriority {
    fn default() -> Self {
        MessagePriority::Normal
    }
}

impl fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessagePriority::Urgent => "urgent",
            MessagePriority::High => "high",
            MessagePriority::Normal => "normal",
            MessagePriority::Low => "low",
        };
        write!(f, "{s}")
    }
}

/// Delivery guarantee requested for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// Best effort; the message may be lost on crash.
    AtMostOnce,
    /// WAL-backed; the message is re-delivered after a crash.
    AtLeastOnce,
}

impl Default for DeliveryMode {
    fn default() -> Self {
        DeliveryMode::AtLeastOnce
    }
}

/// Lifecycle state of a message inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageState {
    Created,
    Received,
    Queued,
    Processing,
    Delivered,
    Failed,
    DeadLetter,
}

impl MessageState {
    /// Returns `true` once the message has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageState::Delivered | MessageState::Failed | MessageState::DeadLetter
        )
    }
}

/// Data sensitivity classification carried for governance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Public,
    Internal,
    Confidential,
    Restricted,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Sensitivity::Internal
    }
}

/// Routing metadata: where a message came from and where it is going.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Routing {
    /// Name of the host that created or last derived this message.
    pub source: String,
    /// Optional destination host name.
    pub destination: Option<String>,
    /// Optional id of the routing rule that selected the destination.
    pub route_id: Option<String>,
    /// Number of host-to-host hops this message has taken.
    pub hop_count: u32,
}

/// Governance metadata: audit trail and tenancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Governance {
    /// Audit trail identifier.
    pub audit_id: Uuid,
    /// Owning tenant.
    pub tenant_id: String,
    /// Sensitivity classification.
    pub sensitivity: Sensitivity,
}

impl Default for Governance {
    fn default() -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            tenant_id: String::new(),
            sensitivity: Sensitivity::default(),
        }
    }
}

/// Immutable metadata half of a [`crate::message::Message`].
///
/// The envelope is a value type; the `with_*` builders return updated copies
/// and never mutate in place.
///
/// # Examples
///
/// ```rust
/// use interlink_engine::message::{Envelope, MessagePriority};
///
/// let envelope = Envelope::new("HL7.In.TCP")
///     .with_priority(MessagePriority::High)
///     .with_ttl(60);
///
/// assert_eq!(envelope.routing.source, "HL7.In.TCP");
/// assert!(!envelope.is_expired());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique per derivation.
    pub message_id: Uuid,
    /// Shared across a logical conversation.
    pub correlation_id: Uuid,
    /// Message id of the parent this was derived from, if any.
    pub causation_id: Option<Uuid>,
    /// Creation timestamp (UTC).
    pub created_at: DateTime<Utc>,
    /// Explicit expiry instant, if any.
    pub expires_at: Option<DateTime<Utc>>,
    /// Relative time-to-live in seconds, if any.
    pub ttl_seconds: Option<u64>,
    /// Free-form message type, typically `MSG^EVENT`.
    pub message_type: String,
    /// Priority for priority-disciplined queues.
    pub priority: MessagePriority,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Retries consumed so far.
    pub retry_count: u32,
    /// Maximum retries before the message is failed.
    pub max_retries: u32,
    /// Requested delivery guarantee.
    pub delivery_mode: DeliveryMode,
    /// Routing metadata.
    pub routing: Routing,
    /// Governance metadata.
    pub governance: Governance,
    /// Lifecycle state.
    pub state: MessageState,
}

impl Envelope {
    /// Create a fresh envelope originating at `source`.
    ///
    /// The correlation id starts equal to the message id; derivations share it.
    pub fn new(source: impl Into<String>) -> Self {
        let message_id = Uuid::new_v4();
        Self {
            message_id,
            correlation_id: message_id,
            causation_id: None,
            created_at: Utc::now(),
            expires_at: None,
            ttl_seconds: None,
            message_type: String::new(),
            priority: MessagePriority::Normal,
            tags: Vec::new(),
            retry_count: 0,
            max_retries: 3,
            delivery_mode: DeliveryMode::default(),
            routing: Routing {
                source: source.into(),
                ..Routing::default()
            },
            governance: Governance::default(),
            state: MessageState::Created,
        }
    }

    /// Builder method: set the message type.
    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = message_type.into();
        self
    }

    /// Builder method: set the priority.
    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder method: set a relative time-to-live in seconds.
    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    /// Builder method: set an absolute expiry instant.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Builder method: set the destination host name.
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.routing.destination = Some(destination.into());
        self
    }

    /// Builder method: replace the lifecycle state.
    pub fn with_state(mut self, state: MessageState) -> Self {
        self.state = state;
        self
    }

    /// Builder method: append a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Check whether the message has expired, by explicit expiry or TTL.
    pub fn is_expired(&self) -> bool {
        let now = Utc::now();
        if let Some(expires_at) = self.expires_at {
            if now >= expires_at {
                return true;
            }
        }
        if let Some(ttl) = self.ttl_seconds {
            let age = now.signed_duration_since(self.created_at).num_seconds();
            if age >= 0 && age as u64 > ttl {
                return true;
            }
        }
        false
    }

    /// Returns `true` when another retry is still permitted.
    pub fn is_retryable(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
