//! The immutable message value and its derivation rules.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::error::EngineError;
use crate::message::envelope::{Envelope, MessageState};
use crate::message::payload::{Payload, PropertyValue, TypedProperty};

/// An immutable clinical message: `(Envelope, Payload)`.
///
/// Messages are value types. Every update returns a new value; the raw
/// payload bytes of the original are never touched. Deriving a message for
/// a downstream host mints a fresh message id while preserving the
/// correlation id and recording causation.
///
/// # Examples
///
/// ```rust
/// use interlink_engine::message::{Message, MessageState};
///
/// let parent = Message::create(b"MSH|...".to_vec(), "application/hl7-v2+er7", "HL7.In.TCP");
/// let child = parent.derive("HL7.Router");
///
/// assert_ne!(child.envelope.message_id, parent.envelope.message_id);
/// assert_eq!(child.envelope.correlation_id, parent.envelope.correlation_id);
/// assert_eq!(child.envelope.causation_id, Some(parent.envelope.message_id));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub envelope: Envelope,
    pub payload: Payload,
}

impl Message {
    /// Ingress constructor: wrap raw bytes received by a service.
    pub fn create(
        raw: impl Into<Vec<u8>>,
        content_type: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            envelope: Envelope::new(source).with_state(MessageState::Received),
            payload: Payload::new(raw, content_type),
        }
    }

    /// Raw payload bytes (authoritative, never mutated).
    pub fn raw(&self) -> &[u8] {
        &self.payload.raw
    }

    /// Returns a new message with the given lifecycle state.
    pub fn with_state(&self, state: MessageState) -> Self {
        Self {
            envelope: self.envelope.clone().with_state(state),
            payload: self.payload.clone(),
        }
    }

    /// Returns a new message with `name` set to the given property.
    ///
    /// Fails with `ValidationFailed` when the property violates its size
    /// constraint.
    pub fn with_property(
        &self,
        name: impl Into<String>,
        value: PropertyValue,
        max_size: Option<usize>,
    ) -> Result<Self, EngineError> {
        let prop = TypedProperty::new(value, max_size)?;
        let mut next = self.clone();
        next.payload.properties.insert(name.into(), prop);
        Ok(next)
    }

    /// Returns a new message carrying replacement payload bytes.
    ///
    /// The result is a *different* message value; the original's raw bytes
    /// are untouched.
    pub fn with_payload(&self, raw: impl Into<Vec<u8>>) -> Self {
        let mut next = self.clone();
        next.payload.raw = raw.into();
        next
    }

    /// Derive a child message for the given downstream host.
    ///
    /// The child gets a fresh message id, keeps the parent's correlation id,
    /// records the parent's message id as its causation id, and advances the
    /// hop count. Retry bookkeeping starts over.
    pub fn derive(&self, source: impl Into<String>) -> Self {
        let mut envelope = self.envelope.clone();
        envelope.causation_id = Some(self.envelope.message_id);
        envelope.message_id = uuid::Uuid::new_v4();
        envelope.created_at = chrono::Utc::now();
        envelope.routing.source = source.into();
        envelope.routing.destination = None;
        envelope.routing.hop_count += 1;
        envelope.retry_count = 0;
        envelope.state = MessageState::Created;

        Self {
            envelope,
            payload: self.payload.clone(),
        }
    }

    /// Whether this message has passed its expiry or TTL.
    pub fn is_expired(&self) -> bool {
        self.envelope.is_expired()
    }

    // Wire envelopes: a JSON form for interop and a compact CBOR form for
    // queue payloads. Both round-trip losslessly.

    pub fn to_json(&self) -> Result<Vec<u8>, EngineError> {
        serde_json::to_vec(self).map_err(|e| EngineError::Validation {
            reason: format!("json envelope serialization failed: {e}"),
        })
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, EngineError> {
        serde_json::from_slice(bytes).map_err(|e| EngineError::Validation {
            reason: format!("json envelope deserialization failed: {e}"),
        })
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, EngineError> {
        serde_cbor::to_vec(self).map_err(|e| EngineError::Validation {
            reason: format!("cbor envelope serialization failed: {e}"),
        })
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, EngineError> {
        serde_cbor::from_slice(bytes).map_err(|e| EngineError::Validation {
            reason: format!("cbor envelope deserialization failed: {e}"),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::envelope::MessagePriority;

    #[test]
    fn test_create_sets_received_state() {
        let msg = Message::create(b"data".to_vec(), "text/plain", "src");
        assert_eq!(msg.envelope.state, MessageState::Received);
        assert_eq!(msg.envelope.routing.source, "src");
        assert_eq!(msg.raw(), b"data");
    }

    #[test]
    fn test_derive_preserves_correlation_and_records_causation() {
        let parent = Message::create(b"data".to_vec(), "text/plain", "src");
        let child = parent.derive("router");

        assert_ne!(child.envelope.message_id, parent.envelope.message_id);
        assert_eq!(child.envelope.correlation_id, parent.envelope.correlation_id);
        assert_eq!(child.envelope.causation_id, Some(parent.envelope.message_id));
        assert_eq!(child.envelope.routing.hop_count, 1);
        assert_eq!(child.envelope.routing.source, "router");
        assert_eq!(child.raw(), parent.raw());
    }

    #[test]
    fn test_derive_resets_retry_count() {
        let mut parent = Message::create(b"data".to_vec(), "text/plain", "src");
        parent.envelope.retry_count = 2;
        let child = parent.derive("router");
        assert_eq!(child.envelope.retry_count, 0);
    }

    #[test]
    fn test_with_state_is_functional() {
        let msg = Message::create(b"data".to_vec(), "text/plain", "src");
        let queued = msg.with_state(MessageState::Queued);

        assert_eq!(msg.envelope.state, MessageState::Received);
        assert_eq!(queued.envelope.state, MessageState::Queued);
        assert_eq!(queued.envelope.message_id, msg.envelope.message_id);
        assert_eq!(msg.raw(), queued.raw());
    }

    #[test]
    fn test_with_payload_leaves_original_untouched() {
        let msg = Message::create(b"old".to_vec(), "text/plain", "src");
        let replaced = msg.with_payload(b"new".to_vec());

        assert_eq!(msg.raw(), b"old");
        assert_eq!(replaced.raw(), b"new");
    }

    #[test]
    fn test_with_property_enforces_size() {
        let msg = Message::create(b"data".to_vec(), "text/plain", "src");
        let ok = msg.with_property("nhs", PropertyValue::String("123".into()), Some(10));
        assert!(ok.is_ok());

        let err = msg.with_property("nhs", PropertyValue::String("x".repeat(20)), Some(10));
        assert!(matches!(err, Err(EngineError::Validation { .. })));
    }

    #[test]
    fn test_priority_carried_through_derive() {
        let mut parent = Message::create(b"data".to_vec(), "text/plain", "src");
        parent.envelope.priority = MessagePriority::Urgent;
        let child = parent.derive("router");
        assert_eq!(child.envelope.priority, MessagePriority::Urgent);
    }

    #[test]
    fn test_json_roundtrip() {
        let msg = Message::create(b"MSH|^~\\&|".to_vec(), "application/hl7-v2+er7", "src");
        let back = Message::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn test_cbor_roundtrip() {
        let msg = Message::create(b"MSH|^~\\&|".to_vec(), "application/hl7-v2+er7", "src")
            .with_state(MessageState::Queued);
        let back = Message::from_cbor(&msg.to_cbor().unwrap()).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn test_envelope_decode_rejects_garbage() {
        assert!(Message::from_json(b"{not json").is_err());
        assert!(Message::from_cbor(b"\xff\xff").is_err());
    }
}
