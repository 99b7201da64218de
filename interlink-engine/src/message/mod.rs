//! Immutable clinical message values.
//!
//! A [`Message`] is a pair of [`Envelope`] (routing and audit metadata) and
//! [`Payload`] (authoritative raw bytes plus typed properties). Messages are
//! value types: every "modification" produces a new value via the `with_*`
//! builders, and [`Message::derive`] preserves the correlation/causation
//! chain across hosts.

pub mod envelope;
pub mod message;
pub mod payload;

pub use envelope::{
    DeliveryMode, Envelope, Governance, MessagePriority, MessageState, Routing, Sensitivity,
};
pub use message::Message;
pub use payload::{Payload, PropertyValue, TypedProperty};
