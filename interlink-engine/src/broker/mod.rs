//! Inter-host messaging fabric.
//!
//! Hosts talk to each other through the [`ServiceRegistry`]: an in-process
//! address book (host name → queue submitter) plus a pending-response table
//! (correlation id → one-shot channel) for the sync request/reply pattern.
//! Envelopes never bypass the target host's queue, so pause and overflow
//! policy apply uniformly to inter-host and external traffic.

pub mod envelope;
pub mod registry;

pub use envelope::{HostEnvelope, MessagingPattern, WorkItem};
pub use registry::{HostPort, HostResponse, ServiceRegistry};
