//! External persistence interfaces: the message store used for audit and
//! replay, and the optional external queue for cross-process deployments.
//!
//! The core depends only on these traits; implementations are pluggable.
//! Two in-process defaults ship with the engine: an in-memory store for
//! tests and development, and a JSON-lines file store.

pub mod file;
pub mod memory;
pub mod traits;

pub use file::FileMessageStore;
pub use memory::{MemoryExternalQueue, MemoryMessageStore};
pub use traits::{ExternalQueue, MessageFilter, MessageRecord, MessageStore, QueuedMessage};
