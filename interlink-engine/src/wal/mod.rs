//! Write-ahead log: durable record of in-flight host work.
//!
//! Hosts append an entry before processing a message and complete it after.
//! On restart the log is scanned and every entry still `pending` or
//! `processing` is re-queued as `pending` without consuming a retry, since
//! a process crash is not a delivery failure.

pub mod log;
pub mod types;

pub use log::Wal;
pub use types::{SyncMode, WalConfig, WalEntry, WalState};
