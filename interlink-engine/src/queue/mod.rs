//! Bounded in-process queues with selectable discipline and overflow policy.
//!
//! Every host owns one [`ManagedQueue`]. The discipline decides which item a
//! worker picks up next (FIFO, LIFO, priority, unordered) and the overflow
//! policy decides what happens to producers when the queue is full (block,
//! drop-oldest, drop-newest, redirect).

pub mod managed;
pub mod metrics;

pub use managed::{ManagedQueue, QueueItem};
pub use metrics::{QueueMetrics, QueueMetricsSnapshot};

// Layer 1: Standard library imports
use std::str::FromStr;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::error::EngineError;

/// Queue ordering strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    /// First-in-first-out (default).
    Fifo,
    /// Last-in-first-out (stack).
    Lifo,
    /// Priority ordering; lower ordinal dequeues first, ties FIFO.
    Priority,
    /// No ordering guarantees; maximum throughput.
    Unordered,
}

impl Default for QueueKind {
    fn default() -> Self {
        QueueKind::Fifo
    }
}

impl FromStr for QueueKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(QueueKind::Fifo),
            "lifo" => Ok(QueueKind::Lifo),
            "priority" => Ok(QueueKind::Priority),
            "unordered" => Ok(QueueKind::Unordered),
            other => Err(EngineError::configuration(format!(
                "unknown queue type: '{other}'"
            ))),
        }
    }
}

/// Queue overflow handling strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Producer awaits space.
    Block,
    /// Evict the head of the queue's order and accept the new item.
    DropOldest,
    /// Reject the incoming item.
    DropNewest,
    /// Push to the configured overflow queue; fail when none is configured.
    Redirect,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::Block
    }
}

impl FromStr for OverflowPolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(OverflowPolicy::Block),
            "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            "drop_newest" => Ok(OverflowPolicy::DropNewest),
            "redirect" => Ok(OverflowPolicy::Redirect),
            other => Err(EngineError::configuration(format!(
                "unknown overflow strategy: '{other}'"
            ))),
        }
    }
}
