//! Host lifecycle states, kinds, and metrics.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

// Layer 3: Internal module imports
// (none)

/// Host lifecycle state.
///
/// # State Transitions
///
/// ```text
/// Created -> Starting -> Running <-> Paused
///                           |
///                           v
///                       Stopping -> Stopped
///
/// any state -> Error (on failure)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    Created,
    Starting,
    Running,
    Paused,
    Stopping,
    Stopped,
    Error,
}

impl HostState {
    /// Returns `true` while the host admits new work.
    pub fn is_running(&self) -> bool {
        matches!(self, HostState::Running)
    }

    /// Returns `true` for states a stopped-or-never-started host can start from.
    pub fn can_start(&self) -> bool {
        matches!(self, HostState::Created | HostState::Stopped)
    }
}

/// The three host specialisations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostKind {
    /// Inbound: receives messages from external systems.
    Service,
    /// Transforming/routing: sits between services and operations.
    Process,
    /// Outbound: delivers messages to external systems.
    Operation,
}

/// Runtime metrics for a host, updated lock-free from the worker pool.
#[derive(Debug, Default)]
pub struct HostMetrics {
    messages_received: AtomicU64,
    messages_processed: AtomicU64,
    messages_sent: AtomicU64,
    messages_failed: AtomicU64,
    total_processing_us: AtomicU64,
    restart_count: AtomicU32,
    last_message_at: Mutex<Option<DateTime<Utc>>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    stopped_at: Mutex<Option<DateTime<Utc>>>,
}

impl HostMetrics {
    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self, elapsed_us: u64) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        self.total_processing_us.fetch_add(elapsed_us, Ordering::Relaxed);
        *self.last_message_at.lock() = Some(Utc::now());
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) -> u32 {
        self.restart_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn mark_started(&self) {
        *self.started_at.lock() = Some(Utc::now());
    }

    pub fn mark_stopped(&self) {
        *self.stopped_at.lock() = Some(Utc::now());
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_failed(&self) -> u64 {
        self.messages_failed.load(Ordering::Relaxed)
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HostMetricsSnapshot {
        let processed = self.messages_processed();
        let total_us = self.total_processing_us.load(Ordering::Relaxed);
        HostMetricsSnapshot {
            messages_received: self.messages_received(),
            messages_processed: processed,
            messages_sent: self.messages_sent(),
            messages_failed: self.messages_failed(),
            restart_count: self.restart_count(),
            avg_processing_ms: if processed == 0 {
                0.0
            } else {
                total_us as f64 / processed as f64 / 1000.0
            },
            last_message_at: *self.last_message_at.lock(),
            started_at: *self.started_at.lock(),
            stopped_at: *self.stopped_at.lock(),
        }
    }
}

/// Point-in-time view of host metrics.
#[derive(Debug, Clone, Serialize)]
pub struct HostMetricsSnapshot {
    pub messages_received: u64,
    pub messages_processed: u64,
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub restart_count: u32,
    pub avg_processing_ms: f64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(HostState::Running.is_running());
        assert!(!HostState::Paused.is_running());
        assert!(HostState::Created.can_start());
        assert!(HostState::Stopped.can_start());
        assert!(!HostState::Running.can_start());
        assert!(!HostState::Error.can_start());
    }

    #[test]
    fn test_metrics_accumulation() {
        let metrics = HostMetrics::default();
        metrics.record_received();
        metrics.record_processed(2_000);
        metrics.record_processed(4_000);
        metrics.record_sent();
        metrics.record_failed();

        let snap = metrics.snapshot();
        assert_eq!(snap.messages_received, 1);
        assert_eq!(snap.messages_processed, 2);
        assert_eq!(snap.messages_sent, 1);
        assert_eq!(snap.messages_failed, 1);
        assert!((snap.avg_processing_ms - 3.0).abs() < 0.001);
        assert!(snap.last_message_at.is_some());
    }

    #[test]
    fn test_restart_counter() {
        let metrics = HostMetrics::default();
        assert_eq!(metrics.record_restart(), 1);
        assert_eq!(metrics.record_restart(), 2);
        assert_eq!(metrics.restart_count(), 2);
    }

    #[test]
    fn test_avg_with_no_messages() {
        let metrics = HostMetrics::default();
        assert_eq!(metrics.snapshot().avg_processing_ms, 0.0);
    }
}
