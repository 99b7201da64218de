//! Atomic runtime metrics for managed queues.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU64, Ordering};

// Layer 2: Third-party crate imports
use serde::Serialize;

// Layer 3: Internal module imports
// (none)

/// Lock-free counters updated by queue operations.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    total_put: AtomicU64,
    total_get: AtomicU64,
    total_dropped: AtomicU64,
    overflow_count: AtomicU64,
    peak_size: AtomicU64,
    current_size: AtomicU64,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_put(&self, new_size: usize) {
        self.total_put.fetch_add(1, Ordering::Relaxed);
        self.update_size(new_size);
    }

    pub(crate) fn record_get(&self, new_size: usize) {
        self.total_get.fetch_add(1, Ordering::Relaxed);
        self.current_size.store(new_size as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.total_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overflow(&self) {
        self.overflow_count.fetch_add(1, Ordering::Relaxed);
    }

    fn update_size(&self, size: usize) {
        let size = size as u64;
        self.current_size.store(size, Ordering::Relaxed);
        self.peak_size.fetch_max(size, Ordering::Relaxed);
    }

    pub fn total_put(&self) -> u64 {
        self.total_put.load(Ordering::Relaxed)
    }

    pub fn total_get(&self) -> u64 {
        self.total_get.load(Ordering::Relaxed)
    }

    pub fn total_dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn peak_size(&self) -> u64 {
        self.peak_size.load(Ordering::Relaxed)
    }

    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            total_put: self.total_put(),
            total_get: self.total_get(),
            total_dropped: self.total_dropped(),
            overflow_count: self.overflow_count(),
            peak_size: self.peak_size(),
            current_size: self.current_size(),
        }
    }
}

/// Point-in-time view of queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueMetricsSnapshot {
    pub total_put: u64,
    pub total_get: u64,
    pub total_dropped: u64,
    pub overflow_count: u64,
    pub peak_size: u64,
    pub current_size: u64,
}
