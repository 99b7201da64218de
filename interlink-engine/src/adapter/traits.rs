//! Shared adapter contract: lifecycle, metrics, and the ingress callback.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU64, Ordering};

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

// Layer 3: Internal module imports
use crate::config::Settings;
use crate::error::EngineError;

/// Adapter lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

/// Runtime metrics for an adapter.
#[derive(Debug, Default)]
pub struct AdapterMetrics {
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    connections_total: AtomicU64,
    connections_active: AtomicU64,
    errors_total: AtomicU64,
    last_activity_at: Mutex<Option<DateTime<Utc>>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl AdapterMetrics {
    pub fn record_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        *self.last_activity_at.lock() = Some(Utc::now());
    }

    pub fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        *self.last_activity_at.lock() = Some(Utc::now());
    }

    pub fn record_connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        // Saturating: a refused connection never went active.
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_started(&self) {
        *self.started_at.lock() = Some(Utc::now());
    }

    pub fn snapshot(&self) -> AdapterMetricsSnapshot {
        AdapterMetricsSnapshot {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            last_activity_at: *self.last_activity_at.lock(),
            started_at: *self.started_at.lock(),
        }
    }
}

/// Point-in-time view of adapter metrics.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterMetricsSnapshot {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub connections_total: u64,
    pub connections_active: u64,
    pub errors_total: u64,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
}

/// State shared by every adapter implementation: settings with
/// case-insensitive lookup, lifecycle state, and metrics.
pub struct AdapterCore {
    kind: &'static str,
    host_name: String,
    settings: Settings,
    state: RwLock<AdapterState>,
    metrics: std::sync::Arc<AdapterMetrics>,
}

impl AdapterCore {
    pub fn new(kind: &'static str, host_name: impl Into<String>, settings: Settings) -> Self {
        Self {
            kind,
            host_name: host_name.into(),
            settings,
            state: RwLock::new(AdapterState::Created),
            metrics: std::sync::Arc::new(AdapterMetrics::default()),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> AdapterState {
        *self.state.read()
    }

    pub fn set_state(&self, state: AdapterState) {
        *self.state.write() = state;
    }

    pub fn metrics(&self) -> &AdapterMetrics {
        &self.metrics
    }

    /// Shared handle for spawned tasks that record traffic.
    pub fn metrics_handle(&self) -> std::sync::Arc<AdapterMetrics> {
        std::sync::Arc::clone(&self.metrics)
    }

    /// Guard a start attempt: only `Created` and `Stopped` may start.
    pub fn begin_start(&self) -> Result<(), EngineError> {
        let mut state = self.state.write();
        match *state {
            AdapterState::Created | AdapterState::Stopped => {
                *state = AdapterState::Starting;
                Ok(())
            }
            other => Err(EngineError::configuration(format!(
                "cannot start {} adapter in state {other:?}",
                self.kind
            ))),
        }
    }

    /// Mark a successful start.
    pub fn mark_running(&self) {
        self.set_state(AdapterState::Running);
        self.metrics.mark_started();
    }
}

/// Callback surface a host gives its inbound adapter.
///
/// The host wraps the raw bytes into a message, submits it to its queue,
/// and returns the reply bytes (if any) the adapter should write back.
#[async_trait]
pub trait IngressHandler: Send + Sync {
    async fn on_message_received(&self, raw: Vec<u8>) -> Result<Option<Vec<u8>>, EngineError>;
}

/// Common adapter lifecycle.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Short adapter kind, e.g. `mllp-inbound`.
    fn kind(&self) -> &'static str;

    fn state(&self) -> AdapterState;

    fn metrics(&self) -> AdapterMetricsSnapshot;

    /// Concrete-type access, e.g. to read a bound ephemeral port.
    fn as_any(&self) -> &dyn std::any::Any;

    async fn start(&self) -> Result<(), EngineError>;

    async fn stop(&self) -> Result<(), EngineError>;
}

/// Outbound delivery surface.
#[async_trait]
pub trait OutboundAdapter: Adapter {
    /// Deliver `payload`, returning the peer's reply bytes (ACK, HTTP body,
    /// or empty for fire-and-forget transports like files).
    ///
    /// `message_type` feeds filename templating on the file transport and is
    /// ignored elsewhere.
    async fn send(
        &self,
        payload: &[u8],
        message_type: Option<&str>,
    ) -> Result<Vec<u8>, EngineError>;
}
