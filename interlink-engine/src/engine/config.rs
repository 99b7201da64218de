//! Engine-level configuration with sensible defaults.

// Layer 1: Standard library imports
use std::path::PathBuf;
use std::time::Duration;

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
// (none)

/// Environment variable overriding the shutdown timeout (seconds).
pub const SHUTDOWN_TIMEOUT_ENV: &str = "INTERLINK_SHUTDOWN_TIMEOUT";

/// Default delay between item starts, mitigating port-bind races.
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_millis(500);

/// Default interval for the supervision loop.
pub const DEFAULT_MONITORING_INTERVAL: Duration = Duration::from_secs(5);

/// Production engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Enable the write-ahead log.
    pub wal_enabled: bool,
    /// WAL directory.
    pub wal_directory: PathBuf,
    /// Enable the message store.
    pub store_enabled: bool,
    /// Message store directory.
    pub store_directory: PathBuf,
    /// Overall budget for stopping hosts at shutdown.
    pub shutdown_timeout: Duration,
    /// Budget for queue draining at shutdown.
    pub drain_timeout: Duration,
    /// Start items even when their config disables them.
    pub start_disabled_items: bool,
    /// Delay between item starts.
    pub startup_delay: Duration,
    /// Supervision loop interval.
    pub monitoring_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let shutdown_timeout = std::env::var(SHUTDOWN_TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::from_secs(30));

        Self {
            wal_enabled: true,
            wal_directory: PathBuf::from("./wal"),
            store_enabled: true,
            store_directory: PathBuf::from("./message_store"),
            shutdown_timeout,
            drain_timeout: Duration::from_secs(10),
            start_disabled_items: false,
            startup_delay: DEFAULT_STARTUP_DELAY,
            monitoring_interval: DEFAULT_MONITORING_INTERVAL,
        }
    }
}

impl EngineConfig {
    /// A configuration suited to tests: no persistence, no start delays,
    /// and a fast supervision loop.
    pub fn ephemeral() -> Self {
        Self {
            wal_enabled: false,
            store_enabled: false,
            startup_delay: Duration::ZERO,
            monitoring_interval: Duration::from_millis(50),
            drain_timeout: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }
}
