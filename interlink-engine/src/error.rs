//! Error types for the engine runtime.
//!
//! All engine subsystems report failures through [`EngineError`]. Each variant
//! carries enough context for structured logging, and [`EngineError::kind`]
//! yields the short machine-readable kind that log consumers key on.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
// (none)

/// Errors that can occur inside the engine runtime.
///
/// # Examples
///
/// ```rust
/// use interlink_engine::error::EngineError;
///
/// let err = EngineError::Configuration {
///     reason: "unknown class 'li.hosts.Bogus'".into(),
/// };
/// assert!(err.is_fatal());
/// assert_eq!(err.kind(), "configuration_error");
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unknown class, malformed rule, or missing required setting.
    ///
    /// Fatal at startup; prevents the Production from reaching `running`.
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// Property size violation, HL7 structural error, or schema mismatch.
    #[error("Validation failed: {reason}")]
    Validation { reason: String },

    /// Malformed or truncated frame on a stream transport.
    #[error("Frame error: {reason}")]
    Frame { reason: String },

    /// Transport-level fault (connect refused, reset, unexpected close).
    #[error("Connection error: {reason}")]
    Connection { reason: String },

    /// A deadline elapsed before the operation finished.
    #[error("Timeout after {timeout:?} during {operation}")]
    Timeout { operation: String, timeout: Duration },

    /// Outbound delivery failed after all retries were exhausted.
    #[error("Send failed: {reason}")]
    Send { reason: String },

    /// The remote peer asked for a retry (or the transport suggests one).
    ///
    /// Raised by the reply-code evaluator for `R` actions and by adapters on
    /// transient faults; the owning host re-queues subject to `MaxRetries`.
    #[error("Retry requested: {reason}")]
    RetrySignal { reason: String },

    /// Registration attempted into a protected or blocked namespace.
    #[error("Namespace violation: {name}")]
    NamespaceViolation { name: String },

    /// A registered implementation does not satisfy the required contract.
    #[error("Type mismatch for '{name}': expected {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    /// No routing rule matched and no default target exists.
    #[error("No routing rule matched for host '{host}'")]
    NoMatch { host: String },

    /// The named host is not registered with the production.
    #[error("Host not found: {name}")]
    HostNotFound { name: String },

    /// A submit was rejected because the target queue is full.
    #[error("Queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Write-ahead log failure (I/O, corrupt entry, unknown entry id).
    #[error("WAL error: {reason}")]
    Wal { reason: String },

    /// Message store failure.
    #[error("Store error: {reason}")]
    Store { reason: String },

    /// Underlying I/O failure not otherwise classified.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl EngineError {
    /// Short machine-readable error kind for structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Configuration { .. } => "configuration_error",
            EngineError::Validation { .. } => "validation_failed",
            EngineError::Frame { .. } => "frame_error",
            EngineError::Connection { .. } => "connection_error",
            EngineError::Timeout { .. } => "timeout_error",
            EngineError::Send { .. } => "send_error",
            EngineError::RetrySignal { .. } => "retry_signal",
            EngineError::NamespaceViolation { .. } => "namespace_violation",
            EngineError::TypeMismatch { .. } => "type_mismatch",
            EngineError::NoMatch { .. } => "no_match",
            EngineError::HostNotFound { .. } => "host_not_found",
            EngineError::QueueFull { .. } => "queue_full",
            EngineError::Wal { .. } => "wal_error",
            EngineError::Store { .. } => "store_error",
            EngineError::Io { .. } => "io_error",
        }
    }

    /// Returns `true` for errors that must abort Production startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Configuration { .. }
                | EngineError::NamespaceViolation { .. }
                | EngineError::TypeMismatch { .. }
        )
    }

    /// Returns `true` for errors that adapter retry policies may retry in-band.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Connection { .. }
                | EngineError::Timeout { .. }
                | EngineError::RetrySignal { .. }
                | EngineError::Io { .. }
        )
    }

    /// Convenience constructor for configuration errors.
    pub fn configuration(reason: impl Into<String>) -> Self {
        EngineError::Configuration {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for validation errors.
    pub fn validation(reason: impl Into<String>) -> Self {
        EngineError::Validation {
            reason: reason.into(),
        }
    }
}
