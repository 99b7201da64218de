//! # interlink-engine - Healthcare Integration Engine Runtime
//!
//! The runtime core of a healthcare integration engine: a long-running
//! process that receives, transforms, routes, and dispatches structured
//! clinical messages (primarily HL7 v2.x over MLLP/TCP, plus HTTP and file
//! transports) between heterogeneous clinical systems.
//!
//! A running instance is a **production**: a composition of items
//! (inbound services, transforming processes, outbound operations)
//! connected by routes and governed by content-based routing rules.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use interlink_engine::engine::{EngineConfig, ProductionEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), interlink_engine::error::EngineError> {
//!     let engine = ProductionEngine::new(EngineConfig::default());
//!     engine.load("production.json")?;
//!     engine.start().await?;
//!     engine.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! ## Messages and Content
//! - [`message`] - Immutable message values with correlation/causation
//! - [`hl7`] - Field paths, the lazy parsed view, ACKs, MLLP framing
//!
//! ## Runtime
//! - [`host`] - Supervised worker pools (service/process/operation)
//! - [`queue`] - Bounded queues with discipline and overflow policy
//! - [`broker`] - Inter-host messaging fabric and the service registry
//! - [`routing`] - Content-based routing rules and condition language
//! - [`adapter`] - MLLP/HTTP/File protocol endpoints
//!
//! ## Durability and Operations
//! - [`wal`] - Write-ahead log and at-least-once delivery
//! - [`store`] - Pluggable message store and external queue contracts
//! - [`engine`] - Production orchestration, supervision, shutdown
//! - [`health`] - Probes and aggregated health checks
//! - [`metrics`] - Counter/gauge/histogram registry
//!
//! ## Configuration
//! - [`config`] - Item/production records and the JSON loader
//! - [`registry`] - Name → constructor registry with namespace guards

pub mod adapter;
pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod hl7;
pub mod host;
pub mod message;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod routing;
pub mod store;
pub mod wal;

// Re-export commonly used types
pub use broker::{HostEnvelope, MessagingPattern, ServiceRegistry, WorkItem};
pub use config::{ItemConfig, ProductionConfig, Settings};
pub use engine::{EngineConfig, ProductionEngine, ProductionState};
pub use error::EngineError;
pub use health::{HealthRegistry, HealthStatus};
pub use hl7::{ParsedView, FieldPath};
pub use host::{Host, HostKind, HostState};
pub use message::{Envelope, Message, MessagePriority, MessageState, Payload};
pub use metrics::MetricsRegistry;
pub use queue::{ManagedQueue, OverflowPolicy, QueueKind};
pub use routing::{RoutingRule, RuleAction, RuleSet};
pub use wal::{Wal, WalConfig, WalState};
