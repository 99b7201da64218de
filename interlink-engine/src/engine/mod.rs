//! The production engine: build, start/stop ordering, supervision, and
//! graceful shutdown.

pub mod config;
pub mod production;
pub mod shutdown;
pub mod supervisor;

pub use config::EngineConfig;
pub use production::{ProductionEngine, ProductionState};
pub use shutdown::{GracefulShutdown, ShutdownConfig};
pub use supervisor::RestartPolicy;
