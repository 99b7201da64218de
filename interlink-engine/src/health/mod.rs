//! Health checks and probe aggregation.
//!
//! A [`HealthRegistry`] holds named checks, each with a criticality flag and
//! a timeout. Three probes are derived from it: liveness (process alive),
//! readiness (critical checks only), and full (all checks).

pub mod checks;

pub use checks::{
    host_health_check, queue_depth_check, wal_pending_check, CheckFn, ComponentHealth,
    HealthRegistry, HealthResult, HealthStatus,
};
