//! Health registry, aggregation, and built-in check factories.

// Layer 1: Standard library imports
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::timeout;

// Layer 3: Internal module imports
use crate::wal::Wal;

/// Health check status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// Health of a single component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    pub details: BTreeMap<String, String>,
    pub checked_at: DateTime<Utc>,
    pub response_time_ms: f64,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            details: BTreeMap::new(),
            checked_at: Utc::now(),
            response_time_ms: 0.0,
        }
    }

    /// Builder method: attach a detail field.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }
}

/// Aggregated result of a probe.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResult {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub checked_at: DateTime<Utc>,
}

impl HealthResult {
    /// Overall healthy?
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Ready to accept traffic? Degraded still counts as ready.
    pub fn is_ready(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// An async check function returning a [`ComponentHealth`].
pub type CheckFn = Arc<dyn Fn() -> BoxFuture<'static, ComponentHealth> + Send + Sync>;

struct HealthCheck {
    name: String,
    check: CheckFn,
    critical: bool,
    timeout: Duration,
}

impl HealthCheck {
    async fn run(&self) -> ComponentHealth {
        let started = std::time::Instant::now();
        let mut result = match timeout(self.timeout, (self.check)()).await {
            Ok(health) => health,
            Err(_) => ComponentHealth::new(
                self.name.clone(),
                HealthStatus::Unhealthy,
                format!("health check timed out after {:?}", self.timeout),
            ),
        };
        result.response_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        result
    }
}

/// Registry of named health checks.
///
/// Registration uses a short-lived lock; checks run concurrently.
#[derive(Default)]
pub struct HealthRegistry {
    checks: RwLock<Vec<HealthCheck>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a named check.
    pub fn add_check(
        &self,
        name: impl Into<String>,
        check: CheckFn,
        critical: bool,
        check_timeout: Duration,
    ) {
        let name = name.into();
        let mut checks = self.checks.write();
        checks.retain(|c| c.name != name);
        checks.push(HealthCheck {
            name,
            check,
            critical,
            timeout: check_timeout,
        });
    }

    /// Remove a named check.
    pub fn remove_check(&self, name: &str) {
        self.checks.write().retain(|c| c.name != name);
    }

    /// Number of registered checks.
    pub fn len(&self) -> usize {
        self.checks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.read().is_empty()
    }

    /// Liveness probe: always healthy while the process runs.
    pub async fn check_liveness(&self) -> HealthResult {
        HealthResult {
            status: HealthStatus::Healthy,
            components: vec![ComponentHealth::new(
                "process",
                HealthStatus::Healthy,
                "process is alive",
            )],
            checked_at: Utc::now(),
        }
    }

    /// Readiness probe: runs only critical checks.
    pub async fn check_readiness(&self) -> HealthResult {
        self.run_checks(true).await
    }

    /// Full probe: runs every check.
    pub async fn check_all(&self) -> HealthResult {
        self.run_checks(false).await
    }

    async fn run_checks(&self, critical_only: bool) -> HealthResult {
        // Snapshot under the lock, run outside it.
        let selected: Vec<(String, CheckFn, bool, Duration)> = {
            let checks = self.checks.read();
            checks
                .iter()
                .filter(|c| !critical_only || c.critical)
                .map(|c| (c.name.clone(), Arc::clone(&c.check), c.critical, c.timeout))
                .collect()
        };

        let futures = selected.iter().map(|(name, check, _, check_timeout)| {
            let check = HealthCheck {
                name: name.clone(),
                check: Arc::clone(check),
                critical: false,
                timeout: *check_timeout,
            };
            async move { check.run().await }
        });
        let components = join_all(futures).await;

        let criticality: Vec<bool> = selected.iter().map(|(_, _, c, _)| *c).collect();
        let status = aggregate(&components, &criticality);

        HealthResult {
            status,
            components,
            checked_at: Utc::now(),
        }
    }
}

/// Aggregation rule: critical unhealthy → unhealthy; any unhealthy →
/// degraded; any degraded or unknown → degraded; else healthy.
fn aggregate(components: &[ComponentHealth], criticality: &[bool]) -> HealthStatus {
    if components.is_empty() {
        return HealthStatus::Healthy;
    }

    let critical_unhealthy = components
        .iter()
        .zip(criticality)
        .any(|(c, critical)| *critical && c.status == HealthStatus::Unhealthy);
    if critical_unhealthy {
        return HealthStatus::Unhealthy;
    }

    if components.iter().any(|c| c.status == HealthStatus::Unhealthy) {
        return HealthStatus::Degraded;
    }
    if components
        .iter()
        .any(|c| matches!(c.status, HealthStatus::Degraded | HealthStatus::Unknown))
    {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

// Built-in check factories

/// Check for a host: running → healthy, paused → degraded, else unhealthy.
pub fn host_health_check(host: crate::host::Host) -> CheckFn {
    Arc::new(move || {
        let host = host.clone();
        Box::pin(async move {
            use crate::host::HostState;
            let name = format!("host:{}", host.name());
            let state = host.state();
            let metrics = host.metrics_snapshot();
            match state {
                HostState::Running => {
                    ComponentHealth::new(name, HealthStatus::Healthy, "host is running")
                        .with_detail("state", format!("{state:?}"))
                        .with_detail("messages_received", metrics.messages_received)
                        .with_detail("messages_failed", metrics.messages_failed)
                }
                HostState::Paused => {
                    ComponentHealth::new(name, HealthStatus::Degraded, "host is paused")
                        .with_detail("state", format!("{state:?}"))
                }
                other => ComponentHealth::new(
                    name,
                    HealthStatus::Unhealthy,
                    format!("host is in state {other:?}"),
                )
                .with_detail("state", format!("{other:?}")),
            }
        })
    })
}

/// Check comparing a queue depth against a threshold.
pub fn queue_depth_check(
    queue_name: &str,
    max_depth: usize,
    depth: impl Fn() -> usize + Send + Sync + 'static,
) -> CheckFn {
    let name = format!("queue:{queue_name}");
    let depth = Arc::new(depth);
    Arc::new(move || {
        let name = name.clone();
        let depth = Arc::clone(&depth);
        Box::pin(async move {
            let current = depth();
            if current > max_depth {
                ComponentHealth::new(
                    name,
                    HealthStatus::Degraded,
                    format!("queue depth {current} exceeds threshold {max_depth}"),
                )
                .with_detail("depth", current)
                .with_detail("threshold", max_depth)
            } else {
                ComponentHealth::new(name, HealthStatus::Healthy, "queue depth within threshold")
                    .with_detail("depth", current)
            }
        })
    })
}

/// Check comparing WAL pending entries against a threshold.
pub fn wal_pending_check(wal: Wal, max_pending: usize) -> CheckFn {
    Arc::new(move || {
        let wal = wal.clone();
        Box::pin(async move {
            let pending = wal.pending_count().await;
            let processing = wal.processing_count().await;
            if pending > max_pending {
                ComponentHealth::new(
                    "wal",
                    HealthStatus::Degraded,
                    format!("wal pending {pending} exceeds threshold {max_pending}"),
                )
                .with_detail("pending", pending)
                .with_detail("processing", processing)
            } else {
                ComponentHealth::new("wal", HealthStatus::Healthy, "wal is healthy")
                    .with_detail("pending", pending)
                    .with_detail("processing", processing)
            }
        })
    })
}
