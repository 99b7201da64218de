//! Host supervision: the background monitor and its restart policies.

// Layer 1: Standard library imports
use std::str::FromStr;
use std::time::Duration;

// Layer 2: Third-party crate imports
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

// Layer 3: Internal module imports
use crate::error::EngineError;
use crate::host::{Host, HostState};
use crate::metrics::MetricsRegistry;

const DEFAULT_MAX_RESTARTS: u32 = 3;
const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);
const HOST_STOP_BUDGET: Duration = Duration::from_secs(10);

/// Per-host restart policy, read from the `RestartPolicy` host setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Never restart automatically.
    Never,
    /// Restart a host found in `error`, up to `MaxRestarts`.
    OnFailure,
    /// Restart whenever the host is not running, up to `MaxRestarts`.
    Always,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy::OnFailure
    }
}

impl FromStr for RestartPolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "never" => Ok(RestartPolicy::Never),
            "on_failure" => Ok(RestartPolicy::OnFailure),
            "always" => Ok(RestartPolicy::Always),
            other => Err(EngineError::configuration(format!(
                "unknown restart policy: '{other}'"
            ))),
        }
    }
}

impl RestartPolicy {
    /// Should this policy restart a host in the given state?
    pub fn wants_restart(&self, state: HostState) -> bool {
        match self {
            RestartPolicy::Never => false,
            RestartPolicy::OnFailure => state == HostState::Error,
            // Deliberate operator states (paused) and transitions are left
            // alone; only settled non-running states qualify.
            RestartPolicy::Always => matches!(state, HostState::Error | HostState::Stopped),
        }
    }
}

/// Spawn the supervision loop over the given hosts.
///
/// Each tick inspects every host: per its policy the host may be restarted,
/// bounded by `MaxRestarts` with `RestartDelay` between attempts. Running
/// hosts are never touched; a restart attempt that itself fails is logged
/// and the host stays in `error` for a later tick. The loop also refreshes
/// the per-host queue-depth and restart-count gauges.
pub fn spawn_monitor(
    hosts: Vec<Host>,
    interval: Duration,
    metrics: MetricsRegistry,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // skip the immediate tick
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    for host in &hosts {
                        refresh_gauges(host, &metrics);
                        supervise(host).await;
                    }
                }
            }
        }
    })
}

fn refresh_gauges(host: &Host, metrics: &MetricsRegistry) {
    metrics
        .gauge("queue_depth", Some(host.name()))
        .set(host.queue_depth() as i64);
    metrics
        .gauge("restart_count", Some(host.name()))
        .set(i64::from(host.metrics().restart_count()));
}

async fn supervise(host: &Host) {
    let settings = host.host_settings();
    let policy = settings
        .get_str("RestartPolicy")
        .and_then(|s| s.parse::<RestartPolicy>().ok())
        .unwrap_or_default();

    let state = host.state();
    if state.is_running() || !policy.wants_restart(state) {
        return;
    }

    let max_restarts = settings.get_u64("MaxRestarts", DEFAULT_MAX_RESTARTS as u64) as u32;
    let restart_count = host.metrics().restart_count();
    if restart_count >= max_restarts {
        debug!(
            host = host.name(),
            restart_count, max_restarts, "restart limit reached, leaving host down"
        );
        return;
    }

    let restart_delay = settings.get_duration_secs("RestartDelay", DEFAULT_RESTART_DELAY);
    info!(
        host = host.name(),
        state = ?state,
        attempt = restart_count + 1,
        max_restarts,
        "supervisor restarting host"
    );
    tokio::time::sleep(restart_delay).await;

    let attempt = host.metrics().record_restart();
    if let Err(e) = host.stop(HOST_STOP_BUDGET).await {
        error!(host = host.name(), error = %e, "restart: stop failed");
    }
    match host.start().await {
        Ok(()) => {
            info!(host = host.name(), attempt, "host restarted");
        }
        Err(e) => {
            // The host stays in error; a later tick may retry within limits.
            error!(host = host.name(), attempt, error = %e, "restart attempt failed");
        }
    }
}
