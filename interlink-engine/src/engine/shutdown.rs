//! Graceful shutdown coordination.
//!
//! Four phases: pause every host (stop admitting), wait for queues to
//! drain up to `drain_timeout`, stop hosts in reverse registration order
//! within `timeout`, then run custom cleanup handlers. `SIGINT`/`SIGTERM`
//! trigger phase 1.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// Layer 3: Internal module imports
use crate::host::Host;

/// Shutdown timing configuration.
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Overall budget for stopping hosts.
    pub timeout: Duration,
    /// Budget for queue draining.
    pub drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// A custom cleanup handler run in phase 4.
pub type ShutdownHandler = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

const HANDLER_BUDGET: Duration = Duration::from_secs(5);

/// Coordinates graceful shutdown of a production. Cheap to clone.
#[derive(Clone)]
pub struct GracefulShutdown {
    inner: Arc<ShutdownInner>,
}

struct ShutdownInner {
    config: ShutdownConfig,
    hosts: Mutex<Vec<Host>>,
    handlers: Mutex<Vec<ShutdownHandler>>,
    triggered: CancellationToken,
    complete: CancellationToken,
    running: Mutex<bool>,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        Self {
            inner: Arc::new(ShutdownInner {
                config,
                hosts: Mutex::new(Vec::new()),
                handlers: Mutex::new(Vec::new()),
                triggered: CancellationToken::new(),
                complete: CancellationToken::new(),
                running: Mutex::new(false),
            }),
        }
    }

    /// Register a host; stop order is the reverse of registration order.
    pub fn register_host(&self, host: Host) {
        self.inner.hosts.lock().push(host);
    }

    /// Register a cleanup handler for phase 4.
    pub fn register_handler(&self, handler: ShutdownHandler) {
        self.inner.handlers.lock().push(handler);
    }

    /// Returns `true` once shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.is_cancelled()
    }

    /// Install `SIGINT`/`SIGTERM` handlers that trigger shutdown.
    pub fn install_signal_handlers(&self) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let interrupted = tokio::signal::ctrl_c();

            #[cfg(unix)]
            {
                let mut terminate = match tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate(),
                ) {
                    Ok(signal) => signal,
                    Err(e) => {
                        warn!(error = %e, "SIGTERM handler installation failed");
                        let _ = interrupted.await;
                        coordinator.trigger();
                        return;
                    }
                };
                tokio::select! {
                    _ = interrupted => info!("SIGINT received"),
                    _ = terminate.recv() => info!("SIGTERM received"),
                }
            }
            #[cfg(not(unix))]
            {
                let _ = interrupted.await;
                info!("interrupt received");
            }

            coordinator.trigger();
        });
    }

    /// Trigger shutdown programmatically.
    pub fn trigger(&self) {
        if !self.inner.triggered.is_cancelled() {
            self.inner.triggered.cancel();
            let coordinator = self.clone();
            tokio::spawn(async move {
                coordinator.run().await;
            });
        }
    }

    /// Wait until shutdown is requested.
    pub async fn wait(&self) {
        self.inner.triggered.cancelled().await;
    }

    /// Wait until all shutdown phases have completed.
    pub async fn wait_complete(&self) {
        self.inner.complete.cancelled().await;
    }

    /// Run the shutdown phases. Idempotent: only the first call acts.
    pub async fn run(&self) {
        {
            let mut running = self.inner.running.lock();
            if *running {
                return;
            }
            *running = true;
        }
        let hosts: Vec<Host> = self.inner.hosts.lock().clone();
        info!(hosts = hosts.len(), "shutdown started");

        // Phase 1: stop admitting new work.
        for host in &hosts {
            host.pause();
        }

        // Phase 2: wait for queues to drain, bounded.
        let deadline = tokio::time::Instant::now() + self.inner.config.drain_timeout;
        loop {
            let remaining: usize = hosts.iter().map(Host::queue_depth).sum();
            if remaining == 0 {
                debug!("queues drained");
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(remaining, "drain timed out with messages still queued");
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        // Phase 3: stop hosts in reverse registration order.
        let per_host = if hosts.is_empty() {
            self.inner.config.timeout
        } else {
            self.inner.config.timeout / hosts.len() as u32
        };
        for host in hosts.iter().rev() {
            if let Err(e) = host.stop(per_host).await {
                warn!(host = host.name(), error = %e, "host stop failed during shutdown");
            }
        }

        // Phase 4: custom cleanup handlers.
        let handlers: Vec<ShutdownHandler> = self.inner.handlers.lock().clone();
        for handler in handlers {
            if tokio::time::timeout(HANDLER_BUDGET, handler()).await.is_err() {
                warn!("shutdown handler timed out");
            }
        }

        self.inner.complete.cancel();
        info!("shutdown complete");
    }
}
