//! The production engine: builds hosts from configuration, orders their
//! start/stop, monitors them, and coordinates shutdown.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

// Layer 3: Internal module imports
use super::config::EngineConfig;
use super::shutdown::{GracefulShutdown, ShutdownConfig};
use super::supervisor::spawn_monitor;
use crate::broker::{HostPort, ServiceRegistry};
use crate::config::{load_path, ProductionConfig};
use crate::error::EngineError;
use crate::health::{host_health_check, queue_depth_check, wal_pending_check, HealthRegistry};
use crate::host::{Host, HostKind};
use crate::metrics::MetricsRegistry;
use crate::registry::{BuildContext, ClassRegistry};
use crate::store::{FileMessageStore, MessageStore};
use crate::wal::{Wal, WalConfig};

/// Production lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductionState {
    Created,
    Loading,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

/// One production per process: a composition of supervised hosts.
///
/// # Examples
///
/// ```rust,no_run
/// use interlink_engine::engine::{EngineConfig, ProductionEngine};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), interlink_engine::error::EngineError> {
/// let engine = ProductionEngine::new(EngineConfig::default());
/// engine.load("production.json")?;
/// engine.start().await?;
/// engine.wait_for_shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct ProductionEngine {
    config: EngineConfig,
    state: RwLock<ProductionState>,
    production: RwLock<Option<ProductionConfig>>,
    services: RwLock<Vec<Host>>,
    processes: RwLock<Vec<Host>>,
    operations: RwLock<Vec<Host>>,
    all_hosts: RwLock<Vec<Host>>,
    registry: ServiceRegistry,
    class_registry: Arc<ClassRegistry>,
    wal: RwLock<Option<Wal>>,
    store: RwLock<Option<Arc<dyn MessageStore>>>,
    health: Arc<HealthRegistry>,
    metrics: MetricsRegistry,
    shutdown: RwLock<Option<GracefulShutdown>>,
    monitor: Mutex<Option<(tokio::task::JoinHandle<()>, CancellationToken)>>,
    items_started: AtomicU32,
    items_failed: AtomicU32,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl ProductionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: RwLock::new(ProductionState::Created),
            production: RwLock::new(None),
            services: RwLock::new(Vec::new()),
            processes: RwLock::new(Vec::new()),
            operations: RwLock::new(Vec::new()),
            all_hosts: RwLock::new(Vec::new()),
            registry: ServiceRegistry::new(),
            class_registry: Arc::new(ClassRegistry::with_builtins()),
            wal: RwLock::new(None),
            store: RwLock::new(None),
            health: Arc::new(HealthRegistry::new()),
            metrics: MetricsRegistry::new(),
            shutdown: RwLock::new(None),
            monitor: Mutex::new(None),
            items_started: AtomicU32::new(0),
            items_failed: AtomicU32::new(0),
            started_at: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ProductionState {
        *self.state.read()
    }

    pub fn production_name(&self) -> Option<String> {
        self.production.read().as_ref().map(|p| p.name.clone())
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn class_registry(&self) -> &Arc<ClassRegistry> {
        &self.class_registry
    }

    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn wal(&self) -> Option<Wal> {
        self.wal.read().clone()
    }

    /// Look up a host by name.
    pub fn get_host(&self, name: &str) -> Option<Host> {
        self.all_hosts
            .read()
            .iter()
            .find(|h| h.name() == name)
            .cloned()
    }

    /// All hosts, in build order.
    pub fn hosts(&self) -> Vec<Host> {
        self.all_hosts.read().clone()
    }

    // Build

    /// Load a production configuration from a JSON file.
    pub fn load(&self, path: impl AsRef<std::path::Path>) -> Result<(), EngineError> {
        let config = load_path(path)?;
        self.load_config(config)
    }

    /// Load a production from an in-memory configuration.
    pub fn load_config(&self, config: ProductionConfig) -> Result<(), EngineError> {
        {
            let mut state = self.state.write();
            if *state != ProductionState::Created {
                return Err(EngineError::configuration(format!(
                    "cannot load production in state {:?}",
                    *state
                )));
            }
            *state = ProductionState::Loading;
        }

        config.validate()?;
        match self.build_hosts(&config) {
            Ok(()) => {
                info!(
                    production = %config.name,
                    services = self.services.read().len(),
                    processes = self.processes.read().len(),
                    operations = self.operations.read().len(),
                    "production loaded"
                );
                *self.production.write() = Some(config);
                *self.state.write() = ProductionState::Created;
                Ok(())
            }
            Err(e) => {
                *self.state.write() = ProductionState::Error;
                error!(error = %e, kind = e.kind(), "production load failed");
                Err(e)
            }
        }
    }

    fn build_hosts(&self, config: &ProductionConfig) -> Result<(), EngineError> {
        for item in &config.items {
            let constructor = self.class_registry.resolve_host(&item.class_name)?;
            let build = BuildContext::new(item.clone()).with_rules(config.rules.clone());
            let behavior = constructor(&build)?;

            let host = Host::from_config(item, behavior);
            host.attach_registry(self.registry.clone());
            host.attach_class_registry(Arc::clone(&self.class_registry));
            host.attach_metrics(self.metrics.clone());
            self.registry
                .register(&item.name, Arc::new(host.clone()) as Arc<dyn HostPort>)?;

            match host.kind() {
                HostKind::Service => self.services.write().push(host.clone()),
                HostKind::Process => self.processes.write().push(host.clone()),
                HostKind::Operation => self.operations.write().push(host.clone()),
            }
            self.all_hosts.write().push(host);
        }
        Ok(())
    }

    // Lifecycle

    /// Start the production: infrastructure first, then operations,
    /// processes, and services, in that order.
    pub async fn start(&self) -> Result<(), EngineError> {
        {
            let mut state = self.state.write();
            if !matches!(*state, ProductionState::Created | ProductionState::Stopped) {
                return Err(EngineError::configuration(format!(
                    "cannot start production in state {:?}",
                    *state
                )));
            }
            *state = ProductionState::Starting;
        }

        match self.start_inner().await {
            Ok(()) => {
                *self.state.write() = ProductionState::Running;
                *self.started_at.lock() = Some(Utc::now());
                info!(
                    production = %self.production_name().unwrap_or_default(),
                    items_started = self.items_started.load(Ordering::Relaxed),
                    "production started"
                );
                Ok(())
            }
            Err(e) => {
                *self.state.write() = ProductionState::Error;
                error!(error = %e, kind = e.kind(), "production start failed");
                Err(e)
            }
        }
    }

    async fn start_inner(&self) -> Result<(), EngineError> {
        // Infrastructure.
        if self.config.wal_enabled && self.wal.read().is_none() {
            let wal = Wal::new(WalConfig {
                directory: self.config.wal_directory.clone(),
                ..WalConfig::default()
            });
            wal.start().await?;
            for host in self.hosts() {
                host.attach_wal(wal.clone());
            }
            self.health.add_check(
                "wal",
                wal_pending_check(wal.clone(), 1000),
                false,
                Duration::from_secs(5),
            );
            *self.wal.write() = Some(wal);
        }

        if self.config.store_enabled && self.store.read().is_none() {
            let store: Arc<dyn MessageStore> =
                Arc::new(FileMessageStore::open(&self.config.store_directory)?);
            for host in self.hosts() {
                host.attach_store(Arc::clone(&store));
            }
            *self.store.write() = Some(store);
        }

        // Start order: operations, processes, services; downstream first.
        let operations = self.operations.read().clone();
        let processes = self.processes.read().clone();
        let services = self.services.read().clone();
        let mut started = Vec::new();
        for host in operations.iter().chain(&processes).chain(&services) {
            if self.start_host(host).await {
                started.push(host.clone());
            }
        }

        // Re-deliver WAL entries recovered from a previous run.
        let wal = self.wal.read().clone();
        if let Some(wal) = wal {
            let pending = wal.pending().await;
            for entry in pending {
                match self.get_host(&entry.host_name) {
                    Some(host) => {
                        if host.resubmit_recovered(&entry).await {
                            info!(
                                host = %entry.host_name,
                                entry_id = %entry.id,
                                "recovered entry re-queued"
                            );
                        }
                    }
                    None => {
                        warn!(
                            host = %entry.host_name,
                            entry_id = %entry.id,
                            "recovered entry names an unknown host"
                        );
                    }
                }
            }
        }

        // Shutdown coordination: registration in start order means the
        // reverse-order stop takes services down first.
        let coordinator = GracefulShutdown::new(ShutdownConfig {
            timeout: self.config.shutdown_timeout,
            drain_timeout: self.config.drain_timeout,
        });
        for host in &started {
            coordinator.register_host(host.clone());
        }
        let wal_for_cleanup = self.wal.read().clone();
        coordinator.register_handler(Arc::new(move || {
            let wal = wal_for_cleanup.clone();
            Box::pin(async move {
                if let Some(wal) = wal {
                    wal.stop().await;
                }
            })
        }));
        coordinator.install_signal_handlers();
        *self.shutdown.write() = Some(coordinator);

        // Supervision loop.
        let token = CancellationToken::new();
        let handle = spawn_monitor(
            self.hosts(),
            self.config.monitoring_interval,
            self.metrics.clone(),
            token.clone(),
        );
        *self.monitor.lock() = Some((handle, token));

        Ok(())
    }

    /// Start one host, honouring `enabled`. Returns `true` on success.
    async fn start_host(&self, host: &Host) -> bool {
        if !host.enabled() && !self.config.start_disabled_items {
            info!(host = host.name(), "skipping disabled host");
            return false;
        }
        match host.start().await {
            Ok(()) => {
                self.items_started.fetch_add(1, Ordering::Relaxed);
                self.health.add_check(
                    format!("host:{}", host.name()),
                    host_health_check(host.clone()),
                    true,
                    Duration::from_secs(5),
                );
                let depth_threshold = host
                    .host_settings()
                    .get_usize("QueueDepthThreshold", 10_000);
                let depth_host = host.clone();
                self.health.add_check(
                    format!("queue:{}", host.name()),
                    queue_depth_check(host.name(), depth_threshold, move || {
                        depth_host.queue_depth()
                    }),
                    false,
                    Duration::from_secs(5),
                );
                if !self.config.startup_delay.is_zero() {
                    tokio::time::sleep(self.config.startup_delay).await;
                }
                true
            }
            Err(e) => {
                // The host stays in error; supervision may pick it up.
                self.items_failed.fetch_add(1, Ordering::Relaxed);
                error!(host = host.name(), error = %e, kind = e.kind(), "host start failed");
                false
            }
        }
    }

    /// Stop the production: services first, then processes, then
    /// operations, strictly the reverse of the start order.
    pub async fn stop(&self) -> Result<(), EngineError> {
        {
            let mut state = self.state.write();
            if !matches!(*state, ProductionState::Running | ProductionState::Error) {
                return Ok(());
            }
            *state = ProductionState::Stopping;
        }
        info!(
            production = %self.production_name().unwrap_or_default(),
            "production stopping"
        );

        if let Some((handle, token)) = self.monitor.lock().take() {
            token.cancel();
            handle.abort();
        }

        let services = self.services.read().clone();
        let processes = self.processes.read().clone();
        let operations = self.operations.read().clone();
        for host in services
            .iter()
            .rev()
            .chain(processes.iter().rev())
            .chain(operations.iter().rev())
        {
            if let Err(e) = host.stop(self.config.shutdown_timeout).await {
                error!(host = host.name(), error = %e, "host stop failed");
            }
            self.health.remove_check(&format!("host:{}", host.name()));
            self.health.remove_check(&format!("queue:{}", host.name()));
        }

        let wal = self.wal.write().take();
        if let Some(wal) = wal {
            wal.stop().await;
        }
        *self.store.write() = None;

        *self.state.write() = ProductionState::Stopped;
        info!("production stopped");
        Ok(())
    }

    /// Block until a shutdown signal arrives and the phased shutdown has
    /// completed, then finish engine cleanup.
    pub async fn wait_for_shutdown(&self) {
        let coordinator = self.shutdown.read().clone();
        let Some(coordinator) = coordinator else {
            return;
        };
        coordinator.wait().await;
        coordinator.wait_complete().await;

        if let Some((handle, token)) = self.monitor.lock().take() {
            token.cancel();
            handle.abort();
        }
        *self.state.write() = ProductionState::Stopped;
    }

    // Operator surface

    /// Stop and start a specific host.
    pub async fn restart_host(&self, name: &str) -> Result<(), EngineError> {
        let host = self.get_host(name).ok_or_else(|| EngineError::HostNotFound {
            name: name.to_string(),
        })?;
        info!(host = name, "restarting host");
        host.stop(self.config.shutdown_timeout).await?;
        host.start().await
    }

    /// Enable and start a disabled host.
    pub async fn enable_host(&self, name: &str) -> Result<(), EngineError> {
        let host = self.get_host(name).ok_or_else(|| EngineError::HostNotFound {
            name: name.to_string(),
        })?;
        host.set_enabled(true);
        if !host.state().is_running() {
            host.start().await?;
        }
        Ok(())
    }

    /// Disable and stop a host.
    pub async fn disable_host(&self, name: &str) -> Result<(), EngineError> {
        let host = self.get_host(name).ok_or_else(|| EngineError::HostNotFound {
            name: name.to_string(),
        })?;
        host.set_enabled(false);
        host.stop(self.config.shutdown_timeout).await
    }

    /// Hot-reload configuration for one host.
    pub async fn reload_host_config(
        &self,
        name: &str,
        pool_size: Option<usize>,
        enabled: Option<bool>,
        adapter_settings: Option<crate::config::Settings>,
        host_settings: Option<crate::config::Settings>,
    ) -> Result<(), EngineError> {
        let host = self.get_host(name).ok_or_else(|| EngineError::HostNotFound {
            name: name.to_string(),
        })?;
        host.reload_config(pool_size, enabled, adapter_settings, host_settings)
            .await
    }

    /// Status summary for operator tooling.
    pub fn status(&self) -> serde_json::Value {
        let hosts: Vec<serde_json::Value> = self
            .hosts()
            .iter()
            .map(|host| {
                let metrics = host.metrics_snapshot();
                json!({
                    "name": host.name(),
                    "kind": host.kind(),
                    "state": host.state(),
                    "enabled": host.enabled(),
                    "pool_size": host.pool_size(),
                    "queue_depth": host.queue_depth(),
                    "messages_received": metrics.messages_received,
                    "messages_processed": metrics.messages_processed,
                    "messages_sent": metrics.messages_sent,
                    "messages_failed": metrics.messages_failed,
                    "restart_count": metrics.restart_count,
                })
            })
            .collect();

        json!({
            "name": self.production_name(),
            "state": self.state(),
            "started_at": self.started_at.lock().map(|t| t.to_rfc3339()),
            "items": {
                "total": self.hosts().len(),
                "services": self.services.read().len(),
                "processes": self.processes.read().len(),
                "operations": self.operations.read().len(),
                "started": self.items_started.load(Ordering::Relaxed),
                "failed": self.items_failed.load(Ordering::Relaxed),
            },
            "hosts": hosts,
        })
    }
}
