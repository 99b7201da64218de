//! The host runtime: queue, worker pool, lifecycle, and built-in wiring.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// Layer 3: Internal module imports
use super::behavior::{AdapterSpec, HostBehavior, HostContext};
use super::types::{HostKind, HostMetrics, HostMetricsSnapshot, HostState};
use crate::adapter::{
    Adapter, FileInboundAdapter, FileOutboundAdapter, HttpInboundAdapter, HttpOutboundAdapter,
    IngressHandler, MllpInboundAdapter, MllpOutboundAdapter, OutboundAdapter,
};
use crate::broker::{HostEnvelope, HostPort, ServiceRegistry, WorkItem};
use crate::config::{ItemConfig, Settings};
use crate::error::EngineError;
use crate::message::{DeliveryMode, Message};
use crate::queue::{ManagedQueue, OverflowPolicy, QueueKind};
use crate::registry::ClassRegistry;
use crate::store::{ExternalQueue, MessageStore};
use crate::wal::Wal;

const DEFAULT_QUEUE_SIZE: usize = 1000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
const DRAIN_WAIT: Duration = Duration::from_secs(30);
const WORKER_GET_TIMEOUT: Duration = Duration::from_secs(1);

/// A supervised worker-pool host. Cheap to clone; clones share state.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use interlink_engine::broker::ServiceRegistry;
/// use interlink_engine::config::ItemConfig;
/// use interlink_engine::host::{Host, PassthroughProcess};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), interlink_engine::error::EngineError> {
/// let config = ItemConfig::new("Echo", "li.hosts.PassthroughProcess");
/// let host = Host::from_config(&config, std::sync::Arc::new(PassthroughProcess::new()));
/// host.attach_registry(ServiceRegistry::new());
/// host.start().await?;
/// host.stop(Duration::from_secs(5)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

struct HostInner {
    id: Uuid,
    name: String,
    behavior: Arc<dyn HostBehavior>,
    pool_size: AtomicUsize,
    enabled: AtomicBool,
    adapter_settings: RwLock<Settings>,
    host_settings: RwLock<Settings>,
    state: RwLock<HostState>,
    metrics: HostMetrics,
    queue: RwLock<Option<ManagedQueue<WorkItem>>>,
    paused: watch::Sender<bool>,
    shutdown: RwLock<CancellationToken>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    context: RwLock<Option<Arc<HostContext>>>,
    adapter: RwLock<Option<Arc<dyn Adapter>>>,
    registry: RwLock<Option<ServiceRegistry>>,
    class_registry: RwLock<Option<Arc<ClassRegistry>>>,
    store: RwLock<Option<Arc<dyn MessageStore>>>,
    wal: RwLock<Option<Wal>>,
    engine_metrics: RwLock<Option<crate::metrics::MetricsRegistry>>,
    external_queue: RwLock<Option<ExternalQueueBinding>>,
}

/// Cross-process queue binding: submits and the worker feed delegate
/// through this instead of staying purely in-process.
#[derive(Clone)]
struct ExternalQueueBinding {
    queue: Arc<dyn ExternalQueue>,
    name: String,
}

impl Host {
    /// Build a host from an item configuration and its behavior.
    pub fn from_config(config: &ItemConfig, behavior: Arc<dyn HostBehavior>) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(HostInner {
                id: Uuid::new_v4(),
                name: config.name.clone(),
                behavior,
                pool_size: AtomicUsize::new(config.pool_size.max(1)),
                enabled: AtomicBool::new(config.enabled),
                adapter_settings: RwLock::new(config.adapter_settings.clone()),
                host_settings: RwLock::new(config.host_settings.clone()),
                state: RwLock::new(HostState::Created),
                metrics: HostMetrics::default(),
                queue: RwLock::new(None),
                paused,
                shutdown: RwLock::new(CancellationToken::new()),
                workers: tokio::sync::Mutex::new(Vec::new()),
                context: RwLock::new(None),
                adapter: RwLock::new(None),
                registry: RwLock::new(None),
                class_registry: RwLock::new(None),
                store: RwLock::new(None),
                wal: RwLock::new(None),
                engine_metrics: RwLock::new(None),
                external_queue: RwLock::new(None),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> HostKind {
        self.inner.behavior.kind()
    }

    pub fn state(&self) -> HostState {
        *self.inner.state.read()
    }

    pub fn enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn pool_size(&self) -> usize {
        self.inner.pool_size.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> &HostMetrics {
        &self.inner.metrics
    }

    pub fn metrics_snapshot(&self) -> HostMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Items currently queued (0 before start).
    pub fn queue_depth(&self) -> usize {
        self.inner
            .queue
            .read()
            .as_ref()
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// The host's queue handle, once started.
    pub fn queue(&self) -> Option<ManagedQueue<WorkItem>> {
        self.inner.queue.read().clone()
    }

    /// The adapter owned by this host, once started.
    pub fn adapter(&self) -> Option<Arc<dyn Adapter>> {
        self.inner.adapter.read().clone()
    }

    /// Attach the inter-host fabric. Call before `start`.
    pub fn attach_registry(&self, registry: ServiceRegistry) {
        *self.inner.registry.write() = Some(registry);
    }

    /// Attach the class registry (for transform resolution).
    pub fn attach_class_registry(&self, registry: Arc<ClassRegistry>) {
        *self.inner.class_registry.write() = Some(registry);
    }

    /// Attach the audit store.
    pub fn attach_store(&self, store: Arc<dyn MessageStore>) {
        *self.inner.store.write() = Some(store);
    }

    /// Attach the write-ahead log.
    pub fn attach_wal(&self, wal: Wal) {
        *self.inner.wal.write() = Some(wal);
    }

    /// Attach the production's metrics registry.
    pub fn attach_metrics(&self, metrics: crate::metrics::MetricsRegistry) {
        *self.inner.engine_metrics.write() = Some(metrics);
    }

    /// Attach a cross-process queue. Submits are sent to the named queue
    /// and a puller task feeds leased messages into the local pipeline.
    pub fn attach_external_queue(
        &self,
        queue: Arc<dyn ExternalQueue>,
        queue_name: impl Into<String>,
    ) {
        *self.inner.external_queue.write() = Some(ExternalQueueBinding {
            queue,
            name: queue_name.into(),
        });
    }

    fn external_queue(&self) -> Option<ExternalQueueBinding> {
        self.inner.external_queue.read().clone()
    }

    fn engine_metrics(&self) -> Option<crate::metrics::MetricsRegistry> {
        self.inner.engine_metrics.read().clone()
    }

    /// Current host-level settings snapshot.
    pub fn host_settings(&self) -> Settings {
        self.inner.host_settings.read().clone()
    }

    /// Re-queue a recovered WAL entry without consuming a retry or
    /// appending a fresh entry.
    pub async fn resubmit_recovered(&self, entry: &crate::wal::WalEntry) -> bool {
        if !self.state().is_running() {
            return false;
        }
        let mut message = Message::create(
            entry.payload.clone(),
            "application/octet-stream",
            self.inner.name.clone(),
        );
        if let Some(message_type) = &entry.message_type {
            message.envelope.message_type = message_type.clone();
        }
        self.enqueue(WorkItem {
            message,
            envelope: None,
            wal_entry_id: Some(entry.id.clone()),
        })
        .await
    }

    /// Override the lifecycle state directly.
    ///
    /// Intended for supervision plumbing and fault-injection in tests.
    #[doc(hidden)]
    pub fn force_state(&self, state: HostState) {
        *self.inner.state.write() = state;
    }

    // Lifecycle

    /// Start the host: build the queue, the adapter, and the worker pool.
    pub async fn start(&self) -> Result<(), EngineError> {
        {
            let mut state = self.inner.state.write();
            if !state.can_start() {
                return Err(EngineError::configuration(format!(
                    "cannot start host '{}' in state {:?}",
                    self.inner.name, *state
                )));
            }
            *state = HostState::Starting;
        }

        match self.start_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                *self.inner.state.write() = HostState::Error;
                error!(host = %self.inner.name, error = %e, kind = e.kind(), "host start failed");
                Err(e)
            }
        }
    }

    async fn start_inner(&self) -> Result<(), EngineError> {
        let host_settings = self.inner.host_settings.read().clone();
        let adapter_settings = self.inner.adapter_settings.read().clone();
        let pool_size = self.pool_size();

        info!(host = %self.inner.name, pool_size, "host starting");

        // Queue with configured discipline and overflow policy; invalid
        // values fall back to the defaults with a warning.
        let queue_size = host_settings.get_usize("QueueSize", DEFAULT_QUEUE_SIZE);
        let queue_kind = match host_settings.get_or("QueueType", "fifo").parse::<QueueKind>() {
            Ok(kind) => kind,
            Err(_) => {
                warn!(host = %self.inner.name, "invalid QueueType, using fifo");
                QueueKind::Fifo
            }
        };
        let overflow = match host_settings
            .get_or("OverflowStrategy", "block")
            .parse::<OverflowPolicy>()
        {
            Ok(policy) => policy,
            Err(_) => {
                warn!(host = %self.inner.name, "invalid OverflowStrategy, using block");
                OverflowPolicy::Block
            }
        };
        let queue = ManagedQueue::new(queue_kind, queue_size, overflow, None);
        *self.inner.queue.write() = Some(queue.clone());
        debug!(
            host = %self.inner.name,
            discipline = ?queue_kind,
            size = queue_size,
            overflow = ?overflow,
            "queue created"
        );

        // Fresh run state.
        let token = CancellationToken::new();
        *self.inner.shutdown.write() = token.clone();
        let _ = self.inner.paused.send_replace(false);

        // Adapter per the behavior's spec.
        let (adapter, outbound) = self.build_adapter(&adapter_settings)?;

        let context = Arc::new(HostContext {
            name: self.inner.name.clone(),
            kind: self.inner.behavior.kind(),
            host_settings: host_settings.clone(),
            adapter_settings,
            targets: host_settings.get_list("TargetConfigNames"),
            registry: self.inner.registry.read().clone(),
            outbound,
            class_registry: self.inner.class_registry.read().clone(),
            store: self.inner.store.read().clone(),
        });
        *self.inner.context.write() = Some(Arc::clone(&context));

        self.inner.behavior.on_init(&context).await?;

        // Workers first, then state, then the adapter: by the time traffic
        // can arrive, submits are accepted.
        let mut workers = self.inner.workers.lock().await;
        for worker_id in 0..pool_size {
            let host = self.clone();
            let ctx = Arc::clone(&context);
            let queue = queue.clone();
            let token = token.clone();
            let paused_rx = self.inner.paused.subscribe();
            workers.push(tokio::spawn(async move {
                worker_loop(host, ctx, queue, token, paused_rx, worker_id).await;
            }));
        }
        // With a cross-process queue configured, a puller task leases
        // messages and feeds them into the local pipeline, acking once the
        // local queue (and WAL) has taken ownership.
        if let Some(binding) = self.external_queue() {
            let host = self.clone();
            let token = token.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let leased = tokio::select! {
                        _ = token.cancelled() => break,
                        leased = binding.queue.receive(&binding.name, Some(WORKER_GET_TIMEOUT)) => leased,
                    };
                    match leased {
                        Ok(Some(queued)) => match Message::from_cbor(&queued.payload) {
                            Ok(message) => {
                                let wal_entry_id = host.wal_append(&message).await;
                                let taken = host
                                    .enqueue(WorkItem {
                                        message,
                                        envelope: None,
                                        wal_entry_id,
                                    })
                                    .await;
                                let outcome = if taken {
                                    binding.queue.ack(&queued).await
                                } else {
                                    binding.queue.nack(&queued, true).await
                                };
                                if let Err(e) = outcome {
                                    warn!(host = %host.inner.name, error = %e, "external queue ack failed");
                                }
                            }
                            Err(e) => {
                                warn!(host = %host.inner.name, error = %e, "external payload decode failed");
                                let _ = binding.queue.nack(&queued, false).await;
                            }
                        },
                        Ok(None) => {}
                        Err(e) => {
                            warn!(host = %host.inner.name, error = %e, "external queue receive failed");
                            tokio::time::sleep(WORKER_GET_TIMEOUT).await;
                        }
                    }
                }
            }));
        }
        drop(workers);

        self.inner.metrics.mark_started();
        *self.inner.state.write() = HostState::Running;

        if let Some(adapter) = adapter {
            adapter.start().await?;
            *self.inner.adapter.write() = Some(adapter);
        }

        self.inner.behavior.on_start(&context).await?;
        info!(host = %self.inner.name, "host started");
        Ok(())
    }

    fn build_adapter(
        &self,
        settings: &Settings,
    ) -> Result<(Option<Arc<dyn Adapter>>, Option<Arc<dyn OutboundAdapter>>), EngineError> {
        let name = self.inner.name.clone();
        let ingress: Arc<dyn IngressHandler> = Arc::new(HostIngress { host: self.clone() });

        Ok(match self.inner.behavior.adapter_spec() {
            AdapterSpec::None => (None, None),
            AdapterSpec::MllpInbound => {
                let adapter = Arc::new(MllpInboundAdapter::new(&name, settings.clone(), ingress));
                (Some(adapter as Arc<dyn Adapter>), None)
            }
            AdapterSpec::HttpInbound => {
                let adapter = Arc::new(HttpInboundAdapter::new(&name, settings.clone(), ingress));
                (Some(adapter as Arc<dyn Adapter>), None)
            }
            AdapterSpec::FileInbound => {
                let adapter = Arc::new(FileInboundAdapter::new(&name, settings.clone(), ingress));
                (Some(adapter as Arc<dyn Adapter>), None)
            }
            AdapterSpec::MllpOutbound => {
                let adapter = Arc::new(MllpOutboundAdapter::new(&name, settings.clone()));
                (
                    Some(Arc::clone(&adapter) as Arc<dyn Adapter>),
                    Some(adapter as Arc<dyn OutboundAdapter>),
                )
            }
            AdapterSpec::HttpOutbound => {
                let adapter = Arc::new(HttpOutboundAdapter::new(&name, settings.clone()));
                (
                    Some(Arc::clone(&adapter) as Arc<dyn Adapter>),
                    Some(adapter as Arc<dyn OutboundAdapter>),
                )
            }
            AdapterSpec::FileOutbound => {
                let adapter = Arc::new(FileOutboundAdapter::new(&name, settings.clone()));
                (
                    Some(Arc::clone(&adapter) as Arc<dyn Adapter>),
                    Some(adapter as Arc<dyn OutboundAdapter>),
                )
            }
        })
    }

    /// Pause message processing without draining. Idempotent.
    pub fn pause(&self) {
        let mut state = self.inner.state.write();
        if *state == HostState::Running {
            let _ = self.inner.paused.send_replace(true);
            *state = HostState::Paused;
            info!(host = %self.inner.name, "host paused");
        }
    }

    /// Resume a paused host. Idempotent.
    pub fn resume(&self) {
        let mut state = self.inner.state.write();
        if *state == HostState::Paused {
            let _ = self.inner.paused.send_replace(false);
            *state = HostState::Running;
            info!(host = %self.inner.name, "host resumed");
        }
    }

    /// Stop the host: signal shutdown, join workers up to `deadline`,
    /// abandon stragglers, stop the adapter, and run the teardown hooks.
    pub async fn stop(&self, deadline: Duration) -> Result<(), EngineError> {
        {
            let mut state = self.inner.state.write();
            if !matches!(
                *state,
                HostState::Running | HostState::Paused | HostState::Error
            ) {
                return Ok(());
            }
            *state = HostState::Stopping;
        }
        info!(host = %self.inner.name, "host stopping");

        self.inner.shutdown.read().clone().cancel();
        let _ = self.inner.paused.send_replace(false);

        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.inner.workers.lock().await;
            workers.drain(..).collect()
        };
        let deadline_at = tokio::time::Instant::now() + deadline;
        for mut handle in handles {
            let remaining = deadline_at.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                warn!(host = %self.inner.name, "worker did not stop in time, aborting");
                handle.abort();
            }
        }

        let adapter = self.inner.adapter.write().take();
        if let Some(adapter) = adapter {
            if let Err(e) = adapter.stop().await {
                warn!(host = %self.inner.name, error = %e, "adapter stop failed");
            }
        }

        let context = self.inner.context.read().clone();
        if let Some(context) = &context {
            if let Err(e) = self.inner.behavior.on_stop(context).await {
                warn!(host = %self.inner.name, error = %e, "on_stop hook failed");
            }
            if let Err(e) = self.inner.behavior.on_teardown(context).await {
                warn!(host = %self.inner.name, error = %e, "on_teardown hook failed");
            }
        }

        *self.inner.state.write() = HostState::Stopped;
        self.inner.metrics.mark_stopped();
        info!(host = %self.inner.name, "host stopped");
        Ok(())
    }

    /// Hot-reload configuration: pause, drain (bounded), swap the adapter,
    /// apply new settings, restart the adapter, resume.
    ///
    /// A changed pool size takes effect on the next full start.
    pub async fn reload_config(
        &self,
        pool_size: Option<usize>,
        enabled: Option<bool>,
        adapter_settings: Option<Settings>,
        host_settings: Option<Settings>,
    ) -> Result<(), EngineError> {
        let was_running = matches!(self.state(), HostState::Running);
        info!(host = %self.inner.name, "config reload starting");

        if was_running {
            self.pause();
        }

        // Bounded drain: wait for in-flight work to settle.
        let drain_deadline = tokio::time::Instant::now() + DRAIN_WAIT;
        loop {
            let depth = self.queue_depth();
            if depth == 0 || tokio::time::Instant::now() >= drain_deadline {
                if depth > 0 {
                    warn!(host = %self.inner.name, remaining = depth, "queue drain timed out");
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let adapter = self.inner.adapter.write().take();
        if let Some(adapter) = adapter {
            adapter.stop().await?;
        }

        if let Some(pool_size) = pool_size {
            self.inner.pool_size.store(pool_size.max(1), Ordering::Relaxed);
        }
        if let Some(enabled) = enabled {
            self.inner.enabled.store(enabled, Ordering::Relaxed);
        }
        if let Some(settings) = adapter_settings {
            *self.inner.adapter_settings.write() = settings;
        }
        if let Some(settings) = host_settings {
            *self.inner.host_settings.write() = settings;
        }

        // Rebuild the context snapshot from the new settings.
        let host_settings = self.inner.host_settings.read().clone();
        let new_adapter_settings = self.inner.adapter_settings.read().clone();
        let (adapter, outbound) = if self.enabled() {
            self.build_adapter(&new_adapter_settings)?
        } else {
            (None, None)
        };
        let context = Arc::new(HostContext {
            name: self.inner.name.clone(),
            kind: self.inner.behavior.kind(),
            host_settings: host_settings.clone(),
            adapter_settings: new_adapter_settings,
            targets: host_settings.get_list("TargetConfigNames"),
            registry: self.inner.registry.read().clone(),
            outbound,
            class_registry: self.inner.class_registry.read().clone(),
            store: self.inner.store.read().clone(),
        });
        *self.inner.context.write() = Some(context);

        if let Some(adapter) = adapter {
            adapter.start().await?;
            *self.inner.adapter.write() = Some(adapter);
        }

        if !self.enabled() {
            *self.inner.state.write() = HostState::Stopped;
        } else if was_running {
            self.resume();
        }

        info!(host = %self.inner.name, "config reload complete");
        Ok(())
    }

    // Submission

    /// Submit a message for processing.
    ///
    /// Returns `false` when the host is not running or its queue rejected
    /// the item under a non-blocking overflow policy.
    pub async fn submit(&self, message: Message) -> bool {
        if !self.state().is_running() {
            warn!(host = %self.inner.name, state = ?self.state(), "submit rejected");
            return false;
        }

        // With a cross-process queue configured, submission delegates to it;
        // the puller task brings the message back into the local pipeline.
        if let Some(binding) = self.external_queue() {
            let payload = match message.to_cbor() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(host = %self.inner.name, error = %e, "external submit encode failed");
                    return false;
                }
            };
            return match binding
                .queue
                .send(
                    &binding.name,
                    payload,
                    Some(message.envelope.priority),
                    None,
                    Some(message.envelope.correlation_id.to_string()),
                )
                .await
            {
                Ok(_) => true,
                Err(e) => {
                    warn!(host = %self.inner.name, error = %e, "external submit failed");
                    false
                }
            };
        }

        let wal_entry_id = self.wal_append(&message).await;
        self.enqueue(WorkItem {
            message,
            envelope: None,
            wal_entry_id,
        })
        .await
    }

    async fn submit_envelope_inner(&self, envelope: HostEnvelope) -> bool {
        if !self.state().is_running() {
            warn!(host = %self.inner.name, state = ?self.state(), "envelope submit rejected");
            return false;
        }
        let mut item = WorkItem::from_envelope(envelope);
        item.wal_entry_id = self.wal_append(&item.message).await;
        self.enqueue(item).await
    }

    async fn enqueue(&self, item: WorkItem) -> bool {
        let queue = self.inner.queue.read().clone();
        let Some(queue) = queue else {
            return false;
        };
        let accepted = queue.put(item).await;
        if accepted {
            self.inner.metrics.record_received();
            if let Some(metrics) = self.engine_metrics() {
                metrics
                    .counter("messages_received", Some(&self.inner.name))
                    .inc();
            }
        }
        accepted
    }

    async fn wal_append(&self, message: &Message) -> Option<String> {
        if message.envelope.delivery_mode != DeliveryMode::AtLeastOnce {
            return None;
        }
        let wal = self.inner.wal.read().clone()?;
        let message_type = if message.envelope.message_type.is_empty() {
            None
        } else {
            Some(message.envelope.message_type.clone())
        };
        match wal
            .append(
                &self.inner.name,
                &message.envelope.message_id.to_string(),
                message.payload.raw.clone(),
                message_type,
            )
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(host = %self.inner.name, error = %e, "wal append failed");
                None
            }
        }
    }

    fn wal(&self) -> Option<Wal> {
        self.inner.wal.read().clone()
    }

    /// Re-queue a retryable item after its delay.
    async fn schedule_retry(&self, item: WorkItem, reason: String) {
        if let Some(wal_entry_id) = item.wal_entry_id.clone() {
            if let Some(wal) = self.wal() {
                match wal.fail(&wal_entry_id, &reason).await {
                    Ok(true) => {
                        let host = self.clone();
                        let delay = wal.retry_delay();
                        let message = item.message.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let requeued = host
                                .enqueue(WorkItem {
                                    message,
                                    envelope: None,
                                    wal_entry_id: Some(wal_entry_id),
                                })
                                .await;
                            if !requeued {
                                warn!(host = %host.inner.name, "retry re-queue rejected");
                            }
                        });
                    }
                    Ok(false) => {
                        debug!(host = %self.inner.name, "retry budget exhausted");
                    }
                    Err(e) => {
                        warn!(host = %self.inner.name, error = %e, "wal fail bookkeeping error");
                    }
                }
                return;
            }
        }

        // No WAL: track retries on the envelope itself.
        let mut message = item.message.clone();
        message.envelope.retry_count += 1;
        if message.envelope.is_retryable() {
            let delay = self
                .inner
                .host_settings
                .read()
                .get_duration_secs("RetryDelay", DEFAULT_RETRY_DELAY);
            let host = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let requeued = host
                    .enqueue(WorkItem {
                        message,
                        envelope: None,
                        wal_entry_id: None,
                    })
                    .await;
                if !requeued {
                    warn!(host = %host.inner.name, "retry re-queue rejected");
                }
            });
        } else {
            warn!(
                host = %self.inner.name,
                message_id = %message.envelope.message_id,
                retries = message.envelope.retry_count,
                "message failed permanently"
            );
        }
    }

    async fn process_item(&self, ctx: &HostContext, item: WorkItem) {
        let inner = &self.inner;

        if let Some(wal_entry_id) = &item.wal_entry_id {
            if let Some(wal) = self.wal() {
                if let Err(e) = wal.mark_processing(wal_entry_id).await {
                    debug!(host = %inner.name, error = %e, "mark_processing failed");
                }
            }
        }

        if item.message.is_expired() {
            warn!(
                host = %inner.name,
                message_id = %item.message.envelope.message_id,
                "expired message dropped"
            );
            inner.metrics.record_failed();
            if let (Some(wal_entry_id), Some(wal)) = (&item.wal_entry_id, self.wal()) {
                let _ = wal.complete(wal_entry_id).await;
            }
            self.answer_sync(ctx, &item, None);
            return;
        }

        let host_timeout = ctx
            .host_settings
            .get_duration_secs("Timeout", DEFAULT_TIMEOUT);
        let started = std::time::Instant::now();
        let behavior = Arc::clone(&inner.behavior);

        let outcome: Result<Option<Message>, EngineError> = async {
            let message = behavior
                .on_before_process(ctx, item.message.clone())
                .await?;
            let result =
                match tokio::time::timeout(host_timeout, behavior.on_message(ctx, message.clone()))
                    .await
                {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(EngineError::Timeout {
                            operation: "on_message".into(),
                            timeout: host_timeout,
                        })
                    }
                };
            behavior.on_after_process(ctx, &message, result).await
        }
        .await;

        match outcome {
            Ok(result) => {
                let elapsed_us = started.elapsed().as_micros() as u64;
                inner.metrics.record_processed(elapsed_us);
                if let Some(metrics) = self.engine_metrics() {
                    metrics
                        .counter("messages_processed", Some(&inner.name))
                        .inc();
                    metrics
                        .histogram("process_latency_ms", Some(&inner.name))
                        .observe(elapsed_us as f64 / 1000.0);
                }

                if let (Some(wal_entry_id), Some(wal)) = (&item.wal_entry_id, self.wal()) {
                    let _ = wal.complete(wal_entry_id).await;
                }

                if inner.behavior.kind() == HostKind::Operation && result.is_some() {
                    inner.metrics.record_sent();
                    if let Some(metrics) = self.engine_metrics() {
                        metrics.counter("messages_sent", Some(&inner.name)).inc();
                    }
                }

                if item.is_sync() {
                    self.answer_sync(ctx, &item, result);
                } else if inner.behavior.runtime_fanout() {
                    if let Some(result_message) = result {
                        for target in &ctx.targets {
                            let derived = result_message.derive(&inner.name);
                            match ctx.send_to_target(target, derived).await {
                                Ok(_) => {
                                    inner.metrics.record_sent();
                                    if let Some(metrics) = self.engine_metrics() {
                                        metrics.counter("messages_sent", Some(&inner.name)).inc();
                                    }
                                }
                                Err(e) => {
                                    warn!(
                                        host = %inner.name,
                                        target = %target,
                                        error = %e,
                                        kind = e.kind(),
                                        "fan-out failed"
                                    );
                                    inner.metrics.record_failed();
                                }
                            }
                        }
                    }
                }
            }
            Err(e) => {
                let recovery = inner
                    .behavior
                    .on_process_error(ctx, &item.message, &e)
                    .await;
                inner.metrics.record_failed();
                if let Some(metrics) = self.engine_metrics() {
                    metrics.counter("messages_failed", Some(&inner.name)).inc();
                }
                error!(
                    host = %inner.name,
                    message_id = %item.message.envelope.message_id,
                    correlation_id = %item.message.envelope.correlation_id,
                    error = %e,
                    kind = e.kind(),
                    "message processing failed"
                );

                if matches!(e, EngineError::RetrySignal { .. }) {
                    self.schedule_retry(item.clone(), e.to_string()).await;
                } else if let (Some(wal_entry_id), Some(wal)) = (&item.wal_entry_id, self.wal()) {
                    let _ = wal.fail_permanent(wal_entry_id, &e.to_string()).await;
                }

                self.answer_sync(ctx, &item, recovery);
            }
        }
    }

    /// Deliver the result to the sync waiter, if this item carries one.
    fn answer_sync(&self, ctx: &HostContext, item: &WorkItem, result: Option<Message>) {
        if !item.is_sync() {
            return;
        }
        if let (Some(meta), Some(registry)) = (&item.envelope, ctx.registry.as_ref()) {
            registry.send_response(meta.correlation_id, result);
        }
    }
}

async fn worker_loop(
    host: Host,
    ctx: Arc<HostContext>,
    queue: ManagedQueue<WorkItem>,
    token: CancellationToken,
    mut paused_rx: watch::Receiver<bool>,
    worker_id: usize,
) {
    debug!(host = %ctx.name, worker_id, "worker started");
    loop {
        if token.is_cancelled() {
            break;
        }

        // Pause gate: wait for the flag to clear or shutdown. The borrow
        // is copied out so no watch read guard is held across the await.
        let is_paused = { *paused_rx.borrow() };
        if is_paused {
            tokio::select! {
                _ = token.cancelled() => break,
                changed = paused_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
        }

        // Short get timeout so shutdown is honoured promptly.
        let item = tokio::select! {
            _ = token.cancelled() => break,
            item = queue.get(Some(WORKER_GET_TIMEOUT)) => item,
        };
        match item {
            Ok(item) => host.process_item(&ctx, item).await,
            Err(_) => continue, // timeout: re-check gates
        }
    }
    debug!(host = %ctx.name, worker_id, "worker stopped");
}

/// Bridges an inbound adapter to its host.
struct HostIngress {
    host: Host,
}

#[async_trait]
impl IngressHandler for HostIngress {
    async fn on_message_received(&self, raw: Vec<u8>) -> Result<Option<Vec<u8>>, EngineError> {
        let context = self.host.inner.context.read().clone();
        let Some(context) = context else {
            return Err(EngineError::Send {
                reason: format!("host '{}' not started", self.host.inner.name),
            });
        };

        let outcome = self
            .host
            .inner
            .behavior
            .on_ingress(&context, raw)
            .await?;
        if let Some(message) = outcome.message {
            if !self.host.submit(message).await {
                warn!(host = %self.host.inner.name, "ingress message rejected by queue");
            }
        }
        Ok(outcome.reply)
    }
}

#[async_trait]
impl HostPort for Host {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn submit_envelope(&self, envelope: HostEnvelope) -> bool {
        self.submit_envelope_inner(envelope).await
    }
}

/// Register the built-in host classes and their legacy-name aliases.
pub fn install_builtins(registry: &ClassRegistry) {
    use super::file::{FileOperation, FileService};
    use super::hl7::{Hl7MllpOperation, Hl7MllpService};
    use super::http::{HttpOperation, HttpService};
    use super::routing::{PassthroughProcess, RoutingProcess};

    registry.register_host_builtin(
        "li.hosts.Hl7MllpService",
        Arc::new(|_build| Ok(Arc::new(Hl7MllpService::new()) as Arc<dyn HostBehavior>)),
    );
    registry.register_host_builtin(
        "li.hosts.Hl7MllpOperation",
        Arc::new(|_build| Ok(Arc::new(Hl7MllpOperation::new()) as Arc<dyn HostBehavior>)),
    );
    registry.register_host_builtin(
        "li.hosts.RoutingProcess",
        Arc::new(|build| Ok(Arc::new(RoutingProcess::from_build(build)?) as Arc<dyn HostBehavior>)),
    );
    registry.register_host_builtin(
        "li.hosts.PassthroughProcess",
        Arc::new(|_build| Ok(Arc::new(PassthroughProcess::new()) as Arc<dyn HostBehavior>)),
    );
    registry.register_host_builtin(
        "li.hosts.FileService",
        Arc::new(|_build| Ok(Arc::new(FileService::new()) as Arc<dyn HostBehavior>)),
    );
    registry.register_host_builtin(
        "li.hosts.FileOperation",
        Arc::new(|_build| Ok(Arc::new(FileOperation::new()) as Arc<dyn HostBehavior>)),
    );
    registry.register_host_builtin(
        "li.hosts.HttpService",
        Arc::new(|_build| Ok(Arc::new(HttpService::new()) as Arc<dyn HostBehavior>)),
    );
    registry.register_host_builtin(
        "li.hosts.HttpOperation",
        Arc::new(|_build| Ok(Arc::new(HttpOperation::new()) as Arc<dyn HostBehavior>)),
    );

    // Legacy class-name aliases.
    registry.register_alias_builtin("EnsLib.HL7.Service.TCPService", "li.hosts.Hl7MllpService");
    registry.register_alias_builtin(
        "EnsLib.HL7.Operation.TCPOperation",
        "li.hosts.Hl7MllpOperation",
    );
    registry.register_alias_builtin(
        "EnsLib.HL7.MsgRouter.RoutingEngine",
        "li.hosts.RoutingProcess",
    );
    registry.register_alias_builtin("EnsLib.MsgRouter.RoutingEngine", "li.hosts.RoutingProcess");
    registry.register_alias_builtin("EnsLib.File.InboundAdapter", "li.hosts.FileService");
    registry.register_alias_builtin("EnsLib.File.OutboundAdapter", "li.hosts.FileOperation");
    registry.register_alias_builtin("EnsLib.HTTP.InboundAdapter", "li.hosts.HttpService");
    registry.register_alias_builtin("EnsLib.HTTP.OutboundAdapter", "li.hosts.HttpOperation");
}
