//! The host behavior contract and the context handed to hooks.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use uuid::Uuid;

// Layer 3: Internal module imports
use super::types::HostKind;
use crate::adapter::OutboundAdapter;
use crate::broker::ServiceRegistry;
use crate::config::Settings;
use crate::error::EngineError;
use crate::message::{Message, MessagePriority};
use crate::registry::{ClassRegistry, Transform};
use crate::store::MessageStore;

/// Which adapter the runtime should build for a behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterSpec {
    None,
    MllpInbound,
    MllpOutbound,
    HttpInbound,
    HttpOutbound,
    FileInbound,
    FileOutbound,
}

impl AdapterSpec {
    /// Returns `true` for the inbound (listening/polling) variants.
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            AdapterSpec::MllpInbound | AdapterSpec::HttpInbound | AdapterSpec::FileInbound
        )
    }
}

/// Result of turning raw adapter bytes into engine work.
pub struct IngressOutcome {
    /// The message to submit; `None` means nothing enters the queue.
    pub message: Option<Message>,
    /// Bytes the adapter writes back to the peer (an ACK, an HTTP body).
    pub reply: Option<Vec<u8>>,
}

/// Everything a behavior can reach from its hooks: the host's settings
/// snapshot, the inter-host fabric, the outbound adapter, transforms, and
/// the audit store.
pub struct HostContext {
    pub(crate) name: String,
    pub(crate) kind: HostKind,
    pub(crate) host_settings: Settings,
    pub(crate) adapter_settings: Settings,
    pub(crate) targets: Vec<String>,
    pub(crate) registry: Option<ServiceRegistry>,
    pub(crate) outbound: Option<Arc<dyn OutboundAdapter>>,
    pub(crate) class_registry: Option<Arc<ClassRegistry>>,
    pub(crate) store: Option<Arc<dyn MessageStore>>,
}

impl HostContext {
    /// The host's production-unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> HostKind {
        self.kind
    }

    pub fn host_settings(&self) -> &Settings {
        &self.host_settings
    }

    pub fn adapter_settings(&self) -> &Settings {
        &self.adapter_settings
    }

    /// Downstream fan-out targets (`TargetConfigNames`).
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// The audit store, when the production configured one.
    pub fn store(&self) -> Option<&Arc<dyn MessageStore>> {
        self.store.as_ref()
    }

    /// The outbound adapter; operations fail fast without one.
    pub fn outbound(&self) -> Result<&Arc<dyn OutboundAdapter>, EngineError> {
        self.outbound.as_ref().ok_or_else(|| EngineError::Send {
            reason: format!("host '{}' has no outbound adapter", self.name),
        })
    }

    /// Resolve a transform through the class registry.
    pub fn transform(&self, id: &str) -> Result<Arc<dyn Transform>, EngineError> {
        let registry = self
            .class_registry
            .as_ref()
            .ok_or_else(|| EngineError::configuration("no class registry attached"))?;
        registry.resolve_transform(id)
    }

    fn registry(&self) -> Result<&ServiceRegistry, EngineError> {
        self.registry.as_ref().ok_or_else(|| EngineError::Send {
            reason: format!("host '{}' is not attached to a service registry", self.name),
        })
    }

    /// Fire-and-forget a message to another host, through its queue.
    pub async fn send_to_target(
        &self,
        target: &str,
        message: Message,
    ) -> Result<Uuid, EngineError> {
        self.registry()?
            .send_request_async(&self.name, target, message, None)
            .await
    }

    /// Request/reply to another host, awaiting the correlated response.
    pub async fn send_request_sync(
        &self,
        target: &str,
        message: Message,
        deadline: Duration,
        priority: Option<MessagePriority>,
    ) -> Result<Option<Message>, EngineError> {
        self.registry()?
            .send_request_sync(&self.name, target, message, deadline, priority)
            .await
    }
}

/// Business logic plugged into the host runtime.
///
/// The lifecycle hooks (`on_init`, `on_start`, `on_stop`, `on_teardown`)
/// default to no-ops; the per-message hooks default to identity. Only
/// [`HostBehavior::on_message`] is mandatory.
#[async_trait]
pub trait HostBehavior: Send + Sync {
    /// Which specialisation this behavior implements.
    fn kind(&self) -> HostKind;

    /// Which adapter (if any) the runtime should build and own.
    fn adapter_spec(&self) -> AdapterSpec {
        AdapterSpec::None
    }

    /// Whether the runtime should fan out results to `TargetConfigNames`.
    ///
    /// Routing behaviors that do their own fan-out return `false`.
    fn runtime_fanout(&self) -> bool {
        true
    }

    /// Called during host initialisation, before the adapter starts.
    async fn on_init(&self, _ctx: &HostContext) -> Result<(), EngineError> {
        Ok(())
    }

    /// Called after the host has started.
    async fn on_start(&self, _ctx: &HostContext) -> Result<(), EngineError> {
        Ok(())
    }

    /// Called before the host stops.
    async fn on_stop(&self, _ctx: &HostContext) -> Result<(), EngineError> {
        Ok(())
    }

    /// Called during teardown, after the adapter has stopped.
    async fn on_teardown(&self, _ctx: &HostContext) -> Result<(), EngineError> {
        Ok(())
    }

    /// Turn raw adapter bytes into a message and an optional reply.
    async fn on_ingress(
        &self,
        ctx: &HostContext,
        raw: Vec<u8>,
    ) -> Result<IngressOutcome, EngineError> {
        Ok(IngressOutcome {
            message: Some(Message::create(
                raw,
                "application/octet-stream",
                ctx.name(),
            )),
            reply: None,
        })
    }

    /// Hook before processing; default identity.
    async fn on_before_process(
        &self,
        _ctx: &HostContext,
        message: Message,
    ) -> Result<Message, EngineError> {
        Ok(message)
    }

    /// The core per-message operation.
    async fn on_message(
        &self,
        ctx: &HostContext,
        message: Message,
    ) -> Result<Option<Message>, EngineError>;

    /// Hook after successful processing; default identity.
    async fn on_after_process(
        &self,
        _ctx: &HostContext,
        _message: &Message,
        result: Option<Message>,
    ) -> Result<Option<Message>, EngineError> {
        Ok(result)
    }

    /// Hook on processing failure; may return a recovery result.
    async fn on_process_error(
        &self,
        _ctx: &HostContext,
        _message: &Message,
        _error: &EngineError,
    ) -> Option<Message> {
        None
    }
}
