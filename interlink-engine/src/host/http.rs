//! HTTP transport hosts.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use async_trait::async_trait;

// Layer 3: Internal module imports
use super::behavior::{AdapterSpec, HostBehavior, HostContext, IngressOutcome};
use super::types::HostKind;
use crate::error::EngineError;
use crate::message::{Message, MessageState};

/// Inbound service fed by the HTTP adapter.
///
/// Each request body becomes one message; the response body echoes nothing
/// by default (a bare 200 acknowledges receipt).
pub struct HttpService;

impl HttpService {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HttpService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostBehavior for HttpService {
    fn kind(&self) -> HostKind {
        HostKind::Service
    }

    fn adapter_spec(&self) -> AdapterSpec {
        AdapterSpec::HttpInbound
    }

    async fn on_ingress(
        &self,
        ctx: &HostContext,
        raw: Vec<u8>,
    ) -> Result<IngressOutcome, EngineError> {
        Ok(IngressOutcome {
            message: Some(Message::create(raw, "application/octet-stream", ctx.name())),
            reply: None,
        })
    }

    async fn on_message(
        &self,
        _ctx: &HostContext,
        message: Message,
    ) -> Result<Option<Message>, EngineError> {
        Ok(Some(message))
    }
}

/// Outbound operation delivering messages over HTTP.
///
/// The response body becomes the result message's payload.
pub struct HttpOperation;

impl HttpOperation {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HttpOperation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostBehavior for HttpOperation {
    fn kind(&self) -> HostKind {
        HostKind::Operation
    }

    fn adapter_spec(&self) -> AdapterSpec {
        AdapterSpec::HttpOutbound
    }

    fn runtime_fanout(&self) -> bool {
        false
    }

    async fn on_message(
        &self,
        ctx: &HostContext,
        message: Message,
    ) -> Result<Option<Message>, EngineError> {
        let response = ctx.outbound()?.send(message.raw(), None).await?;
        let result = message
            .derive(ctx.name())
            .with_payload(response)
            .with_state(MessageState::Delivered);
        Ok(Some(result))
    }
}
