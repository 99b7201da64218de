//! File transport hosts.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use async_trait::async_trait;

// Layer 3: Internal module imports
use super::behavior::{AdapterSpec, HostBehavior, HostContext, IngressOutcome};
use super::types::HostKind;
use crate::error::EngineError;
use crate::message::{Message, MessageState};

/// Inbound service fed by the directory-polling file adapter.
///
/// Each picked-up file becomes one message, fanned out to
/// `TargetConfigNames`.
pub struct FileService;

impl FileService {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostBehavior for FileService {
    fn kind(&self) -> HostKind {
        HostKind::Service
    }

    fn adapter_spec(&self) -> AdapterSpec {
        AdapterSpec::FileInbound
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

/// Outbound operation writing each message to a file.
pub struct FileOperation;

impl FileOperation {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileOperation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostBehavior for FileOperation {
    fn kind(&self) -> HostKind {
        HostKind::Operation
    }

    fn adapter_spec(&self) -> AdapterSpec {
        AdapterSpec::FileOutbound
    }

    fn runtime_fanout(&self) -> bool {
        false
    }

    async fn on_message(
        &self,
        ctx: &HostContext,
        message: Message,
    ) -> Result<Option<Message>, EngineError> {
        let message_type = if message.envelope.message_type.is_empty() {
            None
        } else {
            Some(message.envelope.message_type.clone())
        };
        ctx.outbound()?
            .send(message.raw(), message_type.as_deref())
            .await?;
        Ok(Some(message.with_state(MessageState::Delivered)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::broker::ServiceRegistry;
    use crate::config::{ItemConfig, Settings};
    use crate::host::Host;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_service_wraps_bytes() {
        let ctx = HostContext {
            name: "Files.In".to_string(),
            kind: HostKind::Service,
            host_settings: Settings::new(),
            adapter_settings: Settings::new(),
            targets: Vec::new(),
            registry: None,
            outbound: None,
            class_registry: None,
            store: None,
        };
        let service = FileService::new();
        let outcome = service.on_ingress(&ctx, b"payload".to_vec()).await.unwrap();
        assert!(outcome.reply.is_none());
        let message = outcome.message.unwrap();
        assert_eq!(message.raw(), b"payload");
        assert_eq!(message.envelope.routing.source, "Files.In");
    }

    #[tokio::test]
    async fn test_file_operation_end_to_end() {
        let out_dir = TempDir::new().unwrap();
        let mut config = ItemConfig::new("Files.Out", "li.hosts.FileOperation");
        config
            .adapter_settings
            .set("FilePath", out_dir.path().to_string_lossy().to_string());
        config.adapter_settings.set("Filename", "msg_%id%.hl7");

        let host = Host::from_config(&config, Arc::new(FileOperation::new()));
        host.attach_registry(ServiceRegistry::new());
        host.start().await.unwrap();

        let mut message = Message::create(b"MSH|data\r".to_vec(), "application/hl7-v2+er7", "t");
        message.envelope.message_type = "ADT_A01".into();
        assert!(host.submit(message).await);

        for _ in 0..100 {
            if host.metrics().messages_processed() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let written: Vec<_> = std::fs::read_dir(out_dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(written.len(), 1);
        assert_eq!(std::fs::read(&written[0]).unwrap(), b"MSH|data\r");
        assert_eq!(host.metrics().messages_sent(), 1);

        host.stop(Duration::from_secs(5)).await.unwrap();
    }
}
