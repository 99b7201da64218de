//! HL7 v2 hosts: MLLP service (inbound) and MLLP operation (outbound).

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::behavior::{AdapterSpec, HostBehavior, HostContext, IngressOutcome};
use super::reply::{AckAction, ReplyCodeActions};
use super::types::HostKind;
use crate::error::EngineError;
use crate::hl7::{build_ack, AckCode, ParsedView};
use crate::message::{Message, MessageState, PropertyValue};

const VALIDATION_ERRORS_PROPERTY: &str = "validation_errors";

/// Structural validation shared by both HL7 hosts: MSH present, delimiters
/// declared, message type and control id populated.
fn validate_structure(view: &ParsedView) -> Vec<String> {
    let mut errors = Vec::new();
    if view.get_segment("MSH", 0).is_none() {
        errors.push("missing MSH segment".to_string());
        return errors;
    }
    if view.get_field("MSH-2").is_none() {
        errors.push("missing encoding characters in MSH-2".to_string());
    }
    if view.get_field("MSH-9.1").is_none() {
        errors.push("missing message type in MSH-9".to_string());
    }
    if view.message_control_id().is_none() {
        errors.push("missing message control id in MSH-10".to_string());
    }
    errors
}

/// Inbound HL7 v2 service over MLLP/TCP.
///
/// Parses each received frame, validates the structure, generates an ACK
/// per `AckMode` (`Immediate` default, `Never` suppresses ACKs), and
/// submits the wrapped message for fan-out to `TargetConfigNames`. Invalid
/// messages are acknowledged negatively and handed to `BadMessageHandler`
/// when configured, otherwise dropped.
pub struct Hl7MllpService;

impl Hl7MllpService {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Hl7MllpService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostBehavior for Hl7MllpService {
    fn kind(&self) -> HostKind {
        HostKind::Service
    }

    fn adapter_spec(&self) -> AdapterSpec {
        AdapterSpec::MllpInbound
    }

    async fn on_ingress(
        &self,
        ctx: &HostContext,
        raw: Vec<u8>,
    ) -> Result<IngressOutcome, EngineError> {
        let ack_mode = ctx.host_settings().get_or("AckMode", "Immediate");
        let view = ParsedView::new(raw.clone());
        let errors = validate_structure(&view);

        let reply = if ack_mode.eq_ignore_ascii_case("Never") {
            None
        } else if errors.is_empty() {
            Some(build_ack(&view, AckCode::AA, "Message accepted"))
        } else if errors.iter().any(|e| e.contains("missing MSH")) {
            Some(build_ack(&view, AckCode::AR, &errors.join("; ")))
        } else {
            Some(build_ack(&view, AckCode::AE, &errors.join("; ")))
        };

        let mut message = Message::create(raw, "application/hl7-v2+er7", ctx.name());
        if let Some(message_type) = view.message_type() {
            message.envelope.message_type = message_type;
        }
        if !errors.is_empty() {
            message = message.with_property(
                VALIDATION_ERRORS_PROPERTY,
                PropertyValue::String(errors.join("; ")),
                None,
            )?;
        }

        debug!(
            host = ctx.name(),
            message_type = %message.envelope.message_type,
            control_id = view.message_control_id().as_deref().unwrap_or(""),
            valid = errors.is_empty(),
            "hl7 message received"
        );

        Ok(IngressOutcome {
            message: Some(message),
            reply,
        })
    }

    async fn on_message(
        &self,
        ctx: &HostContext,
        message: Message,
    ) -> Result<Option<Message>, EngineError> {
        if message.payload.property(VALIDATION_ERRORS_PROPERTY).is_some() {
            let handler = ctx.host_settings().get_str("BadMessageHandler");
            match handler {
                Some(handler) if !handler.is_empty() => {
                    warn!(
                        host = ctx.name(),
                        handler = %handler,
                        "routing invalid message to bad-message handler"
                    );
                    ctx.send_to_target(&handler, message.derive(ctx.name())).await?;
                }
                _ => {
                    warn!(host = ctx.name(), "invalid message dropped");
                }
            }
            return Ok(None);
        }
        // Valid messages flow to the configured targets via runtime fan-out.
        Ok(Some(message))
    }
}

/// Outbound HL7 v2 operation over MLLP/TCP.
///
/// Dispatches each message through the outbound adapter, parses the
/// returned ACK's `MSA-1`, and applies the `ReplyCodeActions` state
/// machine: success completes the work, `F` fails it permanently, `R`
/// raises the retry signal, `W` logs and succeeds.
pub struct Hl7MllpOperation;

impl Hl7MllpOperation {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Hl7MllpOperation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostBehavior for Hl7MllpOperation {
    fn kind(&self) -> HostKind {
        HostKind::Operation
    }

    fn adapter_spec(&self) -> AdapterSpec {
        AdapterSpec::MllpOutbound
    }

    fn runtime_fanout(&self) -> bool {
        false
    }

    async fn on_message(
        &self,
        ctx: &HostContext,
        message: Message,
    ) -> Result<Option<Message>, EngineError> {
        let actions = ReplyCodeActions::parse(
            &ctx.host_settings().get_or("ReplyCodeActions", ""),
        )?;

        let message_type = if message.envelope.message_type.is_empty() {
            None
        } else {
            Some(message.envelope.message_type.clone())
        };

        let ack_bytes = ctx
            .outbound()?
            .send(message.raw(), message_type.as_deref())
            .await?;

        let ack_view = ParsedView::new(ack_bytes.clone());
        let ack_code = ack_view.get_field_or("MSA-1", "AA");
        let action = actions.action_for(&ack_code);

        debug!(
            host = ctx.name(),
            message_id = %message.envelope.message_id,
            ack_code = %ack_code,
            action = ?action,
            "hl7 message sent"
        );

        match action {
            AckAction::Success => {}
            AckAction::Warn => {
                warn!(host = ctx.name(), ack_code = %ack_code, "ack mapped to warning");
            }
            AckAction::Fail => {
                return Err(EngineError::Send {
                    reason: format!("ack code {ack_code} mapped to fail"),
                });
            }
            AckAction::Retry => {
                return Err(EngineError::RetrySignal {
                    reason: format!("ack code {ack_code} mapped to retry"),
                });
            }
        }

        let result = message
            .derive(ctx.name())
            .with_payload(ack_bytes)
            .with_state(MessageState::Delivered);
        Ok(Some(result))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::adapter::{Adapter, AdapterMetricsSnapshot, AdapterState, OutboundAdapter};
    use crate::broker::ServiceRegistry;
    use crate::config::Settings;
    use std::sync::Arc;

    const ADT: &[u8] = b"MSH|^~\\&|SRC|F1|DST|F2|20240115120000||ADT^A01|MSG001|P|2.4\rPID|1||12345||DOE^JOHN\r";

    fn ctx_with(settings: &[(&str, &str)], outbound: Option<Arc<dyn OutboundAdapter>>) -> HostContext {
        let mut host_settings = Settings::new();
        for (key, value) in settings {
            host_settings.set(*key, *value);
        }
        HostContext {
            name: "H".to_string(),
            kind: HostKind::Service,
            host_settings,
            adapter_settings: Settings::new(),
            targets: Vec::new(),
            registry: Some(ServiceRegistry::new()),
            outbound,
            class_registry: None,
            store: None,
        }
    }

    /// Outbound stub replying with a fixed ACK code.
    struct StubOutbound {
        ack_code: &'static str,
    }

    #[async_trait]
    impl Adapter for StubOutbound {
        fn kind(&self) -> &'static str {
            "stub"
        }
        fn state(&self) -> AdapterState {
            AdapterState::Running
        }
        fn metrics(&self) -> AdapterMetricsSnapshot {
            crate::adapter::AdapterMetrics::default().snapshot()
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        async fn start(&self) -> Result<(), EngineError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[async_trait]
    impl OutboundAdapter for StubOutbound {
        async fn send(
            &self,
            _payload: &[u8],
            _message_type: Option<&str>,
        ) -> Result<Vec<u8>, EngineError> {
            Ok(format!("MSH|^~\\&|DST|F2|SRC|F1|20240115||ACK^A01|X1|P|2.4\rMSA|{}|MSG001|text\r", self.ack_code).into_bytes())
        }
    }

    #[tokio::test]
    async fn test_service_ingress_generates_aa_ack() {
        let ctx = ctx_with(&[], None);
        let service = Hl7MllpService::new();
        let outcome = service.on_ingress(&ctx, ADT.to_vec()).await.unwrap();

        let ack_view = ParsedView::new(outcome.reply.unwrap());
        assert_eq!(ack_view.get_field("MSA-1").as_deref(), Some("AA"));
        // MSA-2 must echo the inbound control id.
        assert_eq!(ack_view.get_field("MSA-2").as_deref(), Some("MSG001"));

        let message = outcome.message.unwrap();
        assert_eq!(message.envelope.message_type, "ADT_A01");
        assert!(message.payload.property(VALIDATION_ERRORS_PROPERTY).is_none());
    }

    #[tokio::test]
    async fn test_service_ingress_flags_invalid_message() {
        // Missing MSH-10 control id.
        let raw = b"MSH|^~\\&|SRC|F1|DST|F2|20240115||ADT^A01||P|2.4\r".to_vec();
        let ctx = ctx_with(&[], None);
        let service = Hl7MllpService::new();
        let outcome = service.on_ingress(&ctx, raw).await.unwrap();

        let ack_view = ParsedView::new(outcome.reply.unwrap());
        assert_eq!(ack_view.get_field("MSA-1").as_deref(), Some("AE"));
        assert!(outcome
            .message
            .unwrap()
            .payload
            .property(VALIDATION_ERRORS_PROPERTY)
            .is_some());
    }

    #[tokio::test]
    async fn test_service_ingress_rejects_garbage_with_ar() {
        let ctx = ctx_with(&[], None);
        let service = Hl7MllpService::new();
        let outcome = service.on_ingress(&ctx, b"not an hl7 message".to_vec()).await.unwrap();

        let ack_view = ParsedView::new(outcome.reply.unwrap());
        assert_eq!(ack_view.get_field("MSA-1").as_deref(), Some("AR"));
    }

    #[tokio::test]
    async fn test_service_ack_mode_never() {
        let ctx = ctx_with(&[("AckMode", "Never")], None);
        let service = Hl7MllpService::new();
        let outcome = service.on_ingress(&ctx, ADT.to_vec()).await.unwrap();
        assert!(outcome.reply.is_none());
        assert!(outcome.message.is_some());
    }

    #[tokio::test]
    async fn test_service_drops_invalid_without_handler() {
        let ctx = ctx_with(&[], None);
        let service = Hl7MllpService::new();
        let message = Message::create(b"x".to_vec(), "application/hl7-v2+er7", "H")
            .with_property(
                VALIDATION_ERRORS_PROPERTY,
                PropertyValue::String("bad".into()),
                None,
            )
            .unwrap();
        let result = service.on_message(&ctx, message).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_operation_success_on_aa() {
        let ctx = ctx_with(
            &[("ReplyCodeActions", ":?R=F,:?E=S,:*=S")],
            Some(Arc::new(StubOutbound { ack_code: "AA" })),
        );
        let operation = Hl7MllpOperation::new();
        let message = Message::create(ADT.to_vec(), "application/hl7-v2+er7", "H");

        let result = operation.on_message(&ctx, message).await.unwrap().unwrap();
        assert_eq!(result.envelope.state, MessageState::Delivered);
        let view = ParsedView::new(result.raw().to_vec());
        assert_eq!(view.get_field("MSA-1").as_deref(), Some("AA"));
    }

    #[tokio::test]
    async fn test_operation_error_code_mapped_to_success() {
        // ":?E=S": application errors are logged and accepted.
        let ctx = ctx_with(
            &[("ReplyCodeActions", ":?R=F,:?E=S,:*=S")],
            Some(Arc::new(StubOutbound { ack_code: "AE" })),
        );
        let operation = Hl7MllpOperation::new();
        let message = Message::create(ADT.to_vec(), "application/hl7-v2+er7", "H");
        assert!(operation.on_message(&ctx, message).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_operation_reject_code_fails() {
        let ctx = ctx_with(
            &[("ReplyCodeActions", ":?R=F,:?E=S,:*=S")],
            Some(Arc::new(StubOutbound { ack_code: "AR" })),
        );
        let operation = Hl7MllpOperation::new();
        let message = Message::create(ADT.to_vec(), "application/hl7-v2+er7", "H");
        let err = operation.on_message(&ctx, message).await.unwrap_err();
        assert!(matches!(err, EngineError::Send { .. }));

        let ctx = ctx_with(
            &[("ReplyCodeActions", ":?R=F,:?E=S,:*=S")],
            Some(Arc::new(StubOutbound { ack_code: "CR" })),
        );
        let message = Message::create(ADT.to_vec(), "application/hl7-v2+er7", "H");
        let err = operation.on_message(&ctx, message).await.unwrap_err();
        assert!(matches!(err, EngineError::Send { .. }));
    }

    #[tokio::test]
    async fn test_operation_retry_signal() {
        let ctx = ctx_with(
            &[("ReplyCodeActions", ":AE=R")],
            Some(Arc::new(StubOutbound { ack_code: "AE" })),
        );
        let operation = Hl7MllpOperation::new();
        let message = Message::create(ADT.to_vec(), "application/hl7-v2+er7", "H");
        let err = operation.on_message(&ctx, message).await.unwrap_err();
        assert!(matches!(err, EngineError::RetrySignal { .. }));
    }

    #[tokio::test]
    async fn test_operation_default_actions_accept_everything() {
        let ctx = ctx_with(&[], Some(Arc::new(StubOutbound { ack_code: "CE" })));
        let operation = Hl7MllpOperation::new();
        let message = Message::create(ADT.to_vec(), "application/hl7-v2+er7", "H");
        assert!(operation.on_message(&ctx, message).await.unwrap().is_some());
    }
}
