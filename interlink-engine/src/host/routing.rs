//! Routing process: content-based fan-out driven by the rule engine.

// Layer 1: Standard library imports
use std::collections::BTreeMap;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::behavior::{HostBehavior, HostContext};
use super::types::HostKind;
use crate::error::EngineError;
use crate::hl7::ParsedView;
use crate::message::Message;
use crate::registry::BuildContext;
use crate::routing::{RoutingResult, RuleAction, RuleSet, ValidationMode};
use crate::store::MessageRecord;

/// A process that passes messages through unchanged, fanning out to
/// `TargetConfigNames` via the runtime.
pub struct PassthroughProcess;

impl PassthroughProcess {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PassthroughProcess {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostBehavior for PassthroughProcess {
    fn kind(&self) -> HostKind {
        HostKind::Process
    }

    async fn on_message(
        &self,
        _ctx: &HostContext,
        message: Message,
    ) -> Result<Option<Message>, EngineError> {
        Ok(Some(message))
    }
}

/// Rule-driven routing process.
///
/// Evaluates the rule list in priority order against the HL7 parsed view of
/// each message; the first matching enabled rule decides the outcome. With
/// no match, `TargetConfigNames` acts as a synthetic `default` send rule;
/// with neither, the no-match is recorded and the message dropped.
///
/// Settings: `Validation` (`None` | `Warn` | `Error`), `BadMessageHandler`,
/// `RuleNames` (comma-separated filter over the production's rule list;
/// absent means all rules).
pub struct RoutingProcess {
    rules: RuleSet,
}

impl RoutingProcess {
    /// Build from the production's rules, honouring the `RuleNames` filter.
    pub fn from_build(build: &BuildContext) -> Result<Self, EngineError> {
        let filter = build.item.host_settings.get_list("RuleNames");
        let selected: Vec<_> = if filter.is_empty() {
            build.rules.clone()
        } else {
            build
                .rules
                .iter()
                .filter(|r| filter.contains(&r.name))
                .cloned()
                .collect()
        };
        Ok(Self {
            rules: RuleSet::from_configs(&selected)?,
        })
    }

    /// Build with an explicit rule set (used by tests and embedders).
    pub fn with_rules(rules: RuleSet) -> Self {
        Self { rules }
    }

    fn validation_mode(ctx: &HostContext) -> ValidationMode {
        ctx.host_settings()
            .get_str("Validation")
            .and_then(|s| s.parse().ok())
            .unwrap_or(ValidationMode::None)
    }

    async fn record_outcome(
        ctx: &HostContext,
        message: &Message,
        result: &RoutingResult,
    ) {
        let Some(store) = ctx.store() else {
            return;
        };
        let mut record = MessageRecord::from_message(ctx.name(), message);
        let mut metadata = BTreeMap::new();
        if let Some(rule_name) = &result.rule_name {
            metadata.insert("rule".to_string(), rule_name.clone());
        }
        let outcome = match (result.matched, result.action) {
            (false, _) => "no_match".to_string(),
            (true, Some(action)) => format!("{action:?}").to_lowercase(),
            (true, None) => "matched".to_string(),
        };
        metadata.insert("routing_outcome".to_string(), outcome);
        if !result.targets.is_empty() {
            metadata.insert("targets".to_string(), result.targets.join(","));
        }
        record.metadata = metadata;
        if let Err(e) = store.store(record).await {
            warn!(host = ctx.name(), error = %e, "routing audit store failed");
        }
    }

    async fn handle_invalid(
        &self,
        ctx: &HostContext,
        message: Message,
        errors: &str,
    ) -> Result<Option<Message>, EngineError> {
        match ctx.host_settings().get_str("BadMessageHandler") {
            Some(handler) if !handler.is_empty() => {
                warn!(
                    host = ctx.name(),
                    handler = %handler,
                    errors,
                    "invalid message handed to bad-message handler"
                );
                ctx.send_to_target(&handler, message.derive(ctx.name())).await?;
            }
            _ => {
                warn!(host = ctx.name(), errors, "invalid message dropped");
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl HostBehavior for RoutingProcess {
    fn kind(&self) -> HostKind {
        HostKind::Process
    }

    // Rule outcomes drive the fan-out here, not the runtime.
    fn runtime_fanout(&self) -> bool {
        false
    }

    async fn on_message(
        &self,
        ctx: &HostContext,
        message: Message,
    ) -> Result<Option<Message>, EngineError> {
        let view = ParsedView::new(message.raw().to_vec());

        // Validation per the configured mode.
        let structural_ok = view.get_segment("MSH", 0).is_some();
        if !structural_ok {
            match Self::validation_mode(ctx) {
                ValidationMode::None => {}
                ValidationMode::Warn => {
                    warn!(host = ctx.name(), "validation warning: missing MSH segment");
                }
                ValidationMode::Error => {
                    return self.handle_invalid(ctx, message, "missing MSH segment").await;
                }
            }
        }

        let result = self.rules.evaluate(&view, ctx.targets());
        debug!(
            host = ctx.name(),
            message_type = view.message_type().as_deref().unwrap_or(""),
            matched = result.matched,
            rule = result.rule_name.as_deref().unwrap_or(""),
            targets = ?result.targets,
            "routing evaluated"
        );

        Self::record_outcome(ctx, &message, &result).await;

        if !result.matched {
            warn!(
                host = ctx.name(),
                message_id = %message.envelope.message_id,
                "no routing rule matched, message dropped"
            );
            return Ok(None);
        }

        match result.action {
            Some(RuleAction::Delete) => {
                debug!(host = ctx.name(), rule = result.rule_name.as_deref().unwrap_or(""), "message deleted by rule");
                Ok(None)
            }
            Some(RuleAction::Send) | Some(RuleAction::Transform) => {
                // Transform (when configured) applies before the send.
                let outbound = match &result.transform {
                    Some(transform_id) => {
                        let transform = ctx.transform(transform_id)?;
                        transform.apply(&message)?
                    }
                    None => message.clone(),
                };

                let mut routed = outbound.derive(ctx.name());
                routed.envelope.routing.route_id = result.rule_name.clone();
                for target in &result.targets {
                    let mut per_target = routed.clone();
                    per_target.envelope.message_id = uuid::Uuid::new_v4();
                    per_target.envelope.routing.destination = Some(target.clone());
                    ctx.send_to_target(target, per_target).await?;
                }
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::broker::{HostEnvelope, HostPort, ServiceRegistry, WorkItem};
    use crate::config::Settings;
    use crate::queue::ManagedQueue;
    use crate::routing::RoutingRule;
    use std::sync::Arc;

    const ADT_A01: &[u8] = b"MSH|^~\\&|SRC|F1|DST|F2|20240115||ADT^A01|M1|P|2.4\rPID|1||12345\r";
    const ORU_R01: &[u8] = b"MSH|^~\\&|SRC|F1|DST|F2|20240115||ORU^R01|M2|P|2.4\r";
    const ADT_A03: &[u8] = b"MSH|^~\\&|SRC|F1|DST|F2|20240115||ADT^A03|M3|P|2.4\r";

    struct SinkPort {
        name: String,
        queue: ManagedQueue<WorkItem>,
    }

    #[async_trait]
    impl HostPort for SinkPort {
        fn name(&self) -> &str {
            &self.name
        }
        async fn submit_envelope(&self, envelope: HostEnvelope) -> bool {
            self.queue.put(WorkItem::from_envelope(envelope)).await
        }
    }

    fn sink(registry: &ServiceRegistry, name: &str) -> ManagedQueue<WorkItem> {
        let queue = ManagedQueue::fifo(16);
        registry
            .register(
                name,
                Arc::new(SinkPort {
                    name: name.to_string(),
                    queue: queue.clone(),
                }),
            )
            .unwrap();
        queue
    }

    fn router_ctx(registry: ServiceRegistry, settings: &[(&str, &str)], targets: &str) -> HostContext {
        let mut host_settings = Settings::new();
        for (key, value) in settings {
            host_settings.set(*key, *value);
        }
        if !targets.is_empty() {
            host_settings.set("TargetConfigNames", targets);
        }
        HostContext {
            name: "HL7.Router".to_string(),
            kind: HostKind::Process,
            host_settings: host_settings.clone(),
            adapter_settings: Settings::new(),
            targets: host_settings.get_list("TargetConfigNames"),
            registry: Some(registry),
            outbound: None,
            class_registry: None,
            store: None,
        }
    }

    fn trigger_rules() -> RuleSet {
        let mut rules = RuleSet::new();
        rules.add_rule(RoutingRule::send(
            "R1",
            r#"{MSH-9.1} = "ADT" AND {MSH-9.2} = "A01""#,
            "PAS",
        ));
        rules.add_rule(RoutingRule::send("R2", r#"{MSH-9.1} = "ORU""#, "LAB"));
        rules
    }

    #[tokio::test]
    async fn test_routing_by_trigger() {
        let registry = ServiceRegistry::new();
        let pas = sink(&registry, "PAS");
        let lab = sink(&registry, "LAB");
        let ctx = router_ctx(registry, &[], "");
        let router = RoutingProcess::with_rules(trigger_rules());

        let adt = Message::create(ADT_A01.to_vec(), "application/hl7-v2+er7", "src");
        router.on_message(&ctx, adt).await.unwrap();
        assert_eq!(pas.len(), 1);
        assert_eq!(lab.len(), 0);

        let oru = Message::create(ORU_R01.to_vec(), "application/hl7-v2+er7", "src");
        router.on_message(&ctx, oru).await.unwrap();
        assert_eq!(lab.len(), 1);
    }

    #[tokio::test]
    async fn test_no_match_without_default_drops() {
        let registry = ServiceRegistry::new();
        let pas = sink(&registry, "PAS");
        let _lab = sink(&registry, "LAB");
        let ctx = router_ctx(registry, &[], "");
        let router = RoutingProcess::with_rules(trigger_rules());

        let a03 = Message::create(ADT_A03.to_vec(), "application/hl7-v2+er7", "src");
        let result = router.on_message(&ctx, a03).await.unwrap();
        assert!(result.is_none());
        assert_eq!(pas.len(), 0);
    }

    #[tokio::test]
    async fn test_default_targets_used_as_synthetic_rule() {
        let registry = ServiceRegistry::new();
        let fallback = sink(&registry, "FALLBACK");
        let _pas = sink(&registry, "PAS");
        let _lab = sink(&registry, "LAB");
        let ctx = router_ctx(registry, &[], "FALLBACK");
        let router = RoutingProcess::with_rules(trigger_rules());

        let a03 = Message::create(ADT_A03.to_vec(), "application/hl7-v2+er7", "src");
        router.on_message(&ctx, a03).await.unwrap();
        assert_eq!(fallback.len(), 1);

        let item = fallback.try_get().unwrap();
        assert_eq!(item.message.envelope.routing.route_id.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_routed_message_is_derived() {
        let registry = ServiceRegistry::new();
        let pas = sink(&registry, "PAS");
        let ctx = router_ctx(registry, &[], "");
        let router = RoutingProcess::with_rules(trigger_rules());

        let adt = Message::create(ADT_A01.to_vec(), "application/hl7-v2+er7", "src");
        let parent_id = adt.envelope.message_id;
        let correlation = adt.envelope.correlation_id;
        router.on_message(&ctx, adt).await.unwrap();

        let item = pas.try_get().unwrap();
        assert_ne!(item.message.envelope.message_id, parent_id);
        assert_eq!(item.message.envelope.correlation_id, correlation);
        assert_eq!(item.message.envelope.routing.route_id.as_deref(), Some("R1"));
        assert_eq!(item.message.envelope.routing.destination.as_deref(), Some("PAS"));
    }

    #[tokio::test]
    async fn test_delete_action_drops() {
        let registry = ServiceRegistry::new();
        let _pas = sink(&registry, "PAS");
        let ctx = router_ctx(registry, &[], "");

        let mut rules = RuleSet::new();
        rules.add_rule(RoutingRule {
            name: "discard-acks".into(),
            priority: 0,
            condition: r#"{MSH-9.1} = "ADT""#.into(),
            action: RuleAction::Delete,
            targets: vec![],
            transform: None,
            enabled: true,
        });
        let router = RoutingProcess::with_rules(rules);

        let adt = Message::create(ADT_A01.to_vec(), "application/hl7-v2+er7", "src");
        let result = router.on_message(&ctx, adt).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_validation_error_mode_uses_bad_handler() {
        let registry = ServiceRegistry::new();
        let quarantine = sink(&registry, "QUARANTINE");
        let ctx = router_ctx(
            registry,
            &[("Validation", "Error"), ("BadMessageHandler", "QUARANTINE")],
            "",
        );
        let router = RoutingProcess::with_rules(trigger_rules());

        let garbage = Message::create(b"garbage".to_vec(), "text/plain", "src");
        let result = router.on_message(&ctx, garbage).await.unwrap();
        assert!(result.is_none());
        assert_eq!(quarantine.len(), 1);
    }

    #[tokio::test]
    async fn test_validation_warn_mode_continues() {
        let registry = ServiceRegistry::new();
        let fallback = sink(&registry, "FALLBACK");
        let ctx = router_ctx(registry, &[("Validation", "Warn")], "FALLBACK");
        let router = RoutingProcess::with_rules(RuleSet::new());

        let garbage = Message::create(b"garbage".to_vec(), "text/plain", "src");
        router.on_message(&ctx, garbage).await.unwrap();
        // Warn logs but still routes through the default.
        assert_eq!(fallback.len(), 1);
    }

    #[tokio::test]
    async fn test_multi_target_rule_fans_out_to_each() {
        let registry = ServiceRegistry::new();
        let a = sink(&registry, "A");
        let b = sink(&registry, "B");
        let ctx = router_ctx(registry, &[], "");

        let mut rules = RuleSet::new();
        rules.add_rule(RoutingRule {
            name: "broadcast".into(),
            priority: 0,
            condition: String::new(),
            action: RuleAction::Send,
            targets: vec!["A".into(), "B".into()],
            transform: None,
            enabled: true,
        });
        let router = RoutingProcess::with_rules(rules);

        let adt = Message::create(ADT_A01.to_vec(), "application/hl7-v2+er7", "src");
        router.on_message(&ctx, adt).await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);

        // Each target gets a distinct derived message id.
        let item_a = a.try_get().unwrap();
        let item_b = b.try_get().unwrap();
        assert_ne!(
            item_a.message.envelope.message_id,
            item_b.message.envelope.message_id
        );
        assert_eq!(
            item_a.message.envelope.correlation_id,
            item_b.message.envelope.correlation_id
        );
    }
}
