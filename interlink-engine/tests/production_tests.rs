//! End-to-end production tests: MLLP acceptance, rule routing, reply-code
//! handling, WAL recovery, and supervised restart.

#![allow(clippy::unwrap_used, clippy::expect_used)]

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

// Layer 3: Internal module imports
use interlink_engine::adapter::MllpInboundAdapter;
use interlink_engine::config::{ItemConfig, ProductionConfig, RuleConfig};
use interlink_engine::engine::{EngineConfig, ProductionEngine};
use interlink_engine::error::EngineError;
use interlink_engine::health::HealthStatus;
use interlink_engine::hl7::{mllp, ParsedView};
use interlink_engine::host::{HostBehavior, HostContext, HostKind, HostState};
use interlink_engine::message::Message;
use interlink_engine::wal::{SyncMode, Wal, WalConfig};

const ADT_A01: &[u8] =
    b"MSH|^~\\&|SRC|F1|DST|F2|20240115120000||ADT^A01|MSG001|P|2.4\rPID|1||12345||DOE^JOHN\r";
const ORU_R01: &[u8] = b"MSH|^~\\&|SRC|F1|DST|F2|20240115120000||ORU^R01|MSG002|P|2.4\r";
const ADT_A03: &[u8] = b"MSH|^~\\&|SRC|F1|DST|F2|20240115120000||ADT^A03|MSG003|P|2.4\r";

/// Test sink: records every message it processes.
struct CaptureBehavior {
    kind: HostKind,
    seen: Arc<Mutex<Vec<Message>>>,
}

#[async_trait]
impl HostBehavior for CaptureBehavior {
    fn kind(&self) -> HostKind {
        self.kind
    }

    fn runtime_fanout(&self) -> bool {
        false
    }

    async fn on_message(
        &self,
        _ctx: &HostContext,
        message: Message,
    ) -> Result<Option<Message>, EngineError> {
        self.seen.lock().push(message);
        Ok(None)
    }
}

/// Register a capture class under `custom.test.<name>` and return its sink.
fn register_capture(
    engine: &ProductionEngine,
    class: &str,
    kind: HostKind,
) -> Arc<Mutex<Vec<Message>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    engine
        .class_registry()
        .register_host(
            class,
            Arc::new(move |_build| {
                Ok(Arc::new(CaptureBehavior {
                    kind,
                    seen: Arc::clone(&sink),
                }) as Arc<dyn HostBehavior>)
            }),
        )
        .unwrap();
    seen
}

async fn wait_until<F: Fn() -> bool>(what: F, millis: u64) -> bool {
    for _ in 0..(millis / 20).max(1) {
        if what() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    what()
}

fn mllp_service_item(name: &str, targets: &str) -> ItemConfig {
    let mut item = ItemConfig::new(name, "li.hosts.Hl7MllpService");
    item.adapter_settings.set("Port", 0i64);
    item.adapter_settings.set("Host", "127.0.0.1");
    if !targets.is_empty() {
        item.host_settings.set("TargetConfigNames", targets);
    }
    item
}

fn bound_port(engine: &ProductionEngine, host: &str) -> u16 {
    let host = engine.get_host(host).unwrap();
    let adapter = host.adapter().unwrap();
    adapter
        .as_any()
        .downcast_ref::<MllpInboundAdapter>()
        .unwrap()
        .bound_port()
}

// ADT^A01 acceptance with no targets: the ACK echoes MSH-10
// with MSA-1 = AA and the service metrics advance.
#[tokio::test]
async fn test_adt_acceptance_over_mllp() {
    let engine = ProductionEngine::new(EngineConfig::ephemeral());
    let mut config = ProductionConfig::new("Accept.Production");
    config.items.push(mllp_service_item("HL7.In.TCP", ""));
    engine.load_config(config).unwrap();
    engine.start().await.unwrap();

    let port = bound_port(&engine, "HL7.In.TCP");
    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    client.write_all(&mllp::wrap(ADT_A01)).await.unwrap();

    let ack = mllp::read_frame(&mut client, Some(Duration::from_secs(2)))
        .await
        .unwrap()
        .unwrap();
    let ack_view = ParsedView::new(ack);
    assert_eq!(ack_view.get_field("MSA-1").as_deref(), Some("AA"));
    assert_eq!(ack_view.get_field("MSA-2").as_deref(), Some("MSG001"));
    assert_eq!(ack_view.get_field("MSH-9").as_deref(), Some("ACK^A01"));
    // Endpoints swapped relative to the inbound message.
    assert_eq!(ack_view.sending_application().as_deref(), Some("DST"));
    assert_eq!(ack_view.receiving_application().as_deref(), Some("SRC"));

    let host = engine.get_host("HL7.In.TCP").unwrap();
    assert!(
        wait_until(
            || {
                let m = host.metrics_snapshot();
                m.messages_received >= 1 && m.messages_processed >= 1
            },
            2000
        )
        .await
    );

    engine.stop().await.unwrap();
}

// Routing by trigger event: ADT^A01 goes to PAS, ORU^R01 to
// LAB, and ADT^A03 matches nothing and is dropped.
#[tokio::test]
async fn test_routing_by_trigger_through_production() {
    let engine = ProductionEngine::new(EngineConfig::ephemeral());
    let pas_seen = register_capture(&engine, "custom.test.PasCapture", HostKind::Operation);
    let lab_seen = register_capture(&engine, "custom.test.LabCapture", HostKind::Operation);

    let mut config = ProductionConfig::new("Routing.Production");
    config.items.push(ItemConfig::new("PAS", "custom.test.PasCapture"));
    config.items.push(ItemConfig::new("LAB", "custom.test.LabCapture"));
    config
        .items
        .push(ItemConfig::new("HL7.Router", "li.hosts.RoutingProcess"));
    config.rules = vec![
        RuleConfig {
            name: "R1".into(),
            priority: 10,
            condition: r#"{MSH-9.1} = "ADT" AND {MSH-9.2} = "A01""#.into(),
            action: "send".into(),
            targets: vec!["PAS".into()],
            transform: None,
            enabled: true,
        },
        RuleConfig {
            name: "R2".into(),
            priority: 20,
            condition: r#"{MSH-9.1} = "ORU""#.into(),
            action: "send".into(),
            targets: vec!["LAB".into()],
            transform: None,
            enabled: true,
        },
    ];
    engine.load_config(config).unwrap();
    engine.start().await.unwrap();

    let router = engine.get_host("HL7.Router").unwrap();
    for raw in [ADT_A01, ORU_R01, ADT_A03] {
        assert!(
            router
                .submit(Message::create(raw.to_vec(), "application/hl7-v2+er7", "test"))
                .await
        );
    }

    assert!(wait_until(|| pas_seen.lock().len() == 1, 2000).await);
    assert!(wait_until(|| lab_seen.lock().len() == 1, 2000).await);

    // The A03 matched no rule and there is no default: nothing extra arrives.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pas_seen.lock().len(), 1);
    assert_eq!(lab_seen.lock().len(), 1);

    let pas_view = ParsedView::new(pas_seen.lock()[0].raw().to_vec());
    assert_eq!(pas_view.get_field("MSH-9.2").as_deref(), Some("A01"));
    let lab_view = ParsedView::new(lab_seen.lock()[0].raw().to_vec());
    assert_eq!(lab_view.get_field("MSH-9.1").as_deref(), Some("ORU"));

    engine.stop().await.unwrap();
}

// Full pipeline: service -> router -> operation,
// with the operation delivering to a mock downstream MLLP peer.
#[tokio::test]
async fn test_service_router_operation_pipeline() {
    // Downstream peer acknowledging everything with AA.
    let downstream = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let downstream_port = downstream.local_addr().unwrap().port();
    let received = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
    let received_in_peer = Arc::clone(&received);
    tokio::spawn(async move {
        let (mut stream, _) = downstream.accept().await.unwrap();
        while let Ok(Some(payload)) =
            mllp::read_frame(&mut stream, Some(Duration::from_secs(5))).await
        {
            let view = ParsedView::new(payload.clone());
            let control_id = view.message_control_id().unwrap_or_default();
            received_in_peer.lock().push(payload);
            let ack = format!(
                "MSH|^~\\&|PAS|F9|SRC|F1|20240115||ACK^A01|A1|P|2.4\rMSA|AA|{control_id}|ok\r"
            );
            stream.write_all(&mllp::wrap(ack.as_bytes())).await.unwrap();
        }
    });

    let engine = ProductionEngine::new(EngineConfig::ephemeral());
    let mut config = ProductionConfig::new("Pipeline.Production");
    config
        .items
        .push(mllp_service_item("HL7.In.TCP", "HL7.Router"));
    config
        .items
        .push(ItemConfig::new("HL7.Router", "li.hosts.RoutingProcess"));
    let mut operation = ItemConfig::new("HL7.Out.PAS", "li.hosts.Hl7MllpOperation");
    operation.adapter_settings.set("IPAddress", "127.0.0.1");
    operation
        .adapter_settings
        .set("Port", i64::from(downstream_port));
    operation.adapter_settings.set("AckTimeout", 2i64);
    operation
        .host_settings
        .set("ReplyCodeActions", ":?R=F,:?E=S,:*=S");
    config.items.push(operation);
    config.rules = vec![RuleConfig {
        name: "ADT".into(),
        priority: 10,
        condition: r#"{MSH-9.1} = "ADT""#.into(),
        action: "send".into(),
        targets: vec!["HL7.Out.PAS".into()],
        transform: None,
        enabled: true,
    }];
    engine.load_config(config).unwrap();
    engine.start().await.unwrap();

    let port = bound_port(&engine, "HL7.In.TCP");
    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    client.write_all(&mllp::wrap(ADT_A01)).await.unwrap();
    let ack = mllp::read_frame(&mut client, Some(Duration::from_secs(2)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ParsedView::new(ack).get_field("MSA-1").as_deref(), Some("AA"));

    // The message traverses the production and reaches the peer.
    assert!(wait_until(|| received.lock().len() == 1, 3000).await);
    let delivered = ParsedView::new(received.lock()[0].clone());
    assert_eq!(delivered.get_field("MSH-10").as_deref(), Some("MSG001"));

    let operation = engine.get_host("HL7.Out.PAS").unwrap();
    assert!(
        wait_until(|| operation.metrics_snapshot().messages_sent == 1, 2000).await
    );

    engine.stop().await.unwrap();
}

// WAL recovery: entries pending/processing at crash time are
// re-delivered after restart; completed entries are not.
#[tokio::test]
async fn test_wal_recovery_redelivers_pending() {
    let wal_dir = tempfile::TempDir::new().unwrap();

    // First run: three entries in the states [pending, processing, completed],
    // then a simulated crash (no checkpoint, no graceful stop).
    {
        let wal = Wal::new(WalConfig {
            directory: wal_dir.path().to_path_buf(),
            sync_mode: SyncMode::Fsync,
            ..WalConfig::default()
        });
        wal.start().await.unwrap();
        let _m1 = wal
            .append("Worklist", "m1", b"payload-1".to_vec(), None)
            .await
            .unwrap();
        let m2 = wal
            .append("Worklist", "m2", b"payload-2".to_vec(), None)
            .await
            .unwrap();
        let m3 = wal
            .append("Worklist", "m3", b"payload-3".to_vec(), None)
            .await
            .unwrap();
        wal.mark_processing(&m2).await.unwrap();
        wal.complete(&m3).await.unwrap();
        // Crash: the Wal value is dropped without stop().
    }

    // Second run: a production with a host named like the entries' owner.
    let mut engine_config = EngineConfig::ephemeral();
    engine_config.wal_enabled = true;
    engine_config.wal_directory = wal_dir.path().to_path_buf();

    let engine = ProductionEngine::new(engine_config);
    let seen = register_capture(&engine, "custom.test.WorklistCapture", HostKind::Process);
    let mut config = ProductionConfig::new("Recovery.Production");
    config
        .items
        .push(ItemConfig::new("Worklist", "custom.test.WorklistCapture"));
    engine.load_config(config).unwrap();
    engine.start().await.unwrap();

    assert!(wait_until(|| seen.lock().len() == 2, 3000).await);
    let mut payloads: Vec<Vec<u8>> = seen.lock().iter().map(|m| m.raw().to_vec()).collect();
    payloads.sort();
    assert_eq!(payloads, vec![b"payload-1".to_vec(), b"payload-2".to_vec()]);

    // Both re-delivered entries complete; nothing remains pending.
    let wal = engine.wal().unwrap();
    let mut settled = false;
    for _ in 0..150 {
        if wal.pending_count().await == 0 && wal.processing_count().await == 0 {
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(settled, "recovered entries never completed");

    engine.stop().await.unwrap();
}

// Supervised restart: three induced failures are restarted;
// the fourth is not, restart_count stays at MaxRestarts, and health
// reports the production unhealthy.
#[tokio::test]
async fn test_supervised_restart_bounded() {
    let engine = ProductionEngine::new(EngineConfig::ephemeral());
    let mut config = ProductionConfig::new("Supervised.Production");
    let mut item = ItemConfig::new("H", "li.hosts.PassthroughProcess");
    item.host_settings.set("RestartPolicy", "on_failure");
    item.host_settings.set("MaxRestarts", 3i64);
    item.host_settings.set("RestartDelay", "0.05");
    config.items.push(item);
    engine.load_config(config).unwrap();
    engine.start().await.unwrap();

    let host = engine.get_host("H").unwrap();

    for round in 1..=3u32 {
        host.force_state(HostState::Error);
        assert!(
            wait_until(|| host.state() == HostState::Running, 3000).await,
            "restart {round} did not happen"
        );
        assert_eq!(host.metrics_snapshot().restart_count, round);
    }

    // Fourth failure: the monitor must not restart again.
    host.force_state(HostState::Error);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(host.state(), HostState::Error);
    assert_eq!(host.metrics_snapshot().restart_count, 3);

    // The host check is critical, so the production reports unhealthy.
    let result = engine.health().check_all().await;
    assert_eq!(result.status, HealthStatus::Unhealthy);

    engine.stop().await.unwrap();
}

// Start/stop ordering: operations start before processes before services;
// stop is the strict reverse.
#[tokio::test]
async fn test_start_and_stop_ordering() {
    struct OrderProbe {
        kind: HostKind,
        label: &'static str,
        starts: Arc<Mutex<Vec<&'static str>>>,
        stops: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl HostBehavior for OrderProbe {
        fn kind(&self) -> HostKind {
            self.kind
        }

        async fn on_start(&self, _ctx: &HostContext) -> Result<(), EngineError> {
            self.starts.lock().push(self.label);
            Ok(())
        }

        async fn on_stop(&self, _ctx: &HostContext) -> Result<(), EngineError> {
            self.stops.lock().push(self.label);
            Ok(())
        }

        async fn on_message(
            &self,
            _ctx: &HostContext,
            _message: Message,
        ) -> Result<Option<Message>, EngineError> {
            Ok(None)
        }
    }

    let starts = Arc::new(Mutex::new(Vec::new()));
    let stops = Arc::new(Mutex::new(Vec::new()));
    let engine = ProductionEngine::new(EngineConfig::ephemeral());

    for (class, label, kind) in [
        ("custom.test.ProbeSvc", "service", HostKind::Service),
        ("custom.test.ProbeProc", "process", HostKind::Process),
        ("custom.test.ProbeOp", "operation", HostKind::Operation),
    ] {
        let starts = Arc::clone(&starts);
        let stops = Arc::clone(&stops);
        engine
            .class_registry()
            .register_host(
                class,
                Arc::new(move |_build| {
                    Ok(Arc::new(OrderProbe {
                        kind,
                        label,
                        starts: Arc::clone(&starts),
                        stops: Arc::clone(&stops),
                    }) as Arc<dyn HostBehavior>)
                }),
            )
            .unwrap();
    }

    let mut config = ProductionConfig::new("Ordered.Production");
    // Deliberately declare the service first: order must come from kind.
    config.items.push(ItemConfig::new("Svc", "custom.test.ProbeSvc"));
    config.items.push(ItemConfig::new("Proc", "custom.test.ProbeProc"));
    config.items.push(ItemConfig::new("Op", "custom.test.ProbeOp"));
    engine.load_config(config).unwrap();

    engine.start().await.unwrap();
    assert_eq!(*starts.lock(), vec!["operation", "process", "service"]);

    engine.stop().await.unwrap();
    assert_eq!(*stops.lock(), vec!["service", "process", "operation"]);
}

// Sync messaging timeout: the requester fails, the pending entry is
// cleaned up, and a late response is simply dropped.
#[tokio::test]
async fn test_sync_request_timeout_against_slow_host() {
    struct SlowBehavior;

    #[async_trait]
    impl HostBehavior for SlowBehavior {
        fn kind(&self) -> HostKind {
            HostKind::Process
        }

        async fn on_message(
            &self,
            ctx: &HostContext,
            message: Message,
        ) -> Result<Option<Message>, EngineError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(Some(message.derive(ctx.name())))
        }
    }

    let engine = ProductionEngine::new(EngineConfig::ephemeral());
    engine
        .class_registry()
        .register_host(
            "custom.test.Slow",
            Arc::new(|_build| Ok(Arc::new(SlowBehavior) as Arc<dyn HostBehavior>)),
        )
        .unwrap();

    let mut config = ProductionConfig::new("Slow.Production");
    config.items.push(ItemConfig::new("Slow", "custom.test.Slow"));
    engine.load_config(config).unwrap();
    engine.start().await.unwrap();

    let result = engine
        .registry()
        .send_request_sync(
            "test",
            "Slow",
            Message::create(b"ping".to_vec(), "text/plain", "test"),
            Duration::from_millis(50),
            None,
        )
        .await;
    assert!(matches!(result, Err(EngineError::Timeout { .. })));
    assert_eq!(engine.registry().pending_count(), 0);

    // The in-flight request completes later and its response is dropped
    // with a warning; nothing panics and nothing leaks.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(engine.registry().pending_count(), 0);

    engine.stop().await.unwrap();
}
