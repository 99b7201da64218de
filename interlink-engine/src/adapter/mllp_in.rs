//! Inbound MLLP/TCP adapter.
//!
//! Listens on the configured port and, per accepted connection, runs the
//! frame-in / hand-to-host / ACK-out loop until the peer closes or the read
//! deadline passes. Connections beyond `MaxConnections` are refused.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// Layer 3: Internal module imports
use super::traits::{
    Adapter, AdapterCore, AdapterMetrics, AdapterMetricsSnapshot, AdapterState, IngressHandler,
};
use crate::config::Settings;
use crate::error::EngineError;
use crate::hl7::mllp;

const DEFAULT_MAX_CONNECTIONS: usize = 100;
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// MLLP/TCP listener adapter for inbound services.
///
/// Settings: `Port` (required; 0 binds an ephemeral port), `Host` (bind
/// address, default all interfaces), `MaxConnections`, `ReadTimeout`
/// (seconds).
pub struct MllpInboundAdapter {
    core: AdapterCore,
    ingress: Arc<dyn IngressHandler>,
    runtime: parking_lot::Mutex<Option<Runtime>>,
    bound_port: AtomicUsize,
}

struct Runtime {
    token: CancellationToken,
    accept_task: tokio::task::JoinHandle<()>,
}

/// State shared between the accept loop and connection tasks.
struct ConnShared {
    metrics: Arc<AdapterMetrics>,
    active: AtomicUsize,
}

impl MllpInboundAdapter {
    pub fn new(host_name: &str, settings: Settings, ingress: Arc<dyn IngressHandler>) -> Self {
        Self {
            core: AdapterCore::new("mllp-inbound", host_name, settings),
            ingress,
            runtime: parking_lot::Mutex::new(None),
            bound_port: AtomicUsize::new(0),
        }
    }

    /// The actually bound port; useful when `Port` was 0.
    pub fn bound_port(&self) -> u16 {
        self.bound_port.load(Ordering::Relaxed) as u16
    }

    async fn serve_connection(
        mut stream: TcpStream,
        ingress: Arc<dyn IngressHandler>,
        shared: Arc<ConnShared>,
        read_timeout: Duration,
        token: CancellationToken,
    ) {
        loop {
            let frame = tokio::select! {
                _ = token.cancelled() => break,
                frame = mllp::read_frame(&mut stream, Some(read_timeout)) => frame,
            };

            match frame {
                Ok(Some(payload)) => {
                    shared.metrics.record_received(payload.len());
                    match ingress.on_message_received(payload).await {
                        Ok(Some(reply)) => {
                            let framed = mllp::wrap(&reply);
                            let written = async {
                                stream.write_all(&framed).await?;
                                stream.flush().await
                            }
                            .await;
                            if let Err(e) = written {
                                warn!(error = %e, "ack write failed");
                                shared.metrics.record_error();
                                break;
                            }
                            shared.metrics.record_sent(framed.len());
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, kind = e.kind(), "ingress handler failed");
                            shared.metrics.record_error();
                        }
                    }
                }
                Ok(None) => break, // peer closed cleanly between frames
                Err(EngineError::Timeout { .. }) => {
                    debug!("read deadline elapsed, closing connection");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, kind = e.kind(), "mllp read failed");
                    shared.metrics.record_error();
                    break;
                }
            }
        }
        shared.metrics.record_connection_closed();
        shared.active.fetch_sub(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl Adapter for MllpInboundAdapter {
    fn kind(&self) -> &'static str {
        self.core.kind()
    }

    fn state(&self) -> AdapterState {
        self.core.state()
    }

    fn metrics(&self) -> AdapterMetricsSnapshot {
        self.core.metrics().snapshot()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn start(&self) -> Result<(), EngineError> {
        self.core.begin_start()?;

        let settings = self.core.settings();
        let port = settings.get_i64("Port", -1);
        if port < 0 {
            self.core.set_state(AdapterState::Error);
            return Err(EngineError::configuration(format!(
                "host '{}': mllp inbound adapter requires Port",
                self.core.host_name()
            )));
        }
        // TLS settings are accepted in configuration but this transport
        // build does not terminate TLS; fail loudly instead of listening
        // in cleartext against the operator's intent.
        if settings.get_str("SSLCertFile").is_some() || settings.get_str("SSLKeyFile").is_some() {
            self.core.set_state(AdapterState::Error);
            return Err(EngineError::configuration(format!(
                "host '{}': TLS is not supported by the mllp inbound transport",
                self.core.host_name()
            )));
        }

        let bind_host = settings.get_or("Host", "0.0.0.0");
        let max_connections = settings.get_usize("MaxConnections", DEFAULT_MAX_CONNECTIONS);
        let read_timeout = settings.get_duration_secs("ReadTimeout", DEFAULT_READ_TIMEOUT);

        let listener = TcpListener::bind((bind_host.as_str(), port as u16))
            .await
            .map_err(|e| {
                self.core.set_state(AdapterState::Error);
                EngineError::Connection {
                    reason: format!("bind {bind_host}:{port} failed: {e}"),
                }
            })?;
        let local_port = listener
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(port as u16);
        self.bound_port.store(local_port as usize, Ordering::Relaxed);

        let token = CancellationToken::new();
        let ingress = Arc::clone(&self.ingress);
        let shared = Arc::new(ConnShared {
            metrics: self.core.metrics_handle(),
            active: AtomicUsize::new(0),
        });

        let accept_token = token.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = accept_token.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        if shared.active.load(Ordering::Relaxed) >= max_connections {
                            warn!(%peer, max_connections, "connection refused, at capacity");
                            drop(stream);
                            continue;
                        }
                        shared.active.fetch_add(1, Ordering::Relaxed);
                        shared.metrics.record_connection_opened();
                        debug!(%peer, "connection accepted");
                        tokio::spawn(MllpInboundAdapter::serve_connection(
                            stream,
                            Arc::clone(&ingress),
                            Arc::clone(&shared),
                            read_timeout,
                            accept_token.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        shared.metrics.record_error();
                    }
                }
            }
        });

        *self.runtime.lock() = Some(Runtime { token, accept_task });
        self.core.mark_running();
        info!(
            host = self.core.host_name(),
            port = local_port,
            "mllp inbound adapter started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        if !matches!(self.state(), AdapterState::Running | AdapterState::Error) {
            return Ok(());
        }
        self.core.set_state(AdapterState::Stopping);

        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            runtime.token.cancel();
            let _ = runtime.accept_task.await;
        }

        self.core.set_state(AdapterState::Stopped);
        info!(host = self.core.host_name(), "mllp inbound adapter stopped");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    /// Replies with a fixed ACK payload.
    struct AckIngress;

    #[async_trait]
    impl IngressHandler for AckIngress {
        async fn on_message_received(&self, raw: Vec<u8>) -> Result<Option<Vec<u8>>, EngineError> {
            assert!(!raw.is_empty());
            Ok(Some(b"MSA|AA|MSG001".to_vec()))
        }
    }

    fn settings(port: u16) -> Settings {
        let mut s = Settings::new();
        s.set("Port", i64::from(port));
        s.set("Host", "127.0.0.1");
        s
    }

    #[tokio::test]
    async fn test_frame_in_ack_out() {
        let adapter = MllpInboundAdapter::new("HL7.In.TCP", settings(0), Arc::new(AckIngress));
        adapter.start().await.unwrap();
        let port = adapter.bound_port();

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client
            .write_all(&mllp::wrap(b"MSH|^~\\&|SRC|F1|DST|F2|20240115||ADT^A01|MSG001|P|2.4\r"))
            .await
            .unwrap();

        let ack = mllp::read_frame(&mut client, Some(Duration::from_secs(2)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ack, b"MSA|AA|MSG001");

        let snap = adapter.metrics();
        assert!(snap.bytes_received > 0);
        assert!(snap.bytes_sent > 0);
        assert_eq!(snap.connections_total, 1);

        adapter.stop().await.unwrap();
        assert_eq!(adapter.state(), AdapterState::Stopped);
    }

    #[tokio::test]
    async fn test_multiple_frames_one_connection() {
        let adapter = MllpInboundAdapter::new("HL7.In.TCP", settings(0), Arc::new(AckIngress));
        adapter.start().await.unwrap();
        let port = adapter.bound_port();

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        for _ in 0..3 {
            client.write_all(&mllp::wrap(b"MSH|test\r")).await.unwrap();
            let ack = mllp::read_frame(&mut client, Some(Duration::from_secs(2)))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(ack, b"MSA|AA|MSG001");
        }

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_port_is_configuration_error() {
        let adapter =
            MllpInboundAdapter::new("HL7.In.TCP", Settings::new(), Arc::new(AckIngress));
        let err = adapter.start().await.unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
        assert_eq!(adapter.state(), AdapterState::Error);
    }

    #[tokio::test]
    async fn test_stop_closes_listener() {
        let adapter = MllpInboundAdapter::new("HL7.In.TCP", settings(0), Arc::new(AckIngress));
        adapter.start().await.unwrap();
        let port = adapter.bound_port();
        adapter.stop().await.unwrap();

        // Accept loop is gone: a connect may succeed at the OS level but no
        // reply will ever come back.
        tokio::time::sleep(Duration::from_millis(20)).await;
        if let Ok(mut stream) = TcpStream::connect(("127.0.0.1", port)).await {
            stream.write_all(&mllp::wrap(b"MSH|x\r")).await.ok();
            let mut buf = [0u8; 1];
            let read =
                tokio::time::timeout(Duration::from_millis(100), stream.read(&mut buf)).await;
            match read {
                Ok(Ok(0)) | Err(_) => {}
                other => panic!("unexpected read after stop: {other:?}"),
            }
        }
    }
}
