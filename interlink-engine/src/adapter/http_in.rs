//! Inbound HTTP adapter.
//!
//! A deliberately small HTTP/1.1 server: one request per connection, no
//! keep-alive, `Connection: close` on every response. The contract is the
//! status mapping (wrong method 405 with `Allow`, oversized body 413,
//! unknown path 404, handler failure 500), not a general-purpose server.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// Layer 3: Internal module imports
use super::traits::{
    Adapter, AdapterCore, AdapterMetrics, AdapterMetricsSnapshot, AdapterState, IngressHandler,
};
use crate::config::Settings;
use crate::error::EngineError;

const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_HEADER_BYTES: usize = 16 * 1024;

/// HTTP listener adapter for inbound services.
///
/// Settings: `Port` (required; 0 binds an ephemeral port), `Host`,
/// `MaxBodySize`, `ReadTimeout` (seconds), `AllowedMethods`
/// (comma-separated, default `POST`), `BasePath` (default `/`),
/// `EnableCORS`.
pub struct HttpInboundAdapter {
    core: AdapterCore,
    ingress: Arc<dyn IngressHandler>,
    runtime: parking_lot::Mutex<Option<Runtime>>,
    bound_port: AtomicUsize,
}

struct Runtime {
    token: CancellationToken,
    accept_task: tokio::task::JoinHandle<()>,
}

#[derive(Clone)]
struct HttpConfig {
    max_body_size: usize,
    read_timeout: Duration,
    allowed_methods: Vec<String>,
    base_path: String,
    enable_cors: bool,
}

struct Request {
    method: String,
    path: String,
    content_type: String,
    body: Vec<u8>,
}

enum Reply {
    Ok(Vec<u8>, String),
    Status(u16, &'static str, String),
    MethodNotAllowed(String),
}

impl HttpInboundAdapter {
    pub fn new(host_name: &str, settings: Settings, ingress: Arc<dyn IngressHandler>) -> Self {
        Self {
            core: AdapterCore::new("http-inbound", host_name, settings),
            ingress,
            runtime: parking_lot::Mutex::new(None),
            bound_port: AtomicUsize::new(0),
        }
    }

    /// The actually bound port; useful when `Port` was 0.
    pub fn bound_port(&self) -> u16 {
        self.bound_port.load(Ordering::Relaxed) as u16
    }

    async fn read_request(
        stream: &mut TcpStream,
        config: &HttpConfig,
    ) -> Result<Request, Reply> {
        // Head: read until the blank line, bounded.
        let mut buf = Vec::with_capacity(1024);
        let mut chunk = [0u8; 1024];
        let head_end = loop {
            if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
                break pos;
            }
            if buf.len() > MAX_HEADER_BYTES {
                return Err(Reply::Status(400, "Bad Request", "headers too large".into()));
            }
            let n = timeout(config.read_timeout, stream.read(&mut chunk))
                .await
                .map_err(|_| Reply::Status(408, "Request Timeout", "read timeout".into()))?
                .map_err(|e| Reply::Status(400, "Bad Request", format!("read failed: {e}")))?;
            if n == 0 {
                return Err(Reply::Status(400, "Bad Request", "truncated request".into()));
            }
            buf.extend_from_slice(&chunk[..n]);
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let mut lines = head.lines();
        let request_line = lines
            .next()
            .ok_or_else(|| Reply::Status(400, "Bad Request", "empty request".into()))?;
        let mut parts = request_line.split_whitespace();
        let method = parts
            .next()
            .ok_or_else(|| Reply::Status(400, "Bad Request", "missing method".into()))?
            .to_ascii_uppercase();
        let path = parts
            .next()
            .ok_or_else(|| Reply::Status(400, "Bad Request", "missing path".into()))?
            .to_string();

        let mut headers: HashMap<String, String> = HashMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        let content_length: usize = headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        if content_length > config.max_body_size {
            return Err(Reply::Status(
                413,
                "Payload Too Large",
                format!("body exceeds {} bytes", config.max_body_size),
            ));
        }

        let mut body = buf[head_end + 4..].to_vec();
        while body.len() < content_length {
            let n = timeout(config.read_timeout, stream.read(&mut chunk))
                .await
                .map_err(|_| Reply::Status(408, "Request Timeout", "read timeout".into()))?
                .map_err(|e| Reply::Status(400, "Bad Request", format!("read failed: {e}")))?;
            if n == 0 {
                return Err(Reply::Status(400, "Bad Request", "truncated body".into()));
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body.truncate(content_length);

        Ok(Request {
            method,
            path,
            content_type: headers
                .get("content-type")
                .cloned()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            body,
        })
    }

    async fn handle(
        request: Request,
        config: &HttpConfig,
        ingress: &Arc<dyn IngressHandler>,
        metrics: &AdapterMetrics,
    ) -> Reply {
        if config.enable_cors && request.method == "OPTIONS" {
            return Reply::Status(204, "No Content", String::new());
        }

        if !config
            .allowed_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&request.method))
        {
            return Reply::MethodNotAllowed(config.allowed_methods.join(", "));
        }

        if !request.path.starts_with(&config.base_path) {
            return Reply::Status(404, "Not Found", format!("unknown path: {}", request.path));
        }

        metrics.record_received(request.body.len());
        match ingress.on_message_received(request.body).await {
            Ok(reply) => Reply::Ok(reply.unwrap_or_default(), request.content_type),
            Err(e) => {
                metrics.record_error();
                warn!(error = %e, kind = e.kind(), "http ingress handler failed");
                Reply::Status(500, "Internal Server Error", e.to_string())
            }
        }
    }

    async fn write_reply(
        stream: &mut TcpStream,
        reply: Reply,
        enable_cors: bool,
        metrics: &AdapterMetrics,
    ) {
        let (status, reason, body, content_type, allow) = match reply {
            Reply::Ok(body, content_type) => (200, "OK", body, content_type, None),
            Reply::Status(status, reason, text) => {
                (status, reason, text.into_bytes(), "text/plain".to_string(), None)
            }
            Reply::MethodNotAllowed(allow) => (
                405,
                "Method Not Allowed",
                b"method not allowed".to_vec(),
                "text/plain".to_string(),
                Some(allow),
            ),
        };

        let mut response = format!(
            "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n",
            body.len()
        );
        if let Some(allow) = allow {
            response.push_str(&format!("Allow: {allow}\r\n"));
        }
        if enable_cors {
            response.push_str("Access-Control-Allow-Origin: *\r\n");
            response.push_str("Access-Control-Allow-Methods: *\r\n");
        }
        response.push_str("\r\n");

        let mut bytes = response.into_bytes();
        bytes.extend_from_slice(&body);
        if stream.write_all(&bytes).await.is_ok() {
            let _ = stream.flush().await;
            metrics.record_sent(bytes.len());
        }
    }

    async fn serve_connection(
        mut stream: TcpStream,
        config: HttpConfig,
        ingress: Arc<dyn IngressHandler>,
        metrics: Arc<AdapterMetrics>,
    ) {
        metrics.record_connection_opened();
        let reply = match Self::read_request(&mut stream, &config).await {
            Ok(request) => Self::handle(request, &config, &ingress, &metrics).await,
            Err(reply) => reply,
        };
        Self::write_reply(&mut stream, reply, config.enable_cors, &metrics).await;
        metrics.record_connection_closed();
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[async_trait]
impl Adapter for HttpInboundAdapter {
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
                "host '{}': http inbound adapter requires Port",
                self.core.host_name()
            )));
        }
        let bind_host = settings.get_or("Host", "0.0.0.0");
        let config = HttpConfig {
            max_body_size: settings.get_usize("MaxBodySize", DEFAULT_MAX_BODY_SIZE),
            read_timeout: settings.get_duration_secs("ReadTimeout", DEFAULT_READ_TIMEOUT),
            allowed_methods: {
                let methods = settings.get_list("AllowedMethods");
                if methods.is_empty() {
                    vec!["POST".to_string()]
                } else {
                    methods
                }
            },
            base_path: settings.get_or("BasePath", "/"),
            enable_cors: settings.get_bool("EnableCORS", false),
        };

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
        let accept_token = token.clone();
        let ingress = Arc::clone(&self.ingress);
        let metrics = self.core.metrics_handle();

        let accept_task = tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = accept_token.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "http connection accepted");
                        tokio::spawn(HttpInboundAdapter::serve_connection(
                            stream,
                            config.clone(),
                            Arc::clone(&ingress),
                            Arc::clone(&metrics),
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "http accept failed");
                        metrics.record_error();
                    }
                }
            }
        });

        *self.runtime.lock() = Some(Runtime { token, accept_task });
        self.core.mark_running();
        info!(
            host = self.core.host_name(),
            port = local_port,
            "http inbound adapter started"
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
        info!(host = self.core.host_name(), "http inbound adapter stopped");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct EchoIngress;

    #[async_trait]
    impl IngressHandler for EchoIngress {
        async fn on_message_received(&self, raw: Vec<u8>) -> Result<Option<Vec<u8>>, EngineError> {
            Ok(Some(raw))
        }
    }

    struct FailingIngress;

    #[async_trait]
    impl IngressHandler for FailingIngress {
        async fn on_message_received(&self, _: Vec<u8>) -> Result<Option<Vec<u8>>, EngineError> {
            Err(EngineError::validation("bad payload"))
        }
    }

    fn settings() -> Settings {
        let mut s = Settings::new();
        s.set("Port", 0i64);
        s.set("Host", "127.0.0.1");
        s.set("MaxBodySize", 64i64);
        s
    }

    async fn roundtrip(port: u16, request: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).to_string()
    }

    fn post(body: &str) -> String {
        format!(
            "POST /messages HTTP/1.1\r\nHost: x\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
    }

    #[tokio::test]
    async fn test_post_dispatches_and_echoes() {
        let adapter = HttpInboundAdapter::new("HTTP.In", settings(), Arc::new(EchoIngress));
        adapter.start().await.unwrap();
        let port = adapter.bound_port();

        let response = roundtrip(port, &post("hello")).await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Connection: close"));
        assert!(response.contains("Content-Type: text/plain"));
        assert!(response.ends_with("hello"));

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_method_is_405_with_allow() {
        let adapter = HttpInboundAdapter::new("HTTP.In", settings(), Arc::new(EchoIngress));
        adapter.start().await.unwrap();
        let port = adapter.bound_port();

        let response = roundtrip(
            port,
            "GET /messages HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 405"));
        assert!(response.contains("Allow: POST"));

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_body_size_boundary() {
        let adapter = HttpInboundAdapter::new("HTTP.In", settings(), Arc::new(EchoIngress));
        adapter.start().await.unwrap();
        let port = adapter.bound_port();

        // Exactly MaxBodySize: accepted.
        let exact = "x".repeat(64);
        let response = roundtrip(port, &post(&exact)).await;
        assert!(response.starts_with("HTTP/1.1 200"));

        // One byte larger: 413.
        let over = "x".repeat(65);
        let response = roundtrip(port, &post(&over)).await;
        assert!(response.starts_with("HTTP/1.1 413"));

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let mut s = settings();
        s.set("BasePath", "/api");
        let adapter = HttpInboundAdapter::new("HTTP.In", s, Arc::new(EchoIngress));
        adapter.start().await.unwrap();
        let port = adapter.bound_port();

        let response = roundtrip(
            port,
            "POST /other HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 404"));

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_error_is_500() {
        let adapter = HttpInboundAdapter::new("HTTP.In", settings(), Arc::new(FailingIngress));
        adapter.start().await.unwrap();
        let port = adapter.bound_port();

        let response = roundtrip(port, &post("data")).await;
        assert!(response.starts_with("HTTP/1.1 500"));
        assert!(response.contains("bad payload"));

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let mut s = settings();
        s.set("EnableCORS", true);
        let adapter = HttpInboundAdapter::new("HTTP.In", s, Arc::new(EchoIngress));
        adapter.start().await.unwrap();
        let port = adapter.bound_port();

        let response = roundtrip(
            port,
            "OPTIONS /messages HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 204"));
        assert!(response.contains("Access-Control-Allow-Origin: *"));

        adapter.stop().await.unwrap();
    }
}
