//! Outbound MLLP/TCP adapter.
//!
//! Keeps a single persistent connection with reconnect-on-fault. `send`
//! writes a framed message and reads the framed reply under `AckTimeout`,
//! retrying transport faults with linear backoff up to `MaxRetries`.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

// Layer 3: Internal module imports
use super::traits::{Adapter, AdapterCore, AdapterMetricsSnapshot, AdapterState, OutboundAdapter};
use crate::config::Settings;
use crate::error::EngineError;
use crate::hl7::mllp;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_MAX_RETRIES: u32 = 3;

/// MLLP/TCP client adapter for outbound operations.
///
/// Settings: `IPAddress` (required), `Port` (required), `ConnectTimeout`,
/// `AckTimeout`, `MaxRetries`, `RetryDelay` (all seconds), `StayConnected`
/// (−1 keep open, 0 close per message, N close after N idle seconds).
pub struct MllpOutboundAdapter {
    core: AdapterCore,
    connection: tokio::sync::Mutex<Option<TcpStream>>,
}

impl MllpOutboundAdapter {
    pub fn new(host_name: &str, settings: Settings) -> Self {
        Self {
            core: AdapterCore::new("mllp-outbound", host_name, settings),
            connection: tokio::sync::Mutex::new(None),
        }
    }

    fn remote(&self) -> Result<(String, u16), EngineError> {
        let settings = self.core.settings();
        let address = settings.get_str("IPAddress").ok_or_else(|| {
            EngineError::configuration(format!(
                "host '{}': mllp outbound adapter requires IPAddress",
                self.core.host_name()
            ))
        })?;
        let port = settings.get_i64("Port", -1);
        if port < 0 {
            return Err(EngineError::configuration(format!(
                "host '{}': mllp outbound adapter requires Port",
                self.core.host_name()
            )));
        }
        Ok((address, port as u16))
    }

    async fn connect(&self) -> Result<TcpStream, EngineError> {
        let (address, port) = self.remote()?;
        let connect_timeout = self
            .core
            .settings()
            .get_duration_secs("ConnectTimeout", DEFAULT_CONNECT_TIMEOUT);

        let stream = timeout(connect_timeout, TcpStream::connect((address.as_str(), port)))
            .await
            .map_err(|_| EngineError::Timeout {
                operation: format!("connect {address}:{port}"),
                timeout: connect_timeout,
            })?
            .map_err(|e| EngineError::Connection {
                reason: format!("connect {address}:{port} failed: {e}"),
            })?;

        self.core.metrics().record_connection_opened();
        debug!(address = %address, port, "mllp connection established");
        Ok(stream)
    }

    /// One send attempt over the (re)established connection.
    async fn send_once(&self, payload: &[u8]) -> Result<Vec<u8>, EngineError> {
        let ack_timeout = self
            .core
            .settings()
            .get_duration_secs("AckTimeout", DEFAULT_ACK_TIMEOUT);
        let stay_connected = self.core.settings().get_i64("StayConnected", -1);

        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let stream = guard.as_mut().ok_or_else(|| EngineError::Connection {
            reason: "connection unavailable".into(),
        })?;

        let framed = mllp::wrap(payload);
        stream.write_all(&framed).await.map_err(|e| {
            EngineError::Connection {
                reason: format!("write failed: {e}"),
            }
        })?;
        stream.flush().await.map_err(|e| EngineError::Connection {
            reason: format!("flush failed: {e}"),
        })?;
        self.core.metrics().record_sent(framed.len());

        let reply = mllp::read_frame(stream, Some(ack_timeout)).await?;
        let ack = reply.ok_or_else(|| EngineError::Connection {
            reason: "peer closed before sending a reply".into(),
        })?;
        self.core.metrics().record_received(ack.len());

        if stay_connected == 0 {
            if let Some(stream) = guard.take() {
                drop(stream);
                self.core.metrics().record_connection_closed();
            }
        }
        Ok(ack)
    }

    async fn drop_connection(&self) {
        let mut guard = self.connection.lock().await;
        if guard.take().is_some() {
            self.core.metrics().record_connection_closed();
        }
    }
}

#[async_trait]
impl Adapter for MllpOutboundAdapter {
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
        // Validate the remote settings now; connect lazily on first send.
        if let Err(e) = self.remote() {
            self.core.set_state(AdapterState::Error);
            return Err(e);
        }
        if self.core.settings().get_str("SSLConfig").is_some() {
            self.core.set_state(AdapterState::Error);
            return Err(EngineError::configuration(format!(
                "host '{}': TLS is not supported by the mllp outbound transport",
                self.core.host_name()
            )));
        }
        self.core.mark_running();
        let (address, port) = self.remote()?;
        info!(
            host = self.core.host_name(),
            remote = %format!("{address}:{port}"),
            "mllp outbound adapter started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        if !matches!(self.state(), AdapterState::Running | AdapterState::Error) {
            return Ok(());
        }
        self.core.set_state(AdapterState::Stopping);
        self.drop_connection().await;
        self.core.set_state(AdapterState::Stopped);
        info!(host = self.core.host_name(), "mllp outbound adapter stopped");
        Ok(())
    }
}

#[async_trait]
impl OutboundAdapter for MllpOutboundAdapter {
    async fn send(
        &self,
        payload: &[u8],
        _message_type: Option<&str>,
    ) -> Result<Vec<u8>, EngineError> {
        let max_retries = self.core.settings().get_u64("MaxRetries", DEFAULT_MAX_RETRIES as u64) as u32;
        let retry_delay = self
            .core
            .settings()
            .get_duration_secs("RetryDelay", DEFAULT_RETRY_DELAY);

        let mut attempt = 0u32;
        loop {
            match self.send_once(payload).await {
                Ok(ack) => return Ok(ack),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    self.core.metrics().record_error();
                    self.drop_connection().await;
                    warn!(
                        attempt,
                        max_retries,
                        error = %e,
                        kind = e.kind(),
                        "mllp send failed, backing off"
                    );
                    // Linear backoff: delay grows with the attempt number.
                    tokio::time::sleep(retry_delay * attempt).await;
                }
                Err(e) if e.is_retryable() => {
                    self.core.metrics().record_error();
                    self.drop_connection().await;
                    return Err(EngineError::Send {
                        reason: format!("exhausted {max_retries} retries: {e}"),
                    });
                }
                Err(e) => {
                    self.core.metrics().record_error();
                    return Err(e);
                }
            }
        }
    }
}
