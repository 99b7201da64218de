//! Outbound HTTP adapter.
//!
//! Delivers message bytes as the body of an HTTP request and returns the
//! response body. Retries network errors and 5xx responses with linear
//! backoff, mirroring the outbound MLLP policy.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use reqwest::Method;
use tracing::{debug, info, warn};

// Layer 3: Internal module imports
use super::traits::{Adapter, AdapterCore, AdapterMetricsSnapshot, AdapterState, OutboundAdapter};
use crate::config::Settings;
use crate::error::EngineError;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_MAX_RETRIES: u64 = 3;

/// HTTP client adapter for outbound operations.
///
/// Settings: `URL` (required), `HTTPMethod` (default `POST`),
/// `ContentType`, `SSLVerify` (default true), `ConnectTimeout`,
/// `ResponseTimeout`, `MaxRetries`, `RetryDelay`, `CustomHeaders`
/// (`Name1:Value1,Name2:Value2`).
pub struct HttpOutboundAdapter {
    core: AdapterCore,
    client: parking_lot::Mutex<Option<reqwest::Client>>,
}

impl HttpOutboundAdapter {
    pub fn new(host_name: &str, settings: Settings) -> Self {
        Self {
            core: AdapterCore::new("http-outbound", host_name, settings),
            client: parking_lot::Mutex::new(None),
        }
    }

    fn url(&self) -> Result<String, EngineError> {
        self.core.settings().get_str("URL").ok_or_else(|| {
            EngineError::configuration(format!(
                "host '{}': http outbound adapter requires URL",
                self.core.host_name()
            ))
        })
    }

    fn custom_headers(&self) -> Vec<(String, String)> {
        self.core
            .settings()
            .get_str("CustomHeaders")
            .map(|raw| {
                raw.split(',')
                    .filter_map(|pair| {
                        pair.split_once(':')
                            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn send_once(&self, payload: &[u8]) -> Result<Vec<u8>, EngineError> {
        let url = self.url()?;
        let settings = self.core.settings();
        let method: Method = settings
            .get_or("HTTPMethod", "POST")
            .to_ascii_uppercase()
            .parse()
            .map_err(|_| EngineError::configuration("invalid HTTPMethod"))?;
        let content_type = settings.get_or("ContentType", "application/octet-stream");

        let client = self
            .client
            .lock()
            .clone()
            .ok_or_else(|| EngineError::Send {
                reason: "http outbound adapter not started".into(),
            })?;

        let mut request = client
            .request(method, &url)
            .header("Content-Type", content_type)
            .body(payload.to_vec());
        for (name, value) in self.custom_headers() {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout {
                    operation: format!("http request to {url}"),
                    timeout: settings
                        .get_duration_secs("ResponseTimeout", DEFAULT_RESPONSE_TIMEOUT),
                }
            } else {
                EngineError::Connection {
                    reason: format!("http request to {url} failed: {e}"),
                }
            }
        })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| EngineError::Connection {
                reason: format!("http body read failed: {e}"),
            })?;

        if status.is_server_error() {
            return Err(EngineError::Connection {
                reason: format!("server error {status}"),
            });
        }
        if !status.is_success() {
            return Err(EngineError::Send {
                reason: format!("http status {status}"),
            });
        }

        self.core.metrics().record_sent(payload.len());
        self.core.metrics().record_received(body.len());
        debug!(status = %status, bytes = body.len(), "http response received");
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Adapter for HttpOutboundAdapter {
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

        let url = match self.url() {
            Ok(url) => url,
            Err(e) => {
                self.core.set_state(AdapterState::Error);
                return Err(e);
            }
        };

        let settings = self.core.settings();
        let client = reqwest::Client::builder()
            .connect_timeout(settings.get_duration_secs("ConnectTimeout", DEFAULT_CONNECT_TIMEOUT))
            .timeout(settings.get_duration_secs("ResponseTimeout", DEFAULT_RESPONSE_TIMEOUT))
            .danger_accept_invalid_certs(!settings.get_bool("SSLVerify", true))
            .build()
            .map_err(|e| {
                self.core.set_state(AdapterState::Error);
                EngineError::configuration(format!("http client build failed: {e}"))
            })?;

        *self.client.lock() = Some(client);
        self.core.mark_running();
        info!(host = self.core.host_name(), url = %url, "http outbound adapter started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        if !matches!(self.state(), AdapterState::Running | AdapterState::Error) {
            return Ok(());
        }
        *self.client.lock() = None;
        self.core.set_state(AdapterState::Stopped);
        info!(host = self.core.host_name(), "http outbound adapter stopped");
        Ok(())
    }
}

#[async_trait]
impl OutboundAdapter for HttpOutboundAdapter {
    async fn send(
        &self,
        payload: &[u8],
        _message_type: Option<&str>,
    ) -> Result<Vec<u8>, EngineError> {
        let settings = self.core.settings();
        let max_retries = settings.get_u64("MaxRetries", DEFAULT_MAX_RETRIES) as u32;
        let retry_delay = settings.get_duration_secs("RetryDelay", DEFAULT_RETRY_DELAY);

        let mut attempt = 0u32;
        loop {
            match self.send_once(payload).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    self.core.metrics().record_error();
                    warn!(
                        attempt,
                        max_retries,
                        error = %e,
                        kind = e.kind(),
                        "http send failed, backing off"
                    );
                    tokio::time::sleep(retry_delay * attempt).await;
                }
                Err(e) if e.is_retryable() => {
                    self.core.metrics().record_error();
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
