//! HTTP transport shared by every provider.
//!
//! The transport is the only part of a provider that touches the network.
//! `ReqwestTransport` builds its client on first use and drops it on
//! `close()`, so an agent that is closed and then reused reconnects cleanly.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;
use tracing::{debug, warn};

use barebone_core::error::ProviderError;

/// Raw response body chunks, in arrival order.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ProviderError>>;

/// Request/response and streaming POSTs.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a JSON body and decode a JSON response.
    async fn send(&self, url: &str, headers: &[(String, String)], body: &Value) -> Result<Value, ProviderError>;

    /// POST a JSON body and return the response body as a byte stream.
    async fn send_streaming(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<ByteStream, ProviderError>;

    /// Release pooled connections.
    async fn close(&self) {}
}

/// `reqwest`-backed transport with a lazily created client.
pub struct ReqwestTransport {
    client: Mutex<Option<reqwest::Client>>,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(300))
    }

    /// Per-request timeout; streaming bodies count against it too.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: Mutex::new(None),
            timeout,
        }
    }

    /// Whether a client is currently held.
    pub fn is_connected(&self) -> bool {
        self.client.lock().map(|c| c.is_some()).unwrap_or(false)
    }

    fn client(&self) -> Result<reqwest::Client, ProviderError> {
        let mut guard = self
            .client
            .lock()
            .map_err(|_| ProviderError::Network("transport lock poisoned".into()))?;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to create HTTP client: {e}")))?;
        debug!("HTTP client created");
        *guard = Some(client.clone());
        Ok(client)
    }

    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
        streaming: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut request = self.client()?.post(url).json(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if streaming {
            request = request.header("Accept", "text/event-stream");
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        check_status(response).await
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, url: &str, headers: &[(String, String)], body: &Value) -> Result<Value, ProviderError> {
        let response = self.post(url, headers, body, false).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))
    }

    async fn send_streaming(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<ByteStream, ProviderError> {
        let response = self.post(url, headers, body, true).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| ProviderError::StreamInterrupted(e.to_string()))
            })
            .boxed())
    }

    async fn close(&self) {
        if let Ok(mut guard) = self.client.lock() {
            if guard.take().is_some() {
                debug!("HTTP client released");
            }
        }
    }
}

/// Map non-success statuses to provider errors.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }
    if status == 401 || status == 403 {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::AuthenticationFailed(if body.is_empty() {
            format!("status {status}")
        } else {
            body
        }));
    }
    if !response.status().is_success() {
        let error_body = response.text().await.unwrap_or_default();
        warn!(status, body = %error_body, "Provider API error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }
    Ok(response)
}
