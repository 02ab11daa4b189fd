//! A provider built from a wire-format adapter and a transport.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use barebone_core::error::Result;
use barebone_core::provider::{EventReceiver, Provider, ProviderAdapter, ProviderRequest, Response};

use crate::sse::decode_stream;
use crate::transport::{ReqwestTransport, Transport};

/// Sends adapter-encoded requests over a shared transport.
pub struct HttpProvider<A: ProviderAdapter> {
    adapter: A,
    transport: Arc<dyn Transport>,
}

impl<A: ProviderAdapter> HttpProvider<A> {
    pub fn new(adapter: A) -> Self {
        Self::with_transport(adapter, Arc::new(ReqwestTransport::new()))
    }

    /// Use a custom transport (e.g., a recorded one in tests).
    pub fn with_transport(adapter: A, transport: Arc<dyn Transport>) -> Self {
        Self { adapter, transport }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }
}

#[async_trait]
impl<A: ProviderAdapter> Provider for HttpProvider<A> {
    fn name(&self) -> &str {
        self.adapter.name()
    }

    fn model(&self) -> &str {
        self.adapter.model()
    }

    async fn complete(&self, request: ProviderRequest) -> Result<Response> {
        let body = self.adapter.encode_request(&request, false)?;
        debug!(
            provider = self.adapter.name(),
            model = self.adapter.model(),
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let payload = self
            .transport
            .send(&self.adapter.endpoint(), &self.adapter.headers(), &body)
            .await?;
        let response = self.adapter.decode_response(payload)?;

        debug!(
            tool_calls = response.tool_calls.len(),
            stop_reason = ?response.stop_reason,
            "Completion received"
        );
        Ok(response)
    }

    async fn stream(&self, request: ProviderRequest) -> Result<EventReceiver> {
        let body = self.adapter.encode_request(&request, true)?;
        debug!(
            provider = self.adapter.name(),
            model = self.adapter.model(),
            "Opening stream"
        );

        let bytes = self
            .transport
            .send_streaming(&self.adapter.endpoint(), &self.adapter.headers(), &body)
            .await?;
        Ok(decode_stream(bytes, self.adapter.stream_parser(), request.tools))
    }

    async fn close(&self) {
        self.transport.close().await;
    }
}
