//! HTTP chat backend: wire adapter + transport + retry + stream decoding.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kiln_config::BackendConfig;
use kiln_core::{
    BackendReply, CancellationToken, ChatBackend, ChatRequest, DeltaStream, EngineError,
    ProviderKind, Result, RetryPolicy,
};
use tracing::{debug, warn};

use crate::retry::RetryCoordinator;
use crate::stream::StreamDecoder;
use crate::transport::{HttpTransport, TransportRequest};
use crate::wire::{JsonToolCallScanner, ToolCallScanner, WireAdapter};

/// Deadline for model listing and health checks.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A `ChatBackend` that talks to a local inference server over HTTP.
///
/// The wire adapter is fixed at construction from the provider kind, so
/// every request and every decode on this backend uses the same protocol.
pub struct HttpBackend {
    name: String,
    adapter: WireAdapter,
    base_url: String,
    transport: HttpTransport,
    scanner: Arc<dyn ToolCallScanner>,
}

impl HttpBackend {
    pub fn new(kind: ProviderKind, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let host = base_url
            .split("://")
            .nth(1)
            .unwrap_or(base_url.as_str())
            .to_string();

        Self {
            name: format!("{kind}@{host}"),
            adapter: WireAdapter::for_kind(kind),
            base_url,
            transport: HttpTransport::new(),
            scanner: Arc::new(JsonToolCallScanner),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(config.provider, &config.endpoint)
    }

    /// Replace the text-scan fallback used when a reply has no structured
    /// tool calls.
    pub fn with_scanner(mut self, scanner: Arc<dyn ToolCallScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn kind(&self) -> ProviderKind {
        self.adapter.kind()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ChatRequest,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<BackendReply> {
        let request = request.streaming(false);
        let body = self.adapter.build_body(&request)?;
        let url = self.url(self.kind().chat_path());
        let url = url.as_str();

        debug!(
            backend = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Dispatching chat request"
        );

        let text = RetryCoordinator::new(policy, cancel)
            .run(|_| {
                let body = body.clone();
                async move {
                    let response = self
                        .transport
                        .send(TransportRequest::post(url, body), policy.timeout, cancel)
                        .await?;
                    response.text(cancel).await
                }
            })
            .await?;

        let mut reply = self.adapter.parse_response(&text)?;

        if reply.tool_calls.is_empty() && !request.tools.is_empty() {
            let scanned = self.scanner.scan(&reply.content, &request.tools);
            if !scanned.is_empty() {
                warn!(
                    backend = %self.name,
                    origin = "text_scan",
                    count = scanned.len(),
                    "Recovered tool calls from reply text"
                );
                reply.tool_calls = scanned;
            }
        }

        Ok(reply)
    }

    async fn stream(
        &self,
        request: ChatRequest,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<DeltaStream> {
        let request = request.streaming(true);
        let body = self.adapter.build_body(&request)?;
        let url = self.url(self.kind().chat_path());
        let url = url.as_str();

        debug!(
            backend = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Dispatching streaming chat request"
        );

        // Only opening the stream is retried; once deltas flow they belong
        // to the caller
        let response = RetryCoordinator::new(policy, cancel)
            .run(|_| {
                self.transport
                    .send(TransportRequest::post(url, body.clone()), policy.timeout, cancel)
            })
            .await?;

        let decoder = StreamDecoder::new(
            self.adapter,
            response.into_inner().bytes_stream(),
            cancel.clone(),
        );
        Ok(decoder.into_stream())
    }

    async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let url = self.url(self.kind().models_path());
        let response = self
            .transport
            .send(TransportRequest::get(url), PROBE_TIMEOUT, cancel)
            .await?;
        let text = response.text(cancel).await?;
        self.adapter.parse_models(&text)
    }

    async fn health_check(&self) -> Result<bool> {
        let url = self.url(self.kind().models_path());
        match self
            .transport
            .send(TransportRequest::get(url), PROBE_TIMEOUT, &CancellationToken::new())
            .await
        {
            Ok(_) => Ok(true),
            Err(EngineError::Http { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
