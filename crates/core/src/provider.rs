//! Backend abstraction: how a turn talks to a local inference server.
//!
//! A `ChatBackend` sends a conversation to the model and gets a reply back,
//! either complete or as a stream of deltas. `ProviderKind` names the two
//! wire protocols a backend can speak.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::message::{ChatMessage, ToolCall};
use crate::retry::RetryPolicy;

/// The two supported backend wire protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Newline-delimited JSON (Ollama-style `/api/chat`)
    #[serde(alias = "ollama")]
    Ndjson,
    /// Server-sent events, OpenAI-compatible `/v1/chat/completions`
    #[serde(rename = "openai_compat", alias = "openai", alias = "lmstudio")]
    OpenAiCompat,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ndjson => "ndjson",
            Self::OpenAiCompat => "openai_compat",
        }
    }

    /// Path of the chat endpoint, relative to the base URL.
    pub fn chat_path(&self) -> &'static str {
        match self {
            Self::Ndjson => "/api/chat",
            Self::OpenAiCompat => "/v1/chat/completions",
        }
    }

    /// Path of the model listing endpoint, relative to the base URL.
    pub fn models_path(&self) -> &'static str {
        match self {
            Self::Ndjson => "/api/tags",
            Self::OpenAiCompat => "/v1/models",
        }
    }

    /// Conventional local endpoint for this protocol.
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Self::Ndjson => "http://localhost:11434",
            Self::OpenAiCompat => "http://localhost:1234",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ndjson" | "ollama" => Ok(Self::Ndjson),
            "openai_compat" | "openai" | "sse" | "lmstudio" => {
                Ok(Self::OpenAiCompat)
            }
            other => Err(format!("unknown provider '{other}' (expected ndjson or openai)")),
        }
    }
}

/// Sampling knobs; `None` leaves the backend default in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// A tool declaration sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,

    pub description: String,

    /// JSON Schema describing the parameters
    pub parameters: serde_json::Value,
}

/// A provider-agnostic chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The model to use (e.g. "qwen2.5-coder:7b")
    pub model: String,

    pub messages: Vec<ChatMessage>,

    #[serde(default)]
    pub stream: bool,

    /// Tool declarations; empty disables tool calling for this request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    #[serde(default)]
    pub sampling: SamplingOptions,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: false,
            tools: Vec::new(),
            sampling: SamplingOptions::default(),
        }
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingOptions) -> Self {
        self.sampling = sampling;
        self
    }

    /// Reject requests that must not reach the network.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(EngineError::PreconditionFailed("no model selected".into()));
        }
        Ok(())
    }
}

/// A complete (non-streaming) reply from a backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendReply {
    pub content: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

/// One decoded increment of a streaming reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamDelta {
    /// Text fragment; may be empty
    #[serde(default)]
    pub content: String,

    /// Tool calls completed by this increment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl StreamDelta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// A lazy, finite, non-restartable sequence of deltas. The stream ending
/// is the completion signal.
pub type DeltaStream = BoxStream<'static, Result<StreamDelta>>;

/// The core backend trait.
///
/// The HTTP client implements this against a real server; tests implement it
/// with scripted replies. The tool-call loop only ever sees this trait.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// A human-readable name (e.g. "ollama@localhost:11434").
    fn name(&self) -> &str;

    /// Send a request and wait for the complete reply.
    async fn complete(
        &self,
        request: ChatRequest,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<BackendReply>;

    /// Send a request and get a stream of deltas.
    ///
    /// Default implementation calls `complete()` and wraps the result as a
    /// single delta.
    async fn stream(
        &self,
        request: ChatRequest,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<DeltaStream> {
        let reply = self.complete(request, policy, cancel).await?;
        let delta = StreamDelta {
            content: reply.content,
            tool_calls: reply.tool_calls,
        };
        Ok(Box::pin(futures::stream::iter(vec![Ok(delta)])))
    }

    /// List models the backend can serve.
    async fn list_models(&self, _cancel: &CancellationToken) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Health check: can we reach the backend?
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
