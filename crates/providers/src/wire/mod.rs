//! Wire adapters: pure translation between the engine's request/response
//! model and each backend's JSON shape. Nothing in here performs I/O.
//!
//! The two protocols form a closed set. A backend picks its adapter once,
//! from its `ProviderKind`, and every call goes through that value.

pub mod ndjson;
pub mod openai;
pub mod scan;

use kiln_core::{BackendReply, ChatRequest, ProviderKind, Result, ToolCall, ToolDefinition};
use serde::Serialize;

pub use ndjson::NdjsonAdapter;
pub use openai::OpenAiAdapter;
pub use scan::{JsonToolCallScanner, ToolCallScanner};

/// One streaming line after decoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedLine {
    /// Text carried by the line; may be empty
    pub content: String,

    /// Tool calls that arrived whole on this line
    pub tool_calls: Vec<ToolCall>,

    /// Partial tool calls that must be joined across lines
    pub fragments: Vec<ToolCallFragment>,

    /// The line ends the stream
    pub done: bool,
}

impl DecodedLine {
    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }
}

/// A piece of a streamed tool call, keyed by its position in the reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallFragment {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// The closed set of wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireAdapter {
    Ndjson(NdjsonAdapter),
    OpenAi(OpenAiAdapter),
}

impl WireAdapter {
    pub fn for_kind(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Ndjson => Self::Ndjson(NdjsonAdapter),
            ProviderKind::OpenAiCompat => Self::OpenAi(OpenAiAdapter),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Ndjson(_) => ProviderKind::Ndjson,
            Self::OpenAi(_) => ProviderKind::OpenAiCompat,
        }
    }

    /// Build the JSON request body.
    ///
    /// Fails with `PreconditionFailed` when no model is selected, so a bad
    /// request never reaches the transport.
    pub fn build_body(&self, request: &ChatRequest) -> Result<serde_json::Value> {
        request.validate()?;
        Ok(match self {
            Self::Ndjson(adapter) => adapter.build_body(request),
            Self::OpenAi(adapter) => adapter.build_body(request),
        })
    }

    /// Parse a complete non-streaming response body.
    pub fn parse_response(&self, body: &str) -> Result<BackendReply> {
        match self {
            Self::Ndjson(adapter) => adapter.parse_response(body),
            Self::OpenAi(adapter) => adapter.parse_response(body),
        }
    }

    /// Decode one complete streaming line. `None` means skip the line.
    pub fn decode_line(&self, line: &str) -> Option<DecodedLine> {
        match self {
            Self::Ndjson(adapter) => adapter.decode_line(line),
            Self::OpenAi(adapter) => adapter.decode_line(line),
        }
    }

    /// Parse the model listing response.
    pub fn parse_models(&self, body: &str) -> Result<Vec<String>> {
        match self {
            Self::Ndjson(adapter) => adapter.parse_models(body),
            Self::OpenAi(adapter) => adapter.parse_models(body),
        }
    }
}

/// `{type: "function", function: {...}}`, shared by both protocols.
#[derive(Debug, Serialize)]
struct ApiToolDefinition<'a> {
    r#type: &'static str,
    function: ApiToolFunction<'a>,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

fn tool_declarations(tools: &[ToolDefinition]) -> serde_json::Value {
    let defs: Vec<ApiToolDefinition<'_>> = tools
        .iter()
        .map(|t| ApiToolDefinition {
            r#type: "function",
            function: ApiToolFunction {
                name: &t.name,
                description: &t.description,
                parameters: &t.parameters,
            },
        })
        .collect();
    serde_json::json!(defs)
}
