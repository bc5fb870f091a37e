//! NDJSON protocol (Ollama-style `/api/chat`).
//!
//! Sampling knobs live in a nested `options` object. Every streaming line is
//! a complete JSON object with `message.content` and a `done` flag. Tool
//! call arguments travel as JSON objects, not strings.

use std::collections::HashMap;

use kiln_core::{
    BackendReply, ChatMessage, ChatRequest, EngineError, Result, SamplingOptions, ToolCall,
};
use serde::{Deserialize, Serialize};

use super::{DecodedLine, tool_declarations};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NdjsonAdapter;

impl NdjsonAdapter {
    pub fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let body = NdjsonChatRequest {
            model: &request.model,
            messages: to_wire_messages(&request.messages),
            stream: request.stream,
            options: NdjsonOptions::from_sampling(&request.sampling),
        };

        let mut value = serde_json::json!(body);
        if !request.tools.is_empty() {
            value["tools"] = tool_declarations(&request.tools);
        }
        value
    }

    pub fn parse_response(&self, body: &str) -> Result<BackendReply> {
        let response: NdjsonChatResponse = serde_json::from_str(body)
            .map_err(|e| EngineError::Decode(format!("invalid /api/chat response: {e}")))?;

        let message = response
            .message
            .ok_or_else(|| EngineError::Decode("response has no message".into()))?;

        Ok(BackendReply {
            content: message.content,
            tool_calls: message.tool_calls.into_iter().map(from_wire_call).collect(),
        })
    }

    pub fn decode_line(&self, line: &str) -> Option<DecodedLine> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let chunk: NdjsonChatResponse = serde_json::from_str(line).ok()?;
        let (content, tool_calls) = match chunk.message {
            Some(message) => (
                message.content,
                message.tool_calls.into_iter().map(from_wire_call).collect(),
            ),
            None if chunk.done => (String::new(), Vec::new()),
            // Neither text nor a terminator, e.g. `{"error": "..."}`
            None => return None,
        };

        Some(DecodedLine {
            content,
            tool_calls,
            fragments: Vec::new(),
            done: chunk.done,
        })
    }

    pub fn parse_models(&self, body: &str) -> Result<Vec<String>> {
        let tags: NdjsonTagsResponse = serde_json::from_str(body)
            .map_err(|e| EngineError::Decode(format!("invalid /api/tags response: {e}")))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

/// Tool results carry no id on this wire; they are paired with their call
/// through `tool_name`, resolved from the assistant message that issued it.
fn to_wire_messages(messages: &[ChatMessage]) -> Vec<NdjsonMessage<'_>> {
    let mut names: HashMap<&str, &str> = HashMap::new();
    messages
        .iter()
        .map(|message| {
            for call in message.tool_calls() {
                names.insert(call.id.as_str(), call.name.as_str());
            }
            let tool_name = message
                .tool_call_id()
                .and_then(|id| names.get(id).copied());
            to_wire_message(message, tool_name)
        })
        .collect()
}

fn to_wire_message<'a>(message: &'a ChatMessage, tool_name: Option<&'a str>) -> NdjsonMessage<'a> {
    NdjsonMessage {
        role: message.role().as_str(),
        tool_name,
        content: message.content(),
        tool_calls: message
            .tool_calls()
            .iter()
            .map(|tc| NdjsonToolCallOut {
                function: NdjsonFunctionOut {
                    name: &tc.name,
                    // Arguments are an object on this wire; keep the raw
                    // string if it is not valid JSON
                    arguments: serde_json::from_str(&tc.arguments)
                        .unwrap_or_else(|_| serde_json::Value::String(tc.arguments.clone())),
                },
            })
            .collect(),
    }
}

fn from_wire_call(call: NdjsonToolCallIn) -> ToolCall {
    let arguments = match call.function.arguments {
        serde_json::Value::String(raw) => raw,
        serde_json::Value::Null => "{}".to_string(),
        other => other.to_string(),
    };
    let id = call
        .id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
    ToolCall::new(id, call.function.name, arguments)
}

// --- NDJSON API types (internal) ---

#[derive(Debug, Serialize)]
struct NdjsonChatRequest<'a> {
    model: &'a str,
    messages: Vec<NdjsonMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<NdjsonOptions>,
}

#[derive(Debug, Serialize)]
struct NdjsonMessage<'a> {
    role: &'static str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<NdjsonToolCallOut<'a>>,
}

#[derive(Debug, Serialize)]
struct NdjsonToolCallOut<'a> {
    function: NdjsonFunctionOut<'a>,
}

#[derive(Debug, Serialize)]
struct NdjsonFunctionOut<'a> {
    name: &'a str,
    arguments: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct NdjsonOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

impl NdjsonOptions {
    fn from_sampling(sampling: &SamplingOptions) -> Option<Self> {
        if sampling.temperature.is_none() && sampling.top_p.is_none() && sampling.max_tokens.is_none()
        {
            return None;
        }
        Some(Self {
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            num_predict: sampling.max_tokens,
        })
    }
}

#[derive(Debug, Deserialize)]
struct NdjsonChatResponse {
    #[serde(default)]
    message: Option<NdjsonResponseMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct NdjsonResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<NdjsonToolCallIn>,
}

#[derive(Debug, Deserialize)]
struct NdjsonToolCallIn {
    #[serde(default)]
    id: Option<String>,
    function: NdjsonFunctionIn,
}

#[derive(Debug, Deserialize)]
struct NdjsonFunctionIn {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct NdjsonTagsResponse {
    #[serde(default)]
    models: Vec<NdjsonModel>,
}

#[derive(Debug, Deserialize)]
struct NdjsonModel {
    name: String,
}
