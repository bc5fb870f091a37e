//! OpenAI-compatible protocol (`/v1/chat/completions` over SSE).
//!
//! Works with LM Studio, llama.cpp server, vLLM and any server exposing the
//! OpenAI chat completions shape. Sampling fields are flat; streamed lines
//! are `data: {...}` and the stream ends at `data: [DONE]`.

use kiln_core::{BackendReply, ChatMessage, ChatRequest, EngineError, Result, ToolCall};
use serde::{Deserialize, Serialize};

use super::{DecodedLine, ToolCallFragment, tool_declarations};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    pub fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages.iter().map(to_api_message).collect::<Vec<_>>(),
            "stream": request.stream,
        });

        if let Some(temperature) = request.sampling.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(top_p) = request.sampling.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(max_tokens) = request.sampling.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = tool_declarations(&request.tools);
        }

        body
    }

    pub fn parse_response(&self, body: &str) -> Result<BackendReply> {
        let api_response: ApiResponse = serde_json::from_str(body).map_err(|e| {
            EngineError::Decode(format!("invalid chat completions response: {e}"))
        })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Decode("no choices in response".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                // Some servers omit the id or send it empty
                let id = if tc.id.is_empty() {
                    format!("call_{}", uuid::Uuid::new_v4().simple())
                } else {
                    tc.id
                };
                ToolCall::new(id, tc.function.name, tc.function.arguments)
            })
            .collect();

        Ok(BackendReply {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
        })
    }

    pub fn decode_line(&self, line: &str) -> Option<DecodedLine> {
        let line = line.trim();

        // Blank separators, SSE comments and `event:` / `id:` fields
        let data = line.strip_prefix("data:")?.trim();
        if data.is_empty() {
            return None;
        }
        if data == "[DONE]" {
            return Some(DecodedLine::done());
        }

        let chunk: StreamResponse = serde_json::from_str(data).ok()?;
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Some(DecodedLine::default());
        };

        let fragments = choice
            .delta
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let (name, arguments) = match tc.function {
                    Some(f) => (f.name, f.arguments),
                    None => (None, None),
                };
                ToolCallFragment {
                    index: tc.index,
                    id: tc.id,
                    name,
                    arguments,
                }
            })
            .collect();

        Some(DecodedLine {
            content: choice.delta.content.unwrap_or_default(),
            tool_calls: Vec::new(),
            fragments,
            done: false,
        })
    }

    pub fn parse_models(&self, body: &str) -> Result<Vec<String>> {
        let list: ModelList = serde_json::from_str(body)
            .map_err(|e| EngineError::Decode(format!("invalid /v1/models response: {e}")))?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}

fn to_api_message(message: &ChatMessage) -> ApiMessage {
    let tool_calls = if message.tool_calls().is_empty() {
        None
    } else {
        Some(
            message
                .tool_calls()
                .iter()
                .map(|tc| ApiToolCall {
                    id: tc.id.clone(),
                    r#type: "function".into(),
                    function: ApiFunction {
                        name: tc.name.clone(),
                        arguments: tc.arguments.clone(),
                    },
                })
                .collect(),
        )
    };

    ApiMessage {
        role: message.role().as_str().into(),
        content: Some(message.content().to_string()),
        tool_calls,
        tool_call_id: message.tool_call_id().map(String::from),
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: ApiFunction,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDeltaBody,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDeltaBody {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::SamplingOptions;

    #[test]
    fn sampling_fields_are_flat() {
        let req = ChatRequest::new("qwen2.5-coder-7b-instruct", vec![ChatMessage::user("hi")])
            .with_sampling(SamplingOptions {
                temperature: Some(0.5),
                top_p: None,
                max_tokens: Some(256),
            })
            .streaming(true);
        let body = OpenAiAdapter.build_body(&req);
        assert_eq!(body["max_tokens"], 256);
        assert!(body["temperature"].as_f64().is_some());
        assert!(body.get("top_p").is_none());
        assert!(body.get("options").is_none());
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn tool_result_messages_carry_call_id() {
        let call = ToolCall::new("call_1", "edit_file", r#"{"file_path":"a"}"#);
        let req = ChatRequest::new(
            "m",
            vec![
                ChatMessage::assistant_with_tools("", vec![call]),
                ChatMessage::tool_result("call_1", "Error: denied"),
            ],
        );
        let body = OpenAiAdapter.build_body(&req);
        assert_eq!(body["messages"][0]["tool_calls"][0]["id"], "call_1");
        assert_eq!(
            body["messages"][0]["tool_calls"][0]["function"]["arguments"],
            r#"{"file_path":"a"}"#
        );
        assert_eq!(body["messages"][1]["tool_call_id"], "call_1");
        assert!(body["messages"][0].get("tool_call_id").is_none());
    }

    #[test]
    fn parse_reply_with_tool_calls() {
        let reply = OpenAiAdapter
            .parse_response(
                r#"{"id":"x","model":"m","choices":[{"index":0,"message":{"role":"assistant","content":null,
                "tool_calls":[{"id":"call_9","type":"function","function":{"name":"create_file","arguments":"{\"file_path\":\"b.rs\"}"}}]}}]}"#,
            )
            .unwrap();
        assert_eq!(reply.content, "");
        assert_eq!(reply.tool_calls[0].id, "call_9");
        assert_eq!(reply.tool_calls[0].string_argument("file_path").as_deref(), Some("b.rs"));
    }

    #[test]
    fn missing_or_empty_call_ids_are_generated() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null,"tool_calls":[
            {"type":"function","function":{"name":"create_file","arguments":"{}"}},
            {"id":"","type":"function","function":{"name":"edit_file","arguments":"{}"}},
            {"id":"","type":"function","function":{"name":"edit_file","arguments":"{}"}}
        ]}}]}"#;
        let reply = OpenAiAdapter.parse_response(body).unwrap();

        let ids: Vec<&str> = reply.tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.iter().all(|id| id.starts_with("call_") && id.len() > 5));
        assert_ne!(ids[1], ids[2]);
        assert_eq!(reply.tool_calls[0].name, "create_file");
    }

    #[test]
    fn empty_choices_is_a_decode_error() {
        let err = OpenAiAdapter.parse_response(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, EngineError::Decode(_)));
    }

    #[test]
    fn decode_data_line_and_sentinel() {
        let line = OpenAiAdapter
            .decode_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#)
            .unwrap();
        assert_eq!(line.content, "Hi");
        assert!(!line.done);

        assert!(OpenAiAdapter.decode_line("data: [DONE]").unwrap().done);
    }

    #[test]
    fn non_data_lines_are_skipped() {
        assert!(OpenAiAdapter.decode_line("").is_none());
        assert!(OpenAiAdapter.decode_line(": keep-alive").is_none());
        assert!(OpenAiAdapter.decode_line("event: message").is_none());
        assert!(OpenAiAdapter.decode_line("data: {broken").is_none());
    }

    #[test]
    fn tool_call_fragments_keep_their_index() {
        let line = OpenAiAdapter
            .decode_line(
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"id":"c2","function":{"name":"edit_file","arguments":"{\"fi"}}]}}]}"#,
            )
            .unwrap();
        assert_eq!(line.fragments.len(), 1);
        assert_eq!(line.fragments[0].index, 1);
        assert_eq!(line.fragments[0].name.as_deref(), Some("edit_file"));
        assert_eq!(line.fragments[0].arguments.as_deref(), Some("{\"fi"));
    }

    #[test]
    fn parse_model_list() {
        let models = OpenAiAdapter
            .parse_models(r#"{"object":"list","data":[{"id":"qwen2.5-coder-7b-instruct","object":"model"}]}"#)
            .unwrap();
        assert_eq!(models, vec!["qwen2.5-coder-7b-instruct"]);
    }
}
