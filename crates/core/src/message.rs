//! Message domain types.
//!
//! A conversation is an ordered `Vec<ChatMessage>`. Messages are immutable
//! once built; tool-call and tool-result messages only live inside a single
//! orchestration call, and the visible transcript keeps the final
//! `AssistantReply` instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (preamble, project context)
    System,
    /// The IDE user
    User,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// How a tool call was recovered from a backend response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallOrigin {
    /// The backend returned a structured `tool_calls` field.
    #[default]
    Structured,
    /// Recovered by scanning the reply text.
    TextScan,
}

impl ToolCallOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::TextScan => "text_scan",
        }
    }
}

/// A model-issued request to invoke a named function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique within one response
    pub id: String,

    /// Name of the function to invoke
    pub name: String,

    /// Arguments as a JSON string; only the executor interprets them
    pub arguments: String,

    #[serde(default)]
    pub origin: ToolCallOrigin,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
            origin: ToolCallOrigin::Structured,
        }
    }

    /// Read one string argument, if the arguments parse as a JSON object.
    pub fn string_argument(&self, key: &str) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(&self.arguments).ok()?;
        value.get(key)?.as_str().map(String::from)
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    role: Role,
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// An assistant message that requests tool invocations.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// A tool result answering the call with the given id.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_call_id.as_deref()
    }
}

/// The finished output of one user turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantReply {
    pub id: String,

    /// Always `Role::Assistant`
    pub role: Role,

    pub content: String,

    /// Tool calls issued during the turn, for display
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    pub timestamp: DateTime<Utc>,
}

impl AssistantReply {
    pub fn new(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            timestamp: Utc::now(),
        }
    }

    /// The transcript entry that replaces the turn's ephemeral messages.
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::assistant(self.content.clone())
    }
}
