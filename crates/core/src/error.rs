//! Error types for the Kiln engine.
//!
//! Uses `thiserror` for ergonomic error definitions. `EngineError` is the
//! outcome of a failed turn; `ToolError` is what an executor reports and
//! never leaves the turn.

use thiserror::Error;

/// The error a turn (or a single backend call) fails with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A request could not be built, e.g. no model is selected.
    /// Raised before any network call and never retried.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// The caller triggered the turn's cancellation token.
    #[error("Request cancelled")]
    Cancelled,

    /// The per-call deadline fired before the backend answered.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Connection-level failure (refused, reset, DNS, broken body stream).
    #[error("Network error: {0}")]
    Network(String),

    /// The backend answered with a non-2xx status.
    #[error("Backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// A non-streaming response body was not the JSON we expected.
    #[error("Failed to decode backend response: {0}")]
    Decode(String),
}

impl EngineError {
    /// Whether the retry coordinator may try again after this failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::PreconditionFailed(_))
    }

    /// Whether this failure reflects a deliberate user action.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Text for the inline assistant-role error message shown in the chat.
    ///
    /// Returns `None` for `Cancelled`: a cancelled turn ends silently.
    pub fn user_message(&self) -> Option<String> {
        let text = match self {
            Self::Cancelled => return None,
            Self::PreconditionFailed(reason) => format!(
                "No model is selected ({reason}). Choose a model in the assistant settings \
                 or run `kiln models` to see what the backend offers."
            ),
            Self::Timeout { timeout_ms } => format!(
                "The inference backend did not answer within {}s. It may still be loading the \
                 model; wait a moment and try again, or pick a smaller model.",
                timeout_ms / 1000
            ),
            Self::Network(_) => "Could not reach the inference backend. Start it (for example \
                 `ollama serve` or the LM Studio server) and check the configured endpoint."
                .to_string(),
            Self::Http { status, body } => {
                let detail = body.trim();
                if detail.is_empty() {
                    format!("The inference backend rejected the request (HTTP {status}).")
                } else {
                    format!("The inference backend rejected the request (HTTP {status}): {detail}")
                }
            }
            Self::Decode(_) => "The inference backend sent a reply that could not be read. \
                 Check that the configured provider type matches the server."
                .to_string(),
        };
        Some(text)
    }
}

/// Result type alias using our EngineError.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure reported by a tool executor for a single call.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },
}

/// A tool failure bound to the call that produced it.
///
/// Captured into the conversation as the tool-result content; never
/// returned to the caller of a turn.
#[derive(Debug, Clone, Error)]
#[error("Tool call {call_id} failed: {message}")]
pub struct ToolExecutionError {
    pub call_id: String,
    pub message: String,
}

impl ToolExecutionError {
    pub fn new(call_id: impl Into<String>, source: &ToolError) -> Self {
        Self {
            call_id: call_id.into(),
            message: source.to_string(),
        }
    }
}
