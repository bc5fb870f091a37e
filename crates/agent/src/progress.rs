//! Turn progress events.
//!
//! `TurnEvent` is what the tool-call loop reports while a turn runs: text
//! deltas for live rendering, tool activity and completion. Sinks must not
//! block; the loop emits and moves on.

use kiln_core::ToolCallOrigin;
use serde::{Deserialize, Serialize};

/// Events emitted during one turn.
///
/// - `delta`: a piece of streamed assistant text
/// - `tool_call`: the model asked for a tool
/// - `tool_result`: a tool finished (or failed)
/// - `done`: the reply is final
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Partial text from the model.
    Delta { content: String },

    /// The model requested a tool call.
    ToolCall {
        id: String,
        name: String,
        origin: ToolCallOrigin,
    },

    /// A tool call completed.
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// The turn produced its final reply.
    Done {
        reply_id: String,
        tool_calls_made: usize,
        synthesized: bool,
    },
}

impl TurnEvent {
    /// Stable event name for UI forwarding.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Delta { .. } => "delta",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
        }
    }
}

/// Receives turn events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: TurnEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(TurnEvent) + Send + Sync,
{
    fn emit(&self, event: TurnEvent) {
        self(event)
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: TurnEvent) {}
}
