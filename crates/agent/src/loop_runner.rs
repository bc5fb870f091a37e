//! The tool-call loop: one user turn, start to finish.

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use kiln_config::{CallClass, EngineConfig};
use kiln_core::tool::{CREATE_FILE, creates_file, file_tool_definitions};
use kiln_core::{
    AssistantReply, CancellationToken, ChatBackend, ChatMessage, ChatRequest, EngineError,
    Result, RetryPolicy, SamplingOptions, ToolCall, ToolCallOrigin, ToolDefinition,
    ToolExecutionError, ToolExecutor,
};
use tracing::{debug, info, warn};

use crate::progress::{ProgressSink, TurnEvent};

/// The caller-owned inputs of one turn.
#[derive(Debug, Clone, Copy)]
pub struct TurnRequest<'a> {
    /// Assembled system preamble; empty means no system message
    pub preamble: &'a str,

    /// Prior visible transcript, oldest first
    pub history: &'a [ChatMessage],

    pub user_message: &'a str,
}

/// Per-turn settings. The engine keeps no "current model" of its own.
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub model: Option<String>,
    pub sampling: SamplingOptions,
    pub policy: RetryPolicy,
    /// Stream the first dispatch; synthesis never streams
    pub streaming: bool,
}

impl TurnSettings {
    pub fn from_config(config: &EngineConfig, class: CallClass) -> Self {
        Self {
            model: config.backend.model.clone(),
            sampling: config.sampling.options(),
            policy: config.retry_policy(class),
            streaming: class == CallClass::Chat,
        }
    }
}

/// The outcome of one executed tool call.
struct ToolOutcome {
    call: ToolCall,
    output: String,
    success: bool,
}

/// Runs turns against a backend, executing tool calls through the injected
/// executor. At most one tool round per turn.
pub struct ToolCallLoop {
    backend: Arc<dyn ChatBackend>,
    executor: Arc<dyn ToolExecutor>,
    tools: Vec<ToolDefinition>,
}

impl ToolCallLoop {
    /// Create a loop that declares the built-in file tools.
    pub fn new(backend: Arc<dyn ChatBackend>, executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            backend,
            executor,
            tools: file_tool_definitions(),
        }
    }

    /// Replace the declared tools. An empty list disables tool calling.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Run one turn.
    ///
    /// 1. Compose preamble, history and the user message
    /// 2. Dispatch with tool declarations (streamed if requested)
    /// 3. No tool calls: that reply is final
    /// 4. Otherwise execute every call concurrently
    /// 5. Synthesize once, non-streaming, with tools disabled
    /// 6. Append a summary of created files
    ///
    /// A failing tool becomes an error tool result; a failing dispatch or
    /// synthesis fails the turn.
    pub async fn run_turn(
        &self,
        turn: TurnRequest<'_>,
        settings: &TurnSettings,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<AssistantReply> {
        let model = settings
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| EngineError::PreconditionFailed("no model selected".into()))?;

        // ── Compose ────────────────────────────────────────────────────────
        let mut messages = Vec::with_capacity(turn.history.len() + 2);
        if !turn.preamble.is_empty() {
            messages.push(ChatMessage::system(turn.preamble));
        }
        messages.extend_from_slice(turn.history);
        messages.push(ChatMessage::user(turn.user_message));

        info!(
            backend = %self.backend.name(),
            model,
            history = turn.history.len(),
            streaming = settings.streaming,
            "Starting turn"
        );

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        // ── Dispatch ───────────────────────────────────────────────────────
        let request = ChatRequest::new(model, messages.clone())
            .streaming(settings.streaming)
            .with_tools(self.tools.clone())
            .with_sampling(settings.sampling);

        let (content, mut tool_calls) = if settings.streaming {
            self.dispatch_streaming(request, settings, sink, cancel).await?
        } else {
            let reply = self.backend.complete(request, &settings.policy, cancel).await?;
            (reply.content, reply.tool_calls)
        };

        // ── Inspect ────────────────────────────────────────────────────────
        if tool_calls.is_empty() {
            let reply = AssistantReply::new(content, Vec::new());
            sink.emit(TurnEvent::Done {
                reply_id: reply.id.clone(),
                tool_calls_made: 0,
                synthesized: false,
            });
            info!(reply_id = %reply.id, "Turn complete");
            return Ok(reply);
        }

        // ── Execute ────────────────────────────────────────────────────────
        ensure_unique_ids(&mut tool_calls);
        debug!(tool_count = tool_calls.len(), "Executing tool calls");
        for call in &tool_calls {
            sink.emit(TurnEvent::ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                origin: call.origin,
            });
        }

        let outcomes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            outcomes = self.execute_all(&tool_calls) => outcomes,
        };
        for outcome in &outcomes {
            sink.emit(TurnEvent::ToolResult {
                id: outcome.call.id.clone(),
                name: outcome.call.name.clone(),
                output: outcome.output.clone(),
                success: outcome.success,
            });
        }

        // ── Synthesize ─────────────────────────────────────────────────────
        messages.push(ChatMessage::assistant_with_tools(
            content.clone(),
            tool_calls.clone(),
        ));
        for outcome in &outcomes {
            messages.push(ChatMessage::tool_result(
                outcome.call.id.clone(),
                outcome.output.clone(),
            ));
        }

        let synthesis = ChatRequest::new(model, messages).with_sampling(settings.sampling);
        let reply = self
            .backend
            .complete(synthesis, &settings.policy, cancel)
            .await?;
        if !reply.tool_calls.is_empty() {
            warn!(
                count = reply.tool_calls.len(),
                "Ignoring tool calls requested during synthesis"
            );
        }

        // ── Done ───────────────────────────────────────────────────────────
        let mut text = compose_reply_text(&content, &tool_calls, &reply.content);
        if let Some(summary) = created_files_summary(&outcomes) {
            text.push_str(&summary);
        }

        let reply = AssistantReply::new(text, tool_calls);
        sink.emit(TurnEvent::Done {
            reply_id: reply.id.clone(),
            tool_calls_made: reply.tool_calls.len(),
            synthesized: true,
        });
        info!(
            reply_id = %reply.id,
            tool_calls = reply.tool_calls.len(),
            failed = outcomes.iter().filter(|o| !o.success).count(),
            "Turn complete after tool round"
        );
        Ok(reply)
    }

    async fn dispatch_streaming(
        &self,
        request: ChatRequest,
        settings: &TurnSettings,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(String, Vec<ToolCall>)> {
        let mut stream = self.backend.stream(request, &settings.policy, cancel).await?;
        let mut content = String::new();
        let mut tool_calls = Vec::new();

        while let Some(delta) = stream.next().await {
            let delta = delta?;
            if !delta.content.is_empty() {
                content.push_str(&delta.content);
                sink.emit(TurnEvent::Delta {
                    content: delta.content,
                });
            }
            tool_calls.extend(delta.tool_calls);
        }

        Ok((content, tool_calls))
    }

    /// Run every call concurrently and wait for all of them.
    async fn execute_all(&self, calls: &[ToolCall]) -> Vec<ToolOutcome> {
        let runs = calls.iter().map(|call| async move {
            let result = self.executor.execute(call).await;
            (call, result)
        });

        futures::future::join_all(runs)
            .await
            .into_iter()
            .map(|(call, result)| match result {
                Ok(value) => {
                    let output = match value {
                        serde_json::Value::String(text) => text,
                        other => other.to_string(),
                    };
                    ToolOutcome {
                        call: call.clone(),
                        output,
                        success: true,
                    }
                }
                Err(e) => {
                    let failure = ToolExecutionError::new(call.id.clone(), &e);
                    warn!(
                        tool = %call.name,
                        call_id = %failure.call_id,
                        error = %failure.message,
                        "Tool execution failed"
                    );
                    ToolOutcome {
                        call: call.clone(),
                        output: format!("Error: {}", failure.message),
                        success: false,
                    }
                }
            })
            .collect()
    }
}

/// The text shown for a turn that went through a tool round.
///
/// Text that accompanied structured calls is kept ahead of the synthesized
/// answer. Text-scanned calls were written into that text, so it is dropped.
fn compose_reply_text(first: &str, calls: &[ToolCall], synthesized: &str) -> String {
    let scanned = calls.iter().any(|c| c.origin == ToolCallOrigin::TextScan);
    // Kept verbatim: it is exactly what was streamed
    if scanned || first.trim().is_empty() {
        synthesized.to_string()
    } else if synthesized.trim().is_empty() {
        first.to_string()
    } else {
        format!("{first}\n\n{synthesized}")
    }
}

/// Give every call a distinct, non-empty id so each tool result pairs with
/// exactly one call.
fn ensure_unique_ids(calls: &mut [ToolCall]) {
    let mut seen = HashSet::new();
    for (index, call) in calls.iter_mut().enumerate() {
        if !call.id.is_empty() && seen.insert(call.id.clone()) {
            continue;
        }
        let base = if call.id.is_empty() { "call" } else { call.id.as_str() };
        let mut candidate = format!("{base}_{index}");
        let mut n = 0;
        while seen.contains(&candidate) {
            n += 1;
            candidate = format!("{base}_{index}_{n}");
        }
        warn!(original = %call.id, id = %candidate, "Reassigned tool call id");
        seen.insert(candidate.clone());
        call.id = candidate;
    }
}

fn created_files_summary(outcomes: &[ToolOutcome]) -> Option<String> {
    let paths: Vec<String> = outcomes
        .iter()
        .filter(|o| o.success && creates_file(&o.call.name))
        .map(|o| {
            o.call
                .string_argument("file_path")
                .unwrap_or_else(|| format!("(unnamed {CREATE_FILE} result)"))
        })
        .collect();

    if paths.is_empty() {
        return None;
    }

    let mut summary = String::from("\n\nCreated files:");
    for path in paths {
        summary.push_str("\n- ");
        summary.push_str(&path);
    }
    Some(summary)
}
