//! # Kiln Core
//!
//! Domain types, traits, and error definitions for the Kiln AI request
//! orchestration engine. This crate has **no I/O**. It defines the model
//! that the provider and agent crates implement against.
//!
//! ## Design Philosophy
//!
//! The two seams of the engine are traits here:
//! - `ChatBackend`: something that can answer a chat request
//! - `ToolExecutor`: something that can run a model-issued tool call
//!
//! The HTTP client and the IDE host implement them; tests stub them.

pub mod error;
pub mod message;
pub mod provider;
pub mod retry;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{EngineError, Result, ToolError, ToolExecutionError};
pub use message::{AssistantReply, ChatMessage, Role, ToolCall, ToolCallOrigin};
pub use provider::{
    BackendReply, ChatBackend, ChatRequest, DeltaStream, ProviderKind, SamplingOptions,
    StreamDelta, ToolDefinition,
};
pub use retry::RetryPolicy;
pub use tool::ToolExecutor;
pub use tokio_util::sync::CancellationToken;
