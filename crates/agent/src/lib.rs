//! The turn engine of Kiln.
//!
//! A turn follows a **Compose → Dispatch → Execute → Synthesize** cycle:
//!
//! 1. **Compose** the system preamble from project context
//! 2. **Dispatch** the conversation with the file tools declared
//! 3. **If tool calls**: execute them concurrently through the host
//! 4. **Synthesize** one final answer with tools disabled
//!
//! There is never a second tool round: the synthesis reply is final.

pub mod context;
pub mod loop_runner;
pub mod progress;

pub use context::{
    AssembledContext, AssemblyInput, AssemblyMetadata, ContextAssembler, ContextCaps,
    DEFAULT_SYSTEM_PROMPT, ProjectFile, RetrievedSnippet, SupplementSection, SymbolKindSummary,
    SymbolSummary,
};
pub use loop_runner::{ToolCallLoop, TurnRequest, TurnSettings};
pub use progress::{NoopSink, ProgressSink, TurnEvent};
