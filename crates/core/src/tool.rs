//! Tool executor trait and the file tools the assistant can declare.
//!
//! The engine never touches the file system itself. It declares
//! `create_file` / `edit_file` to the model, hands every resulting call to
//! an injected `ToolExecutor`, and only looks at tool names to summarize
//! what was created.

use async_trait::async_trait;

use crate::error::ToolError;
use crate::message::ToolCall;
use crate::provider::ToolDefinition;

pub const CREATE_FILE: &str = "create_file";
pub const EDIT_FILE: &str = "edit_file";

/// Executes tool calls on behalf of the engine.
///
/// Implementations must be safe to invoke concurrently for distinct calls
/// within one round.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute one call. The success value is opaque to the engine and is
    /// handed back to the model as the tool result.
    async fn execute(&self, call: &ToolCall) -> std::result::Result<serde_json::Value, ToolError>;
}

/// Whether a successful call of this tool created a file.
pub fn creates_file(tool_name: &str) -> bool {
    tool_name == CREATE_FILE
}

fn file_tool(name: &str, description: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path relative to the project root"
                },
                "content": {
                    "type": "string",
                    "description": "Full file content"
                }
            },
            "required": ["file_path", "content"]
        }),
    }
}

/// Declarations for the built-in file tools.
pub fn file_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        file_tool(CREATE_FILE, "Create a new file in the project with the given content"),
        file_tool(EDIT_FILE, "Replace the content of an existing project file"),
    ]
}
