//! File tools, confined to one project root.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use kiln_core::tool::{CREATE_FILE, EDIT_FILE};
use kiln_core::{ToolCall, ToolError, ToolExecutor};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct FileArgs {
    file_path: String,
    content: String,
}

/// Executes `create_file` and `edit_file` inside `root`.
///
/// Absolute paths and `..` components are refused, so a call can never
/// write outside the project.
pub struct FsToolExecutor {
    root: PathBuf,
}

impl FsToolExecutor {
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            root: root.as_ref().canonicalize()?,
        })
    }

    fn resolve(&self, tool: &str, relative: &str) -> Result<PathBuf, ToolError> {
        let path = Path::new(relative);
        let escapes = path.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if relative.trim().is_empty() || escapes {
            return Err(ToolError::PermissionDenied {
                tool_name: tool.to_string(),
                reason: format!("{relative} is outside the project"),
            });
        }
        Ok(self.root.join(path))
    }

    async fn create(&self, args: FileArgs) -> Result<serde_json::Value, ToolError> {
        let path = self.resolve(CREATE_FILE, &args.file_path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| failed(CREATE_FILE, e))?;
        }
        tokio::fs::write(&path, &args.content)
            .await
            .map_err(|e| failed(CREATE_FILE, e))?;

        debug!(path = %path.display(), bytes = args.content.len(), "Created file");
        Ok(serde_json::json!({
            "file_path": args.file_path,
            "bytes": args.content.len(),
        }))
    }

    async fn edit(&self, args: FileArgs) -> Result<serde_json::Value, ToolError> {
        let path = self.resolve(EDIT_FILE, &args.file_path)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ToolError::ExecutionFailed {
                tool_name: EDIT_FILE.into(),
                reason: format!("{} does not exist", args.file_path),
            });
        }
        tokio::fs::write(&path, &args.content)
            .await
            .map_err(|e| failed(EDIT_FILE, e))?;

        debug!(path = %path.display(), bytes = args.content.len(), "Edited file");
        Ok(serde_json::json!({
            "file_path": args.file_path,
            "bytes": args.content.len(),
        }))
    }
}

fn failed(tool: &str, e: std::io::Error) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool.into(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl ToolExecutor for FsToolExecutor {
    async fn execute(&self, call: &ToolCall) -> Result<serde_json::Value, ToolError> {
        let parse = || {
            serde_json::from_str::<FileArgs>(&call.arguments)
                .map_err(|e| ToolError::InvalidArguments(format!("{}: {e}", call.name)))
        };

        match call.name.as_str() {
            CREATE_FILE => self.create(parse()?).await,
            EDIT_FILE => self.edit(parse()?).await,
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}
