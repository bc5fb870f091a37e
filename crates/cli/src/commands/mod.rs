pub mod chat;
pub mod doctor;
pub mod generate;
pub mod init;
pub mod models;

use std::path::Path;
use std::sync::Arc;

use kiln_agent::{ProjectFile, ToolCallLoop};
use kiln_config::EngineConfig;
use kiln_core::CancellationToken;
use kiln_providers::HttpBackend;
use tokio::task::JoinHandle;

use crate::ProjectArgs;
use crate::executor::FsToolExecutor;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Load config and apply the `--model` flag.
pub(crate) fn load_config(model: Option<String>) -> CliResult<EngineConfig> {
    let mut config = EngineConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
        config.backend.model = Some(model);
    }
    Ok(config)
}

/// Build the tool-call loop for a project root.
pub(crate) fn build_loop(config: &EngineConfig, root: &Path) -> CliResult<ToolCallLoop> {
    let backend = Arc::new(HttpBackend::from_config(&config.backend));
    let executor = Arc::new(FsToolExecutor::new(root)?);
    Ok(ToolCallLoop::new(backend, executor))
}

/// Read the `--file` arguments, relative to the project root.
pub(crate) fn project_files(project: &ProjectArgs) -> CliResult<Vec<ProjectFile>> {
    project
        .files
        .iter()
        .map(|path| -> CliResult<ProjectFile> {
            let full = project.dir.join(path);
            let content = std::fs::read_to_string(&full)
                .map_err(|e| format!("Failed to read {}: {e}", full.display()))?;
            Ok(ProjectFile::new(path.display().to_string(), content))
        })
        .collect()
}

/// Cancel `cancel` on Ctrl-C. Abort the handle once the turn is over.
pub(crate) fn cancel_on_ctrl_c(cancel: &CancellationToken) -> JoinHandle<()> {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    })
}
