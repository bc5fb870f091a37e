//! `kiln models`: list what the backend can serve.

use kiln_core::{CancellationToken, ChatBackend};
use kiln_providers::HttpBackend;

use super::{CliResult, cancel_on_ctrl_c, load_config};
use crate::render::render_error;

pub async fn run() -> CliResult<()> {
    let config = load_config(None)?;
    let backend = HttpBackend::from_config(&config.backend);

    let cancel = CancellationToken::new();
    let watcher = cancel_on_ctrl_c(&cancel);
    let result = backend.list_models(&cancel).await;
    watcher.abort();

    let models = match result {
        Ok(models) => models,
        Err(e) => {
            render_error(&e);
            return Ok(());
        }
    };

    println!("Models on {}:", backend.name());
    if models.is_empty() {
        println!("  (none installed)");
    }
    let selected = config.backend.model.as_deref();
    for model in &models {
        let marker = if Some(model.as_str()) == selected { "*" } else { " " };
        println!("  {marker} {model}");
    }
    Ok(())
}
