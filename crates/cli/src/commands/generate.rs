//! `kiln generate`: one-shot generation, files written through the tools.

use kiln_agent::{AssemblyInput, ContextAssembler, ContextCaps, TurnRequest, TurnSettings};
use kiln_config::CallClass;
use kiln_core::CancellationToken;

use super::{CliResult, build_loop, cancel_on_ctrl_c, load_config, project_files};
use crate::ProjectArgs;
use crate::render::{TerminalSink, render_error};

pub async fn run(model: Option<String>, prompt: String, project: ProjectArgs) -> CliResult<()> {
    let config = load_config(model)?;
    let tool_loop = build_loop(&config, &project.dir)?;

    let files = project_files(&project)?;
    let caps = ContextCaps::for_class(&config.context, CallClass::Generation);
    let context = ContextAssembler::new(caps).assemble(&AssemblyInput {
        files: &files,
        ..Default::default()
    });

    let settings = TurnSettings::from_config(&config, CallClass::Generation);
    let cancel = CancellationToken::new();
    let watcher = cancel_on_ctrl_c(&cancel);
    let sink = TerminalSink::new();

    eprint!("  Generating...");
    let result = tool_loop
        .run_turn(
            TurnRequest {
                preamble: &context.preamble,
                history: &[],
                user_message: &prompt,
            },
            &settings,
            &sink,
            &cancel,
        )
        .await;
    watcher.abort();
    eprint!("\r               \r");

    match result {
        Ok(reply) => sink.finish(&reply),
        Err(e) => render_error(&e),
    }
    Ok(())
}
