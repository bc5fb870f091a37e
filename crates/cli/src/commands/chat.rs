//! `kiln chat`: interactive or single-message chat mode.

use kiln_agent::{
    AssemblyInput, ContextAssembler, ContextCaps, ToolCallLoop, TurnRequest, TurnSettings,
};
use kiln_config::CallClass;
use kiln_core::{AssistantReply, CancellationToken, ChatMessage};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use super::{CliResult, build_loop, cancel_on_ctrl_c, load_config, project_files};
use crate::ProjectArgs;
use crate::render::{TerminalSink, render_error};

pub async fn run(
    model: Option<String>,
    message: Option<String>,
    streaming: bool,
    project: ProjectArgs,
) -> CliResult<()> {
    let config = load_config(model)?;
    let tool_loop = build_loop(&config, &project.dir)?;

    let files = project_files(&project)?;
    let assembler = ContextAssembler::new(ContextCaps::for_class(&config.context, CallClass::Chat));
    let context = assembler.assemble(&AssemblyInput {
        files: &files,
        ..Default::default()
    });
    debug!(
        files = context.metadata.files_included,
        truncated = context.metadata.files_truncated,
        chars = context.metadata.chars,
        "Assembled context"
    );

    let mut settings = TurnSettings::from_config(&config, CallClass::Chat);
    settings.streaming = streaming;

    if let Some(message) = message {
        run_turn(&tool_loop, &context.preamble, &[], &message, &settings).await;
        return Ok(());
    }

    println!();
    println!("  Kiln Chat");
    println!("  Backend:  {} ({})", config.backend.endpoint, config.backend.provider);
    println!(
        "  Model:    {}",
        config.backend.model.as_deref().unwrap_or("(none selected)")
    );
    println!("  Context:  {} file(s)", context.metadata.files_included);
    println!();
    println!("  Type your message and press Enter. Ctrl+C cancels a reply.");
    println!("  Type 'exit' to quit.");
    println!();

    let mut history: Vec<ChatMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"  You > ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        println!();
        if let Some(reply) =
            run_turn(&tool_loop, &context.preamble, &history, input, &settings).await
        {
            history.push(ChatMessage::user(input));
            history.push(reply.to_message());
        }
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// Run one turn with Ctrl-C wired to its cancellation token.
async fn run_turn(
    tool_loop: &ToolCallLoop,
    preamble: &str,
    history: &[ChatMessage],
    message: &str,
    settings: &TurnSettings,
) -> Option<AssistantReply> {
    let cancel = CancellationToken::new();
    let watcher = cancel_on_ctrl_c(&cancel);
    let sink = TerminalSink::new();

    let turn = TurnRequest {
        preamble,
        history,
        user_message: message,
    };
    let result = tool_loop.run_turn(turn, settings, &sink, &cancel).await;
    watcher.abort();

    match result {
        Ok(reply) => {
            sink.finish(&reply);
            Some(reply)
        }
        Err(e) => {
            if e.is_cancelled() {
                println!();
            }
            render_error(&e);
            None
        }
    }
}
