//! Kiln CLI: the main entry point.
//!
//! Commands:
//! - `init`      Write a default config file
//! - `chat`      Interactive or single-message chat with tool calling
//! - `generate`  One-shot file generation from a prompt
//! - `models`    List models the backend serves
//! - `doctor`    Diagnose config and backend reachability

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

mod commands;
mod executor;
mod render;

#[derive(Parser)]
#[command(
    name = "kiln",
    about = "Kiln: a local-model coding assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override the configured model
    #[arg(short, long, global = true, env = "KILN_MODEL")]
    model: Option<String>,
}

/// Where the assistant works and what it sees.
#[derive(Args, Clone)]
pub struct ProjectArgs {
    /// Project root; file tools are confined to it
    #[arg(short = 'C', long, default_value = ".")]
    pub dir: PathBuf,

    /// Project file to include as context (repeatable)
    #[arg(short, long = "file")]
    pub files: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Chat with the assistant
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(long)]
        message: Option<String>,

        /// Wait for the full reply instead of streaming it
        #[arg(long)]
        no_stream: bool,

        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Generate files from a prompt
    Generate {
        prompt: String,

        #[command(flatten)]
        project: ProjectArgs,
    },

    /// List models available on the backend
    Models,

    /// Diagnose configuration and backend health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { force } => commands::init::run(force).await?,
        Commands::Chat {
            message,
            no_stream,
            project,
        } => commands::chat::run(cli.model, message, !no_stream, project).await?,
        Commands::Generate { prompt, project } => {
            commands::generate::run(cli.model, prompt, project).await?
        }
        Commands::Models => commands::models::run().await?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
