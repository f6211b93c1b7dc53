//! Windlass CLI - the main entry point.
//!
//! Commands:
//! - `chat` - Interactive agent chat or single-message mode

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "windlass",
    about = "Windlass - a tool-calling agent for the Anthropic Messages API",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Approve tool invocations without prompting
        #[arg(long)]
        auto_confirm: bool,

        /// Resume a conversation from a snapshot file
        #[arg(long)]
        resume: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Chat {
            message,
            auto_confirm,
            resume,
        } => commands::chat::run(message, auto_confirm, resume).await?,
    }

    Ok(())
}
