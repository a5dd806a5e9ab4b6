//! docpilot CLI — the main entry point.
//!
//! Commands:
//! - `init` — Write a default config file
//! - `chat` — Interactive chat over ingested documents

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "docpilot",
    about = "docpilot — chat with your documents",
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
    /// Write a default configuration file
    Init,

    /// Chat with the ingested documents
    Chat {
        /// JSON file of extracted chunk records: [{"content": ..., "source": ...}]
        #[arg(long)]
        chunks: Vec<PathBuf>,

        /// JSON file with one column-typed table
        #[arg(long)]
        table: Option<PathBuf>,

        /// Override the configured model
        #[arg(short, long)]
        model: Option<String>,

        /// Send a single message instead of entering interactive mode
        #[arg(long)]
        message: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Init => commands::init::run()?,
        Commands::Chat {
            chunks,
            table,
            model,
            message,
        } => commands::chat::run(chunks, table, model, message).await?,
    }

    Ok(())
}
