//! `docpilot chat` — interactive or single-message chat mode.
//!
//! Ingestion happens here, outside the core: chunk records and tables are
//! read from JSON files that an extraction step produced earlier. The
//! session only ever sees typed records.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use docpilot_agent::{AgentSession, SessionSettings};
use docpilot_config::AppConfig;
use docpilot_core::document::{DocumentChunk, TabularDataset};
use docpilot_index::{Embedder, HashEmbedder, ProviderEmbedder};
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(
    chunk_files: Vec<PathBuf>,
    table_file: Option<PathBuf>,
    model_override: Option<String>,
    message: Option<String>,
) -> anyhow::Result<()> {
    let mut config = AppConfig::load().map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?;
    if let Some(model) = model_override {
        config.model = model;
    }

    if !config.has_api_key() && !config.offline_embeddings {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    DOCPILOT_API_KEY = 'sk-...'");
        eprintln!("    OPENAI_API_KEY   = 'sk-...'");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        anyhow::bail!("No API key found. See above for setup instructions.");
    }

    let provider = docpilot_providers::build_from_config(&config);
    let embedder: Arc<dyn Embedder> = if config.offline_embeddings {
        Arc::new(HashEmbedder::default())
    } else {
        Arc::new(ProviderEmbedder::new(
            provider.clone(),
            &config.embedding_model,
        ))
    };

    let mut session = AgentSession::new(
        provider,
        embedder,
        SessionSettings::from_config(&config),
    );

    for path in &chunk_files {
        let chunks = load_chunks(path)?;
        session.attach_chunks(chunks);
    }
    if let Some(path) = &table_file {
        session.bind_dataset(load_table(path)?);
    }

    if let Some(msg) = message {
        // Single message mode
        eprint!("  Thinking...");
        let response = session.submit(&msg).await?;
        eprint!("\r              \r");
        println!("{response}");
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  ┌────────────────────────────────────────────┐");
    println!("  │      docpilot — chat with your documents     │");
    println!("  └────────────────────────────────────────────┘");
    println!();
    println!("  Model:   {}", config.model);
    println!("  Tools:   {}", describe_tools(&session));
    println!();
    println!("{}", session.welcome_message());
    println!("  Commands: /new (fresh chat), /sessions (archived logs), /exit");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print_prompt();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();

        match input {
            "" => {}
            "/exit" | "exit" => break,
            "/new" => {
                session.reset_session();
                println!("  Started a new chat. The previous log was archived.");
            }
            "/sessions" => {
                if session.archived_sessions().is_empty() {
                    println!("  No archived sessions yet.");
                }
                for (i, turns) in session.archived_sessions().iter().enumerate() {
                    println!("  Session {i}:");
                    for turn in turns {
                        println!("    You > {}", turn.user_input);
                        println!("    docpilot > {}", turn.response);
                    }
                }
            }
            _ => {
                eprint!("  ...");
                match session.submit(input).await {
                    Ok(response) => {
                        eprint!("\r     \r");
                        println!();
                        for line in response.lines() {
                            println!("  docpilot > {line}");
                        }
                        println!();
                    }
                    Err(e) => {
                        eprint!("\r     \r");
                        eprintln!("  [Error] {e}");
                        println!();
                    }
                }
            }
        }

        print_prompt();
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

fn print_prompt() {
    use std::io::Write;
    print!("  You > ");
    let _ = std::io::stdout().flush();
}

fn describe_tools(session: &AgentSession) -> String {
    let tokens = session.registry().tokens();
    if tokens.is_empty() {
        "none (no documents ingested)".into()
    } else {
        tokens.join(", ")
    }
}

fn load_chunks(path: &Path) -> anyhow::Result<Vec<DocumentChunk>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading chunk file {}", path.display()))?;
    let chunks: Vec<DocumentChunk> = serde_json::from_str(&content)
        .with_context(|| format!("parsing chunk records in {}", path.display()))?;
    Ok(chunks)
}

fn load_table(path: &Path) -> anyhow::Result<TabularDataset> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading table file {}", path.display()))?;
    let table: TabularDataset = serde_json::from_str(&content)
        .with_context(|| format!("parsing table in {}", path.display()))?;
    if !table.is_rectangular() {
        anyhow::bail!(
            "table in {} is not rectangular: some rows do not match the column count",
            path.display()
        );
    }
    Ok(table)
}
