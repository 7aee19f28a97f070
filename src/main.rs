//! # Focus Coach CLI (`coach`)
//!
//! ## Usage
//!
//! ```bash
//! coach --config ./config/coach.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `coach init` | Create the SQLite database and schema |
//! | `coach index <file>` | Index one file |
//! | `coach watch` | Index files as they appear in the watch directory |
//! | `coach embed` | Embed stored chunks that have no vector yet |
//! | `coach search "<query>"` | Query the knowledge base |
//! | `coach chat` | Interactive coaching session |
//! | `coach ask "<text>"` | One message, one answer |
//! | `coach serve` | Host the tools over REST and MCP |
//! | `coach tools` | List the built-in tools |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use focus_coach::agent::{CoachSession, TurnError};
use focus_coach::config::{self, Config};
use focus_coach::ingest::{IngestOutcome, IngestPipeline};
use focus_coach::llm::OpenAiChatClient;
use focus_coach::sqlite_store::SqliteStore;
use focus_coach::traits::ToolRegistry;
use focus_coach::{embedding, logging, migrate, retrieval, server, transport, watch};

const DEFAULT_CONFIG_PATH: &str = "./config/coach.toml";

/// Focus Coach: a local, tool-augmented focus coach.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/coach.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "coach",
    about = "Focus Coach: a local, tool-augmented focus coach",
    version,
    long_about = "Focus Coach pairs a local OpenAI-compatible chat model with a small set of tools. \
    One of them searches a knowledge base of focus strategies that is indexed automatically as \
    text files appear in a watched directory."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/coach.toml`. When the default file does not
    /// exist, built-in defaults are used.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the chunks and chunks_fts
    /// tables. Safe to run repeatedly.
    Init,

    /// Index a single file.
    ///
    /// Skipped when chunks from a file with the same name are already
    /// stored.
    Index {
        /// Path to a text file.
        file: PathBuf,
    },

    /// Watch a directory and index new files as they appear.
    ///
    /// Runs until Ctrl-C. Files already in the directory are indexed first
    /// unless `[watch] backfill = false`.
    Watch {
        /// Directory to watch (overrides `[watch] dir`).
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Embed stored chunks that have no vector from the configured model.
    ///
    /// Needs `[embedding] provider` set. Ingestion embeds new chunks on
    /// its own; this fills the gaps left by an unreachable embedding
    /// server or a model change.
    Embed,

    /// Search the knowledge base.
    Search {
        /// Search query text.
        query: String,

        /// Maximum number of strategies (overrides `[retrieval] top_k`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Start an interactive coaching session.
    ///
    /// Type `exit` or `quit` (or send EOF) to end the session.
    Chat,

    /// Send one message and print the coach's answer.
    Ask {
        /// The message.
        text: String,
    },

    /// Host the built-in tools over REST (`/tools/*`) and MCP (`/mcp`).
    Serve,

    /// List the built-in tools.
    Tools,
}

fn load(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
        return Ok(Config::minimal());
    }
    config::load_config(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index { file } => {
            let store = Arc::new(SqliteStore::open(&cfg).await?);
            let pipeline = IngestPipeline::from_config(&cfg, store)?;
            match pipeline.process_file(&file).await? {
                IngestOutcome::Indexed { source, chunks } => {
                    println!("Indexed '{}' with {} chunks.", source, chunks)
                }
                IngestOutcome::AlreadyIndexed { source } => {
                    println!("'{}' is already indexed.", source)
                }
                IngestOutcome::Ignored { path } => {
                    println!("Ignored {} (directory or not matching include_globs).", path.display())
                }
            }
        }
        Commands::Watch { dir } => {
            let store = Arc::new(SqliteStore::open(&cfg).await?);
            let pipeline = Arc::new(IngestPipeline::from_config(&cfg, store)?);
            let dir = dir.unwrap_or_else(|| cfg.watch.dir.clone());
            println!("Watching {} (Ctrl-C to stop)", dir.display());
            watch::run(pipeline, &dir, cfg.watch.backfill, std::future::pending()).await?;
        }
        Commands::Embed => {
            let Some(embedder) = embedding::create_embedder(&cfg.embedding)? else {
                bail!("Embedding provider is disabled. Set [embedding] provider in config.");
            };
            let store = SqliteStore::open(&cfg).await?;
            let report =
                embedding::embed_pending(&store, embedder.as_ref(), cfg.embedding.batch_size)
                    .await?;
            println!("embed pending");
            println!("  model: {}", embedder.model_name());
            println!("  pending: {}", report.pending);
            println!("  embedded: {}", report.embedded);
            println!("  failed: {}", report.failed);
        }
        Commands::Search { query, limit } => {
            let store = SqliteStore::open(&cfg).await?;
            let k = limit.unwrap_or(cfg.retrieval.top_k);
            if k == 0 {
                bail!("--limit must be >= 1");
            }
            let embedder = embedding::create_embedder(&cfg.embedding)?;
            let semantic = embedder
                .as_deref()
                .map(|e| retrieval::Semantic::new(e, &cfg.retrieval));
            let text = retrieval::search(
                &store,
                semantic,
                &query,
                k,
                &cfg.retrieval.no_results_message,
            )
            .await;
            println!("{}", text);
        }
        Commands::Chat => {
            let mut session = start_session(&cfg).await?;
            run_chat(&mut session).await?;
        }
        Commands::Ask { text } => {
            let mut session = start_session(&cfg).await?;
            let reply = session.run_turn(&text).await?;
            println!("{}", reply);
        }
        Commands::Serve => {
            let store = Arc::new(SqliteStore::open(&cfg).await?);
            server::run_server(&cfg, store).await?;
        }
        Commands::Tools => {
            let registry = ToolRegistry::with_builtins()?;
            for t in registry.tools() {
                println!("{:<24} {}", t.name(), t.description());
            }
        }
    }

    Ok(())
}

async fn start_session(cfg: &Config) -> Result<CoachSession> {
    let transport = transport::connect(cfg).await?;
    let model = Arc::new(OpenAiChatClient::new(&cfg.model)?);
    let mut session = CoachSession::from_config(cfg, model, transport);
    session.start().await?;
    Ok(session)
}

async fn run_chat(session: &mut CoachSession) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout
        .write_all(b"=== Focus Coach ready ===\nType 'exit' to quit.\n\n")
        .await?;

    loop {
        stdout.write_all(b"You: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text.eq_ignore_ascii_case("exit") || text.eq_ignore_ascii_case("quit") {
            break;
        }

        match session.run_turn(text).await {
            Ok(reply) => println!("\nCoach: {}\n", reply),
            Err(e @ (TurnError::Model(_) | TurnError::ModelTimeout(_))) => {
                println!("\n[!] The coach could not answer: {}. Please try again.\n", e)
            }
            Err(e) => println!("\n[!] {}\n", e),
        }
    }

    info!(turns = session.transcript().len(), "chat session ended");
    Ok(())
}
