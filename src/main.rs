//! # Doc Harvester CLI (`harv`)
//!
//! The `harv` binary is the primary interface for Doc Harvester. It provides
//! commands for database initialization, document harvesting, search,
//! document retrieval, embedding management, store integrity checks, and
//! starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! harv --config ./config/harv.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harv init` | Create the SQLite database and run schema migrations |
//! | `harv sources` | List connectors and their health status |
//! | `harv harvest <connector>` | Ingest documents from a connector (filesystem, http) |
//! | `harv search "<query>"` | Search indexed documents |
//! | `harv get <id>` | Retrieve a full document by UUID |
//! | `harv embed pending` | Backfill missing or stale embeddings |
//! | `harv embed rebuild` | Delete and regenerate all embeddings |
//! | `harv qa` | Check store invariants, exit non-zero on violations |
//! | `harv stats` | Show corpus counts and embedding coverage |
//! | `harv export` | Dump documents and chunks as JSON |
//! | `harv serve http` | Start the HTTP API server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use doc_harvester::{
    config, embed_cmd, export, get, ingest, migrate, qa, search, server, sources, stats,
};

/// Doc Harvester CLI — a local-first document harvesting and retrieval
/// pipeline.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/harv.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "harv",
    about = "Doc Harvester — a local-first document harvesting and retrieval pipeline",
    version,
    long_about = "Doc Harvester provides a connector-driven pipeline for harvesting documents \
    from local files and web pages, extracting text from PDF/Office/HTML formats, chunking them \
    along structural boundaries, optionally embedding them, and exposing hybrid search \
    (keyword + semantic) via a CLI and HTTP server."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/harv.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, chunks, checkpoints, chunks_fts, embeddings,
    /// chunk_vectors). This command is idempotent.
    Init,

    /// List available connectors and their status.
    Sources,

    /// Harvest documents from a connector.
    ///
    /// Scans the specified connector, extracts text, chunks documents along
    /// structural boundaries, optionally embeds them, and stores everything
    /// in SQLite. Incremental by default via checkpoints.
    Harvest {
        /// Connector name: `filesystem` or `http`.
        connector: String,

        /// Ignore checkpoint — reharvest all items from scratch.
        #[arg(long)]
        full: bool,

        /// Dry run — show item and chunk counts without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Only process items modified on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only process items modified on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        /// Maximum number of items to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Search indexed documents.
    Search {
        /// The search query string.
        query: String,

        /// Search mode: `keyword` (FTS5), `semantic` (vector), or `hybrid`
        /// (weighted merge). Semantic and hybrid modes require an embedding
        /// provider to be configured.
        #[arg(long, default_value = "keyword")]
        mode: String,

        /// Filter results to a specific connector source (e.g. `filesystem`).
        #[arg(long)]
        source: Option<String>,

        /// Only return documents updated on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Retrieve a document by its UUID.
    ///
    /// Prints the document's metadata, full body text, and all chunks with
    /// their line references.
    Get {
        /// Document UUID.
        id: String,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Check store integrity invariants.
    ///
    /// Verifies chunk index contiguity, hashes, line references, fence
    /// boundaries, FTS parity, and orphaned rows. Exits non-zero when any
    /// violation is found.
    Qa,

    /// Show corpus statistics.
    Stats,

    /// Export documents and chunks as JSON.
    Export {
        /// Output file path. Writes to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Start the HTTP API server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that are missing or have stale embeddings.
    Pending {
        /// Maximum number of chunks to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config (texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete and regenerate all embeddings.
    ///
    /// Useful when switching embedding models or dimensions.
    Rebuild {
        /// Override the batch size from config (texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

/// Server subcommands.
#[derive(Subcommand)]
enum ServeService {
    /// Start the HTTP API server on the address from `[server].bind`.
    Http,
}

fn init_tracing(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg.log.filter);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Harvest {
            connector,
            full,
            dry_run,
            since,
            until,
            limit,
        } => {
            ingest::run_harvest(&cfg, &connector, full, dry_run, since, until, limit).await?;
        }
        Commands::Search {
            query,
            mode,
            source,
            since,
            limit,
        } => {
            search::run_search(&cfg, &query, &mode, source, since, limit).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
        Commands::Qa => {
            qa::run_qa(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Export { output } => {
            export::run_export(&cfg, output.as_deref()).await?;
        }
        Commands::Serve { service } => match service {
            ServeService::Http => {
                server::run_server(&cfg).await?;
            }
        },
    }

    Ok(())
}
