//! # ragcache CLI (`rgc`)
//!
//! ## Usage
//!
//! ```bash
//! rgc --config ./config/rgc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rgc ingest <path>` | Chunk, embed and index every matching file under `path` |
//! | `rgc query "<text>"` | Retrieve the most relevant passages |
//! | `rgc cache stats` | Entry counts, sizes and ages of both cache directories |
//! | `rgc cache sweep` | Drop expired and over-capacity document cache entries |
//! | `rgc cache cleanup` | Remove cache files by age or total size |
//! | `rgc cache optimize` | Deduplicate and compact cache files |
//!
//! Set `RUST_LOG` (e.g. `RUST_LOG=ragcache=debug`) for more detail on stderr.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ragcache::{commands, config};
use tracing_subscriber::EnvFilter;

/// ragcache CLI: caching and retrieval substrate for RAG backends.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means defaults plus environment overrides.
#[derive(Parser)]
#[command(
    name = "rgc",
    about = "ragcache: cached embeddings, document cache and vector retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rgc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest documents from a directory.
    ///
    /// Files matching `ingest.include_globs` are chunked, embedded through
    /// the embedding cache and added to the vector store. Documents whose
    /// content has not changed since the last ingest are skipped.
    Ingest {
        /// Root directory to scan.
        path: PathBuf,
    },

    /// Retrieve passages relevant to a query.
    Query {
        /// Query text.
        query: String,

        /// Number of passages (defaults to `retrieval.top_k`).
        #[arg(long)]
        k: Option<usize>,

        /// Print the formatted context block instead of a result list.
        #[arg(long)]
        context: bool,

        /// Embed the query fresh, without reading or writing the embedding cache.
        #[arg(long)]
        no_cache: bool,
    },

    /// Inspect and maintain the cache directories.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry counts, sizes and ages.
    Stats,

    /// Remove expired document cache entries and enforce the entry limit.
    Sweep,

    /// Remove cache files by age and/or total size. Run while no other
    /// process is using the caches.
    Cleanup {
        /// Remove files last modified more than this many days ago.
        #[arg(long, value_parser = clap::value_parser!(i64).range(0..=config::MAX_DAYS))]
        older_than_days: Option<i64>,

        /// Then remove the oldest files until each directory fits.
        #[arg(long)]
        target_size_mb: Option<u64>,
    },

    /// Deduplicate and compact cache files.
    Optimize,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Ingest { path } => {
            commands::run_ingest(&cfg, &path).await?;
        }
        Commands::Query {
            query,
            k,
            context,
            no_cache,
        } => {
            commands::run_query(&cfg, &query, k, context, no_cache).await?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Stats => commands::run_cache_stats(&cfg).await?,
            CacheAction::Sweep => commands::run_cache_sweep(&cfg).await?,
            CacheAction::Cleanup {
                older_than_days,
                target_size_mb,
            } => commands::run_cache_cleanup(&cfg, older_than_days, target_size_mb).await?,
            CacheAction::Optimize => commands::run_cache_optimize(&cfg).await?,
        },
    }

    Ok(())
}
