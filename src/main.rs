//! # blog-search CLI
//!
//! ## Usage
//!
//! ```bash
//! blog-search --config ./config/search.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `blog-search serve` | Start the HTTP search API |
//! | `blog-search search "<query>"` | Run one hybrid search and print results |
//! | `blog-search stats` | Load the index and print a summary |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use blog_search::{config, embedding, search, server, stats};

/// Hybrid keyword and vector search for a statically generated blog.
#[derive(Parser)]
#[command(name = "blog-search", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/search.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind` and serves `/api/search`,
    /// `/api/embeddings` and `/health`.
    Serve,

    /// Search the index once and print results.
    ///
    /// Requires embedding credentials, since the query is embedded before
    /// the hybrid lookup.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of hits before per-post deduplication.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Load the index and print document, post and fingerprint details.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Search { query, limit } => {
            let embedder = embedding::create_provider(&cfg.embedding, cfg.index.dims)?;
            search::run_search(&cfg, embedder.as_ref(), &query, limit).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
