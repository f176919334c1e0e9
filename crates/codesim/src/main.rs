//! # codesim CLI
//!
//! Ingest source files into a SQLite corpus and score their similarity.
//!
//! ## Usage
//!
//! ```bash
//! codesim --config ./config/codesim.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `codesim init` | Create the SQLite database and run migrations |
//! | `codesim ingest --language L <paths...>` | Ingest every matching file as one batch |
//! | `codesim upload --language L <file>` | Upload and vectorize one file immediately |
//! | `codesim compare <a> <b>` | Similarity of two documents |
//! | `codesim corpus <id>` | Rank one page of the corpus against a document |
//! | `codesim batch <id> --ids a,b,c` | Rank an explicit list of documents |
//! | `codesim list` | List stored documents |
//! | `codesim vectorize` | Backfill missing trigram vectors |
//! | `codesim stats` | Corpus statistics |
//! | `codesim purge --yes` | Delete every stored document |
//!
//! Logs go to stderr; set `RUST_LOG` (default `info`) to adjust.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use codesim::{commands, config, migrate, stats};

/// codesim: source-code similarity detection.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Only `[db] path` is required.
#[derive(Parser)]
#[command(
    name = "codesim",
    about = "codesim: source-code similarity detection with trigram vectors",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/codesim.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest files and directories as one batch.
    ///
    /// Directories are walked recursively; only files with the language's
    /// extensions are kept. Identical normalized content is stored once.
    Ingest {
        /// Language of every file in the batch (e.g. JAVA, PYTHON, CPP).
        #[arg(long, short)]
        language: String,

        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Upload one file and compute its vector immediately.
    Upload {
        #[arg(long, short)]
        language: String,

        file: PathBuf,
    },

    /// Print the similarity of two documents as a percentage.
    Compare { a: i64, b: i64 },

    /// Rank one page of the corpus against a target document.
    Corpus {
        /// Target document id.
        id: i64,

        /// Zero-based page number.
        #[arg(long, default_value = "0")]
        page: u32,

        /// Page size (defaults to `compare.page_size`).
        #[arg(long)]
        size: Option<u32>,

        /// Only compare documents of this language.
        #[arg(long)]
        language: Option<String>,

        /// Drop results below this percentage.
        #[arg(long)]
        min: Option<f64>,
    },

    /// Rank an explicit list of documents against a target.
    Batch {
        /// Target document id.
        id: i64,

        /// Comma-separated candidate ids.
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<i64>,

        #[arg(long)]
        language: Option<String>,

        #[arg(long)]
        min: Option<f64>,
    },

    /// List stored documents.
    List {
        #[arg(long, default_value = "0")]
        page: u32,

        #[arg(long, default_value = "20")]
        size: u32,

        #[arg(long)]
        language: Option<String>,
    },

    /// Compute trigram vectors for documents that have none yet.
    Vectorize {
        /// Maximum documents to process.
        #[arg(long, default_value = "1000")]
        limit: usize,
    },

    /// Show corpus statistics.
    Stats,

    /// Delete every stored document.
    Purge {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { language, paths } => {
            commands::run_ingest(&cfg, &language, &paths).await?;
        }
        Commands::Upload { language, file } => {
            commands::run_upload(&cfg, &language, &file).await?;
        }
        Commands::Compare { a, b } => {
            commands::run_compare(&cfg, a, b).await?;
        }
        Commands::Corpus {
            id,
            page,
            size,
            language,
            min,
        } => {
            commands::run_corpus(&cfg, id, page, size, language, min).await?;
        }
        Commands::Batch {
            id,
            ids,
            language,
            min,
        } => {
            commands::run_batch(&cfg, id, ids, language, min).await?;
        }
        Commands::List {
            page,
            size,
            language,
        } => {
            commands::run_list(&cfg, page, size, language).await?;
        }
        Commands::Vectorize { limit } => {
            commands::run_vectorize(&cfg, limit).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Purge { yes } => {
            commands::run_purge(&cfg, yes).await?;
        }
    }

    Ok(())
}
