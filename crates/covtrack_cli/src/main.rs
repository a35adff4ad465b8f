//! covtrack CLI
//!
//! Command-line front end for the covtrack offline-first sync engine.
//!
//! # Commands
//!
//! - `sync` - Download every missing day from a report mirror
//! - `query` - Run a query and print every emitted state
//! - `status` - Display the cache clock and stored days

mod commands;
mod error;
mod mirror;
mod store;

use clap::{Parser, Subcommand};
use commands::query::QueryShape;
use commands::sync::SyncArgs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// covtrack offline-first statistics tools.
#[derive(Parser)]
#[command(name = "covtrack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download every missing day, plus today, from a report mirror
    Sync {
        /// Reconcile up to this day (YYYY-MM-DD); defaults to the current UTC day
        #[arg(short, long)]
        today: Option<String>,

        /// Directory of `<YYYY-MM-DD>.json` reports; defaults to `<path>/mirror`
        #[arg(short, long)]
        mirror: Option<PathBuf>,

        /// First tracked day
        #[arg(short, long)]
        earliest: Option<String>,

        /// Maximum concurrent fetches
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Per-day fetch timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run a query and print every emitted state
    Query {
        /// Directory of `<YYYY-MM-DD>.json` reports; defaults to `<path>/mirror`
        #[arg(short, long)]
        mirror: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,

        #[command(subcommand)]
        shape: QueryShape,
    },

    /// Display the cache clock and stored days
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Sync {
            today,
            mirror,
            earliest,
            concurrency,
            timeout_secs,
            format,
        } => {
            let path = cli.path.ok_or("Data directory required for sync")?;
            let args = SyncArgs {
                today,
                mirror,
                earliest,
                concurrency,
                timeout_secs,
                format,
            };
            commands::sync::run(&path, args).await?;
        }
        Commands::Query {
            mirror,
            format,
            shape,
        } => {
            let path = cli.path.ok_or("Data directory required for query")?;
            commands::query::run(&path, mirror, shape, &format).await?;
        }
        Commands::Status { format } => {
            let path = cli.path.ok_or("Data directory required for status")?;
            commands::status::run(&path, &format).await?;
        }
        Commands::Version => {
            println!("covtrack CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
