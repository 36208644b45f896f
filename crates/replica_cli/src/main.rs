//! Replica CLI
//!
//! Command-line sync between two directory-backed stores.
//!
//! # Commands
//!
//! - `status` - Show the watermark and per-table record counts
//! - `pull` - Pull remote changes into the local directory
//! - `push` - Push local records to the remote directory
//! - `sync` - Full pull followed by push

mod commands;
mod dir_store;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Offline-first sync between directory-backed stores.
#[derive(Parser)]
#[command(name = "replica")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Local store directory
    #[arg(global = true, short, long)]
    local: Option<PathBuf>,

    /// Remote store directory
    #[arg(global = true, short, long)]
    remote: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the watermark and per-table record counts
    Status {
        /// Tables to report (default: all)
        #[arg(short, long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Pull remote changes into the local store
    Pull {
        /// Ignore the watermark and fetch every record
        #[arg(long)]
        full: bool,

        /// Conflict strategy (server-wins, client-wins, newer-wins[:field], merge[:field])
        #[arg(short, long, default_value = "newer-wins")]
        strategy: String,

        /// Tables to pull (default: all)
        #[arg(short, long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Push local records to the remote store
    Push {
        /// Tables to push (default: all)
        #[arg(short, long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Full pull followed by push
    Sync {
        /// Conflict strategy (server-wins, client-wins, newer-wins[:field], merge[:field])
        #[arg(short, long, default_value = "newer-wins")]
        strategy: String,

        /// Tables to sync (default: all)
        #[arg(short, long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Status { tables, format } => {
            let local = cli.local.ok_or("Local directory required for status")?;
            commands::status::run(&local, cli.remote.as_deref(), &tables, &format)?;
        }
        Commands::Pull {
            full,
            strategy,
            tables,
            format,
        } => {
            let local = cli.local.ok_or("Local directory required for pull")?;
            let remote = cli.remote.ok_or("Remote directory required for pull")?;
            commands::pull::run(&local, &remote, &tables, full, &strategy, &format)?;
        }
        Commands::Push { tables, format } => {
            let local = cli.local.ok_or("Local directory required for push")?;
            let remote = cli.remote.ok_or("Remote directory required for push")?;
            commands::push::run(&local, &remote, &tables, &format)?;
        }
        Commands::Sync {
            strategy,
            tables,
            format,
        } => {
            let local = cli.local.ok_or("Local directory required for sync")?;
            let remote = cli.remote.ok_or("Remote directory required for sync")?;
            commands::sync::run(&local, &remote, &tables, &strategy, &format)?;
        }
        Commands::Version => {
            println!("Replica CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
