//! tabsync CLI
//!
//! Command-line tools for local tabsync stores.
//!
//! # Commands
//!
//! - `inspect` - Display tables, ETags and row counts by sync state
//! - `verify` - List tables and rows left in flight by an interrupted run
//! - `recover` - Mark interrupted work for verification on the next pass
//! - `edit` - Apply local writes through the row and table state rules
//! - `sync` - Run a pass against a remote snapshot file

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// tabsync command-line tools.
#[derive(Parser)]
#[command(name = "tabsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the local store file
    #[arg(global = true, short, long)]
    store: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display tables, ETags and row counts
    Inspect {
        /// List every row
        #[arg(short, long)]
        rows: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List tables and rows whose transaction marker is not clean
    Verify,

    /// Move in-flight markers to needs-verification
    Recover,

    /// Apply a local write
    Edit {
        #[command(subcommand)]
        action: commands::edit::EditAction,
    },

    /// Run a sync pass against a remote snapshot file
    Sync {
        /// Path to the remote snapshot (created if missing)
        #[arg(short, long)]
        remote: PathBuf,

        /// Only synchronize this table
        #[arg(short, long)]
        table: Option<String>,

        /// Rebuild the table from the server definition
        #[arg(long, requires = "table")]
        first_download: bool,

        /// Maximum rows per push call
        #[arg(long, default_value = "100")]
        batch_size: usize,

        /// Include tables not flagged for sync
        #[arg(long)]
        all_tables: bool,

        /// Skip crash recovery before the run
        #[arg(long)]
        no_recover: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

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
        Commands::Inspect { rows, format } => {
            let path = cli.store.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, rows, &format)?;
        }
        Commands::Verify => {
            let path = cli.store.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Recover => {
            let path = cli.store.ok_or("Store path required for recover")?;
            commands::recover::run(&path)?;
        }
        Commands::Edit { action } => {
            let path = cli.store.ok_or("Store path required for edit")?;
            commands::edit::run(&path, action)?;
        }
        Commands::Sync {
            remote,
            table,
            first_download,
            batch_size,
            all_tables,
            no_recover,
            format,
        } => {
            let path = cli.store.ok_or("Store path required for sync")?;
            let options = commands::sync::SyncOptions {
                table,
                first_download,
                batch_size,
                all_tables,
                recover: !no_recover,
            };
            commands::sync::run(&path, &remote, &options, &format)?;
        }
        Commands::Version => {
            println!("tabsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
