//! # Bag Catalog CLI (`bagcat`)
//!
//! The `bagcat` binary maintains a catalog of recorded bag files. It
//! provides commands for database initialization, scanning, and catalog
//! maintenance.
//!
//! ## Usage
//!
//! ```bash
//! bagcat --config ./config/bagcat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bagcat init` | Create the SQLite database and run schema migrations |
//! | `bagcat scan [PATHS...]` | Reconcile bag files against the catalog |
//! | `bagcat list` | List cataloged bags |
//! | `bagcat purge-missing` | Delete entries whose file is gone |
//! | `bagcat dedupe` | Delete all but one entry per content id |
//! | `bagcat remove <id>` | Delete one entry |
//! | `bagcat edit <id>` | Set description, vehicle or location |
//! | `bagcat refresh-track <id>` | Re-read a bag's GPS track |
//! | `bagcat track <ids...>` | Print the combined GPS track as JSON |
//! | `bagcat stats` | Catalog overview |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `bag_catalog=info`).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bag_catalog::maintenance::EntryEdit;
use bag_catalog::status::StatusMode;
use bag_catalog::{commands, config, ingest, migrate, stats};

/// Bag Catalog CLI: catalog recorded bag files by content.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/bagcat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "bagcat",
    about = "Bag Catalog — catalogs recorded bag files into a metadata store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/bagcat.toml")]
    config: PathBuf,

    /// Status output on stderr: off, human or json.
    ///
    /// Defaults to human when stderr is a terminal, otherwise off.
    #[arg(long, global = true, value_enum)]
    status: Option<StatusMode>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Scan for bag files and reconcile them with the catalog.
    ///
    /// Without paths, scans the configured roots and flags entries under
    /// them whose file was not found. With paths, only those files and
    /// directories are reconciled.
    Scan {
        /// Files or directories to scan instead of the configured roots.
        paths: Vec<PathBuf>,

        /// Re-read files that are already cataloged at their path.
        #[arg(long)]
        force: bool,
    },

    /// List cataloged bags.
    List {
        /// Only show entries whose file is missing.
        #[arg(long)]
        missing: bool,
    },

    /// Delete every entry flagged missing.
    PurgeMissing,

    /// Delete duplicate entries, keeping the oldest for each content id.
    Dedupe,

    /// Delete one entry and everything it owns.
    Remove {
        /// Catalog entry id.
        id: i64,
    },

    /// Edit an entry's descriptive metadata.
    Edit {
        /// Catalog entry id.
        id: i64,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        vehicle: Option<String>,

        /// Human-readable location name.
        #[arg(long)]
        location: Option<String>,
    },

    /// Re-read an entry's GPS track and store it if none is stored yet.
    RefreshTrack {
        /// Catalog entry id.
        id: i64,
    },

    /// Print the time-ordered GPS track of one or more entries as JSON.
    Track {
        /// Catalog entry ids.
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Show catalog statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bag_catalog=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let status = cli.status.unwrap_or_else(StatusMode::default_for_tty).sink();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Scan { paths, force } => {
            ingest::run_scan(&cfg, status, paths, force).await?;
        }
        Commands::List { missing } => {
            commands::run_list(&cfg, status, missing).await?;
        }
        Commands::PurgeMissing => {
            commands::run_purge_missing(&cfg, status).await?;
        }
        Commands::Dedupe => {
            commands::run_dedupe(&cfg, status).await?;
        }
        Commands::Remove { id } => {
            commands::run_remove(&cfg, status, id).await?;
        }
        Commands::Edit {
            id,
            description,
            vehicle,
            location,
        } => {
            let edit = EntryEdit {
                description,
                vehicle,
                location_name: location,
                ..Default::default()
            };
            commands::run_edit(&cfg, status, id, edit).await?;
        }
        Commands::RefreshTrack { id } => {
            commands::run_refresh_track(&cfg, status, id).await?;
        }
        Commands::Track { ids } => {
            commands::run_track(&cfg, status, &ids).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
