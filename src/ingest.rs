//! The `bagcat scan` command.
//!
//! Opens the SQLite catalog, runs one scan over the configured roots (or the
//! paths given on the command line) and prints the per-outcome counts.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::scan::ScanOptions;
use crate::sqlite_store::SqliteStore;
use crate::status::StatusSink;

/// Build a [`Catalog`] over the configured SQLite database, creating the
/// schema if it does not exist yet.
pub async fn open_catalog(config: &Config, status: Arc<dyn StatusSink>) -> Result<Catalog> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool));
    Catalog::from_config(config, store, status)
}

/// Run a scan and print its summary.
///
/// With explicit `paths`, only those files and directories are reconciled
/// and nothing is flagged missing for not having been seen.
pub async fn run_scan(
    config: &Config,
    status: Arc<dyn StatusSink>,
    paths: Vec<PathBuf>,
    force: bool,
) -> Result<()> {
    let catalog = Arc::new(open_catalog(config, status).await?);

    let mut options = ScanOptions::from_config(&config.scan);
    options.force = force;
    if !paths.is_empty() {
        options.roots = paths;
        options.mark_missing = false;
    }

    let summary = catalog.scan(&options).await?;

    println!("scan{}", if force { " (forced)" } else { "" });
    println!("  files processed: {}", summary.processed);
    println!("  skipped: {}", summary.skipped);
    println!("  inserted: {}", summary.inserted);
    println!("  relocated: {}", summary.relocated);
    println!("  refreshed: {}", summary.refreshed);
    println!("  duplicates: {}", summary.duplicates);
    println!("  failed: {}", summary.failed);
    println!("  missing: {}", summary.missing);
    println!("ok");

    Ok(())
}
