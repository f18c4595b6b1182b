//! Catalog maintenance commands: list, purge, dedupe, remove, edit and GPS
//! track refresh.
//!
//! Each `run_*` function opens the catalog, performs one operation and
//! prints a short report to stdout.

use std::sync::Arc;

use anyhow::{bail, Result};

use bag_catalog_core::models::CatalogEntry;

use crate::config::Config;
use crate::ingest::open_catalog;
use crate::maintenance::EntryEdit;
use crate::reconcile::TrackUpdate;
use crate::status::StatusSink;

pub async fn run_list(
    config: &Config,
    status: Arc<dyn StatusSink>,
    missing_only: bool,
) -> Result<()> {
    let catalog = open_catalog(config, status).await?;
    let entries = if missing_only {
        catalog.store().find_all_missing().await?
    } else {
        catalog.store().find_all().await?
    };

    if entries.is_empty() {
        println!("No bags cataloged.");
        return Ok(());
    }

    println!(
        "{:>5}  {:<40} {:>10} {:>9}  {:<7} {}",
        "ID", "FILE", "MESSAGES", "DURATION", "FLAGS", "LOCATION"
    );
    for entry in &entries {
        print_entry(entry);
    }
    println!();
    println!("{} bag(s)", entries.len());
    Ok(())
}

fn print_entry(entry: &CatalogEntry) {
    let mut flags = String::new();
    if entry.missing {
        flags.push('M');
    }
    if entry.compressed {
        flags.push('C');
    }
    if entry.has_track {
        flags.push('G');
    }
    println!(
        "{:>5}  {:<40} {:>10} {:>8.1}s  {:<7} {}",
        entry.id.unwrap_or_default(),
        entry.full_path().display(),
        entry.message_count,
        entry.duration_secs,
        flags,
        entry.location_name.as_deref().unwrap_or("-")
    );
}

pub async fn run_purge_missing(config: &Config, status: Arc<dyn StatusSink>) -> Result<()> {
    let catalog = open_catalog(config, status).await?;
    let removed = catalog.purge_missing().await?;
    println!("purge-missing");
    println!("  removed: {}", removed);
    println!("ok");
    Ok(())
}

pub async fn run_dedupe(config: &Config, status: Arc<dyn StatusSink>) -> Result<()> {
    let catalog = open_catalog(config, status).await?;
    let removed = catalog.prune_duplicates().await?;
    println!("dedupe");
    println!("  removed: {}", removed);
    println!("ok");
    Ok(())
}

pub async fn run_remove(config: &Config, status: Arc<dyn StatusSink>, id: i64) -> Result<()> {
    let catalog = open_catalog(config, status).await?;
    if !catalog.remove_entry(id).await? {
        bail!("No bag with id {}", id);
    }
    println!("Removed bag {}.", id);
    Ok(())
}

pub async fn run_edit(
    config: &Config,
    status: Arc<dyn StatusSink>,
    id: i64,
    edit: EntryEdit,
) -> Result<()> {
    let catalog = open_catalog(config, status).await?;
    let entry = catalog.update_entry(id, &edit).await?;
    println!("Updated bag {}:", id);
    print_entry(&entry);
    Ok(())
}

pub async fn run_refresh_track(
    config: &Config,
    status: Arc<dyn StatusSink>,
    id: i64,
) -> Result<()> {
    let catalog = open_catalog(config, status).await?;
    match catalog.refresh_track(id).await? {
        TrackUpdate::Empty => println!("Bag {} has no GPS fixes.", id),
        TrackUpdate::Stored(n) => println!("Stored {} GPS points for bag {}.", n, id),
        TrackUpdate::Refused(n) => {
            println!("Bag {} already has {} GPS points; left unchanged.", id, n)
        }
    }
    Ok(())
}

/// Print the combined track of `ids` as a JSON array of `[lon, lat]`.
pub async fn run_track(config: &Config, status: Arc<dyn StatusSink>, ids: &[i64]) -> Result<()> {
    let catalog = open_catalog(config, status).await?;
    let coordinates = catalog.track_coordinates(ids).await?;
    println!("{}", serde_json::to_string(&coordinates)?);
    Ok(())
}
