//! Explicit catalog maintenance: purging missing entries, pruning duplicate
//! content, manual edits, removals and GPS track refreshes.
//!
//! Every mutation here takes the same write lock as reconciliation.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tracing::{debug, error, info};

use bag_catalog_core::models::CatalogEntry;

use crate::catalog::Catalog;
use crate::reconcile::TrackUpdate;
use crate::status::StatusEvent;

/// Manual metadata edit. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct EntryEdit {
    pub description: Option<String>,
    pub vehicle: Option<String>,
    pub location_name: Option<String>,
    pub latitude_deg: Option<f64>,
    pub longitude_deg: Option<f64>,
}

impl Catalog {
    /// Delete every entry still flagged missing. Returns how many were
    /// removed; a failure on one entry is reported and the purge goes on.
    pub async fn purge_missing(&self) -> Result<u64> {
        info!("removing missing bags");
        self.report(StatusEvent::Working("Removing missing bag entries.".into()));

        let _guard = self.lock().await;
        let missing = self.store.find_all_missing().await?;
        let mut removed = 0;
        for entry in &missing {
            let Some(id) = entry.id else { continue };
            match self.store.delete(id).await {
                Ok(true) => removed += 1,
                Ok(false) => debug!(id, "missing bag was already removed"),
                Err(e) => {
                    let msg = format!("Error removing bag {}: {:#}", id, e);
                    error!("{}", msg);
                    self.report(StatusEvent::Error(msg));
                }
            }
        }

        let msg = format!("Removed {} bags.", removed);
        debug!("{}", msg);
        self.report(StatusEvent::Idle(msg));
        Ok(removed)
    }

    /// Keep the lowest-id entry for each content id and delete the rest.
    /// Running it again changes nothing.
    pub async fn prune_duplicates(&self) -> Result<u64> {
        let msg = "Removing duplicate bag files.";
        info!("{}", msg);
        self.report(StatusEvent::Working(msg.to_string()));

        let _guard = self.lock().await;
        let mut entries = self.store.find_all().await?;
        entries.sort_by_key(|e| e.id);

        let mut groups: HashMap<&str, Vec<&CatalogEntry>> = HashMap::new();
        for entry in &entries {
            groups.entry(entry.content_id.as_str()).or_default().push(entry);
        }
        info!(
            bags = entries.len(),
            distinct = groups.len(),
            "grouped bags by content id"
        );

        let mut removed = 0;
        for (content_id, group) in &groups {
            if group.len() < 2 {
                continue;
            }
            debug!(content_id, count = group.len(), "found duplicates");
            for dup in &group[1..] {
                let Some(id) = dup.id else { continue };
                self.report(StatusEvent::Working(format!("Removing bag w/ ID {}", id)));
                if self.store.delete(id).await? {
                    removed += 1;
                }
            }
        }

        let msg = "Done removing duplicates.";
        info!(removed, "{}", msg);
        self.report(StatusEvent::Idle(msg.to_string()));
        Ok(removed)
    }

    /// Delete one entry with everything it owns.
    pub async fn remove_entry(&self, id: i64) -> Result<bool> {
        let _guard = self.lock().await;
        let removed = self.store.delete(id).await?;
        if removed {
            info!(id, "removed bag");
        }
        Ok(removed)
    }

    /// Apply a manual metadata edit.
    pub async fn update_entry(&self, id: i64, edit: &EntryEdit) -> Result<CatalogEntry> {
        let _guard = self.lock().await;
        let mut entry = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| anyhow!("No bag with id {}", id))?;

        if let Some(description) = &edit.description {
            entry.description = Some(description.clone());
        }
        if let Some(vehicle) = &edit.vehicle {
            entry.vehicle = Some(vehicle.clone());
        }
        if let Some(location) = &edit.location_name {
            entry.location_name = Some(location.clone());
        }
        if let Some(lat) = edit.latitude_deg {
            entry.latitude_deg = Some(lat);
        }
        if let Some(lon) = edit.longitude_deg {
            entry.longitude_deg = Some(lon);
        }
        entry.updated_at = Utc::now();
        self.store.save(&entry).await
    }

    /// Re-read one cataloged file's GPS track and store it if the entry has
    /// none yet.
    pub async fn refresh_track(&self, id: i64) -> Result<TrackUpdate> {
        let entry = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| anyhow!("No bag with id {}", id))?;
        let full_path = entry.full_path();

        let parser = self.parser.clone();
        let path = full_path.clone();
        let read = tokio::task::spawn_blocking(move || parser.read_metadata(&path))
            .await
            .context("GPS reader task failed")?;
        let meta = match read {
            Ok(meta) => meta,
            Err(e) => {
                self.report(StatusEvent::Error(format!(
                    "Unable to get GPS info for {}: {}",
                    full_path.display(),
                    e
                )));
                return Err(e).with_context(|| format!("Failed to read {}", full_path.display()));
            }
        };

        let _guard = self.lock().await;
        // Re-read under the lock; the entry may have moved or been edited.
        let entry = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| anyhow!("No bag with id {}", id))?;
        let (_, update) = self.store_track(entry, &meta.track).await?;
        Ok(update)
    }

    /// `[longitude, latitude]` of every track point of the given entries,
    /// in timestamp order.
    pub async fn track_coordinates(&self, ids: &[i64]) -> Result<Vec<[f64; 2]>> {
        debug!(?ids, "fetching track coordinates");
        let points = self.store.track_points(ids).await?;
        Ok(points.iter().map(|p| [p.longitude, p.latitude]).collect())
    }
}
