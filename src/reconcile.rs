//! Per-file reconciliation against the catalog.
//!
//! Given one file and the scan's [`ScanSnapshot`], decide what the file is:
//!
//! | Situation | Decision |
//! |-----------|----------|
//! | path known, not forced | skip (no fingerprint) |
//! | path known, forced | refresh the existing entry |
//! | path unknown, content matches a missing entry | relocate that entry |
//! | path unknown, content unknown | insert a new entry |
//! | path unknown, content held by a present entry | reject as duplicate |
//!
//! Fingerprinting and geocoding run first, unlocked. The decision is then
//! re-validated and applied under the catalog write lock, because another
//! worker may have inserted or relocated the same content in between.

use std::path::Path;

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, info, warn};

use bag_catalog_core::models::{BagMetadata, CatalogEntry, MessageType, Topic};
use bag_catalog_core::track::GpsTrack;

use crate::catalog::Catalog;
use crate::error::ReconcileError;
use crate::fingerprint::{fingerprint_with_heartbeat, Fingerprint};
use crate::scan::ScanSnapshot;
use crate::status::StatusEvent;

/// What reconciling one file did to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Path already cataloged and no refresh was forced.
    Skipped,
    Inserted(i64),
    /// A missing entry was found at a new path.
    Relocated(i64),
    /// A known path was re-read on request.
    Refreshed(i64),
}

/// Result of trying to store an entry's GPS track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackUpdate {
    /// The file has no GPS fixes.
    Empty,
    Stored(usize),
    /// The entry already has this many points; nothing was added.
    Refused(u64),
}

enum Plan {
    Refresh(i64),
    Relocate(i64),
    Insert,
}

/// An entry as it was before a refresh started rewriting it.
struct Previous {
    entry: CatalogEntry,
    topics: Vec<Topic>,
    message_types: Vec<MessageType>,
}

trait ForFile<T> {
    fn for_file(self, path: &Path) -> Result<T, ReconcileError>;
}

impl<T> ForFile<T> for anyhow::Result<T> {
    fn for_file(self, path: &Path) -> Result<T, ReconcileError> {
        self.map_err(|source| ReconcileError::Store {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Catalog {
    /// Reconcile one file. Per-file failures come back as [`ReconcileError`]
    /// and leave the catalog and its lock untouched.
    pub async fn reconcile_file(
        &self,
        file: &Path,
        snapshot: &ScanSnapshot,
        force: bool,
    ) -> Result<Outcome, ReconcileError> {
        debug!(path = %file.display(), "checking");
        let known = snapshot.known_paths.get(file).copied();
        if known.is_some() && !force {
            debug!(path = %file.display(), "already cataloged; skipping");
            return Ok(Outcome::Skipped);
        }
        self.report(StatusEvent::Working(format!(
            "Processing {}.",
            file.display()
        )));

        if let Err(source) = tokio::fs::File::open(file).await {
            self.report(StatusEvent::Error(format!(
                "Unable to read {}. Check its permissions.",
                file.display()
            )));
            return Err(ReconcileError::Unreadable {
                path: file.to_path_buf(),
                source,
            });
        }

        let fp = fingerprint_with_heartbeat(
            self.parser.clone(),
            file.to_path_buf(),
            self.heartbeat,
            self.status.clone(),
        )
        .await
        .map_err(|source| {
            self.report(StatusEvent::Error(format!(
                "Unable to fingerprint {}: {}",
                file.display(),
                source
            )));
            ReconcileError::Fingerprint {
                path: file.to_path_buf(),
                source,
            }
        })?;

        let plan = match known {
            Some(id) => {
                debug!(path = %file.display(), "already cataloged; refresh forced");
                Plan::Refresh(id)
            }
            None => match snapshot.known_missing.get(&fp.content_id) {
                Some(id) => Plan::Relocate(*id),
                None => {
                    // Unlocked early-out; repeated under the lock before inserting.
                    let existing = self
                        .store
                        .find_by_content_id(&fp.content_id)
                        .await
                        .for_file(file)?;
                    if let Some(existing) = existing {
                        return Err(self.duplicate(file, &existing));
                    }
                    Plan::Insert
                }
            },
        };

        let location = match plan {
            Plan::Relocate(_) => None,
            Plan::Refresh(_) | Plan::Insert => self.resolve_location(&fp.metadata.track).await,
        };

        let _guard = self.lock().await;
        let outcome = self.apply(file, plan, &fp, location).await;
        if let Err(e @ ReconcileError::Store { .. }) = &outcome {
            self.report(StatusEvent::Error(format!("Error reading {}: {}", file.display(), e)));
        }
        outcome
    }

    async fn apply(
        &self,
        file: &Path,
        plan: Plan,
        fp: &Fingerprint,
        location: Option<String>,
    ) -> Result<Outcome, ReconcileError> {
        match plan {
            Plan::Insert => self.insert(file, fp, location).await,
            Plan::Refresh(id) => match self.store.get(id).await.for_file(file)? {
                Some(entry) => self.refresh(entry, file, fp, location).await,
                None => {
                    warn!(id, path = %file.display(), "entry removed before refresh; inserting");
                    self.insert(file, fp, location).await
                }
            },
            Plan::Relocate(id) => match self.store.get(id).await.for_file(file)? {
                Some(entry) if entry.missing => self.relocate(entry, file).await,
                Some(entry) => Err(self.duplicate(file, &entry)),
                None => {
                    warn!(
                        id,
                        path = %file.display(),
                        "missing entry was removed before relocation; inserting"
                    );
                    self.insert(file, fp, None).await
                }
            },
        }
    }

    async fn insert(
        &self,
        file: &Path,
        fp: &Fingerprint,
        location: Option<String>,
    ) -> Result<Outcome, ReconcileError> {
        // Time passed since the unlocked lookup; another worker may have
        // inserted this content already.
        if let Some(existing) = self
            .store
            .find_by_content_id(&fp.content_id)
            .await
            .for_file(file)?
        {
            return Err(self.duplicate(file, &existing));
        }

        info!(path = %file.display(), "adding new bag");
        let mut entry =
            CatalogEntry::from_metadata(file, &fp.content_id, fp.size, &fp.metadata, Utc::now());
        entry.location_name = location;
        let entry = self.store.save(&entry).await.for_file(file)?;
        let id = entry
            .id
            .context("store returned an entry without an id")
            .for_file(file)?;

        if let Err(source) = self.attach_contents(entry, &fp.metadata).await {
            // Undo the partial insert.
            match self.store.delete(id).await {
                Ok(_) => warn!(id, path = %file.display(), "discarded partially stored bag"),
                Err(e) => warn!(
                    id,
                    path = %file.display(),
                    error = %format!("{:#}", e),
                    "unable to discard partially stored bag"
                ),
            }
            return Err(ReconcileError::Store {
                path: file.to_path_buf(),
                source,
            });
        }
        debug!(path = %file.display(), id, "done processing");
        Ok(Outcome::Inserted(id))
    }

    async fn relocate(&self, mut entry: CatalogEntry, file: &Path) -> Result<Outcome, ReconcileError> {
        info!(
            from = %entry.full_path().display(),
            to = %file.display(),
            "missing bag was found"
        );
        entry.set_location(file);
        entry.missing = false;
        entry.updated_at = Utc::now();
        let entry = self.store.save(&entry).await.for_file(file)?;
        let id = entry
            .id
            .context("store returned an entry without an id")
            .for_file(file)?;
        Ok(Outcome::Relocated(id))
    }

    async fn refresh(
        &self,
        mut entry: CatalogEntry,
        file: &Path,
        fp: &Fingerprint,
        location: Option<String>,
    ) -> Result<Outcome, ReconcileError> {
        info!(path = %file.display(), "force updating bag info");
        let id = entry
            .id
            .context("stored entry has no id")
            .for_file(file)?;
        let content_changed = entry.content_id != fp.content_id;
        if content_changed {
            if let Some(other) = self
                .store
                .find_by_content_id(&fp.content_id)
                .await
                .for_file(file)?
            {
                if other.id != entry.id {
                    return Err(self.duplicate(file, &other));
                }
            }
            warn!(
                path = %file.display(),
                old = %entry.content_id,
                new = %fp.content_id,
                "content changed in place"
            );
        }
        let previous = Previous {
            topics: self.store.topics_for(id).await.for_file(file)?,
            message_types: self.store.message_types_for(id).await.for_file(file)?,
            entry: entry.clone(),
        };

        if content_changed {
            apply_metadata(&mut entry, fp);
        }
        entry.set_location(file);
        entry.missing = false;
        entry.updated_at = Utc::now();
        if entry.location_name.is_none() {
            entry.location_name = location;
        }

        if let Err(source) = self.rewrite(entry, content_changed, &fp.metadata).await {
            self.restore(previous, file).await;
            return Err(ReconcileError::Store {
                path: file.to_path_buf(),
                source,
            });
        }
        Ok(Outcome::Refreshed(id))
    }

    async fn rewrite(
        &self,
        entry: CatalogEntry,
        content_changed: bool,
        meta: &BagMetadata,
    ) -> anyhow::Result<()> {
        let entry = self.store.save(&entry).await?;
        if content_changed {
            let id = entry.id.context("store returned an entry without an id")?;
            self.store.clear_structure(id).await?;
        }
        self.attach_contents(entry, meta).await
    }

    /// Put back the row, topics and type links a failed refresh started to
    /// replace.
    async fn restore(&self, previous: Previous, file: &Path) {
        let Previous {
            entry,
            topics,
            message_types,
        } = previous;
        let restored = async {
            let id = entry.id.context("entry has not been saved")?;
            self.store.clear_structure(id).await?;
            for mt in &message_types {
                self.store.link_message_type(id, mt).await?;
            }
            for topic in topics {
                self.store.save_topic(&Topic { id: None, ..topic }).await?;
            }
            self.store.save(&entry).await?;
            anyhow::Ok(id)
        }
        .await;
        match restored {
            Ok(id) => warn!(id, path = %file.display(), "refresh failed; previous entry restored"),
            Err(e) => warn!(
                path = %file.display(),
                error = %format!("{:#}", e),
                "refresh failed and the previous entry could not be restored"
            ),
        }
    }

    /// Topics, message types and track of an entry that has just been saved.
    async fn attach_contents(&self, entry: CatalogEntry, meta: &BagMetadata) -> anyhow::Result<()> {
        let id = entry.id.context("entry has not been saved")?;
        self.attach_structure(id, meta).await?;
        self.store_track(entry, &meta.track).await?;
        Ok(())
    }

    /// Link message types and upsert topics for an entry. Must run under the
    /// write lock.
    async fn attach_structure(&self, entry_id: i64, meta: &BagMetadata) -> anyhow::Result<()> {
        for mt in meta.message_type_list() {
            self.ensure_message_type(entry_id, &mt).await?;
        }

        for info in &meta.topics {
            let message_type = MessageType {
                name: info.message_type.clone(),
                md5sum: info.md5sum.clone(),
            };
            self.ensure_message_type(entry_id, &message_type).await?;

            let existing = self.store.find_topic(&info.name, entry_id).await?;
            let topic = Topic {
                id: existing.and_then(|t| t.id),
                entry_id,
                name: info.name.clone(),
                message_type,
                message_count: info.message_count,
                connection_count: info.connection_count,
            };
            self.store.save_topic(&topic).await?;
        }
        Ok(())
    }

    async fn ensure_message_type(&self, entry_id: i64, mt: &MessageType) -> anyhow::Result<()> {
        if self
            .store
            .find_message_type(&mt.name, &mt.md5sum)
            .await?
            .is_none()
        {
            info!(name = %mt.name, md5sum = %mt.md5sum, "adding new message type");
            self.store.save_message_type(mt).await?;
        }
        self.store.link_message_type(entry_id, mt).await
    }

    /// Store an entry's GPS track unless it already has one. Must run under
    /// the write lock.
    pub(crate) async fn store_track(
        &self,
        mut entry: CatalogEntry,
        track: &GpsTrack,
    ) -> anyhow::Result<(CatalogEntry, TrackUpdate)> {
        if track.is_empty() {
            return Ok((entry, TrackUpdate::Empty));
        }
        let id = entry.id.context("entry has not been saved")?;

        let existing = self.store.track_point_count(id).await?;
        if existing > 0 {
            warn!(
                id,
                existing,
                "adding GPS positions to a bag that already has some is not supported; remove the old ones first"
            );
            return Ok((entry, TrackUpdate::Refused(existing)));
        }

        self.report(StatusEvent::Working(format!(
            "Inserting GPS positions for {}.",
            entry.filename
        )));
        let points = track.points();
        self.store.insert_track_points(id, &points).await?;

        entry.has_track = true;
        if entry.latitude_deg.is_none() || entry.longitude_deg.is_none() {
            if let Some((lon, lat)) = track.first_position() {
                entry.longitude_deg = Some(lon);
                entry.latitude_deg = Some(lat);
            }
        }
        let entry = self.store.save(&entry).await?;
        self.report(StatusEvent::Idle(format!(
            "Saved {} GPS positions for {}.",
            points.len(),
            entry.filename
        )));
        Ok((entry, TrackUpdate::Stored(points.len())))
    }

    async fn resolve_location(&self, track: &GpsTrack) -> Option<String> {
        let (lon, lat) = track.first_position()?;
        match self.resolver.resolve(lat, lon).await {
            Ok(name) => name,
            Err(e) => {
                warn!(lat, lon, error = %format!("{:#}", e), "location lookup failed");
                None
            }
        }
    }

    fn duplicate(&self, file: &Path, existing: &CatalogEntry) -> ReconcileError {
        let err = ReconcileError::DuplicateContent {
            path: file.to_path_buf(),
            existing: existing.full_path(),
        };
        warn!("{}", err);
        self.report(StatusEvent::Error(format!(
            "File {} is a duplicate of {}.",
            file.display(),
            existing.full_path().display()
        )));
        err
    }
}

fn apply_metadata(entry: &mut CatalogEntry, fp: &Fingerprint) {
    let meta = &fp.metadata;
    entry.content_id = fp.content_id.clone();
    entry.size = fp.size;
    entry.duration_secs = meta.duration_secs;
    entry.start_time = meta.start_time;
    entry.end_time = meta.end_time;
    entry.message_count = meta.message_count;
    entry.version = meta.version.clone();
    entry.compressed = meta.compressed;
    entry.indexed = meta.indexed;
    if meta.vehicle.is_some() {
        entry.vehicle = meta.vehicle.clone();
    }
}
