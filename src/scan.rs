//! Scan coordination.
//!
//! A scan runs in three phases:
//!
//! 1. **Snapshot** — one read of the catalog, split into `known_paths`
//!    (present entries) and `known_missing` (missing entries by content id).
//!    Entries whose file vanished are flagged missing here, and missing
//!    entries whose file reappeared are un-flagged, so a file moved since the
//!    last scan is relocated by this one. The snapshot is immutable for the
//!    rest of the scan.
//! 2. **Dispatch** — every candidate file under the scan roots is handed to
//!    [`Catalog::reconcile_file`] on a worker pool bounded by
//!    `scan.workers`. A failure on one file is counted and reported; the
//!    scan goes on.
//! 3. **Termination** — on a full scan, entries under the roots whose path
//!    was not seen are flagged missing.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::catalog::Catalog;
use crate::config::ScanConfig;
use crate::error::ReconcileError;
use crate::reconcile::Outcome;
use crate::status::StatusEvent;

/// Catalog state captured once at the start of a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanSnapshot {
    /// Full path of every present entry, to its id.
    pub known_paths: HashMap<PathBuf, i64>,
    /// Content id of every missing entry, to its id.
    pub known_missing: HashMap<String, i64>,
    /// Entries this snapshot flagged missing.
    pub newly_missing: Vec<i64>,
}

/// What to scan and how.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Directories to walk, or individual files.
    pub roots: Vec<PathBuf>,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
    pub workers: usize,
    /// Re-read files whose path is already cataloged.
    pub force: bool,
    /// Flag entries under `roots` that were not seen. Off for scans of a
    /// hand-picked set of files.
    pub mark_missing: bool,
}

impl ScanOptions {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            roots: config.roots.clone(),
            include_globs: config.include_globs.clone(),
            exclude_globs: config.exclude_globs.clone(),
            follow_symlinks: config.follow_symlinks,
            workers: config.workers,
            force: false,
            mark_missing: true,
        }
    }
}

/// Counts reported at the end of a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub processed: u64,
    pub skipped: u64,
    pub inserted: u64,
    pub relocated: u64,
    pub refreshed: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub missing: u64,
}

impl ScanSummary {
    fn record(&mut self, file: &Path, result: Result<Outcome, ReconcileError>) {
        self.processed += 1;
        match result {
            Ok(Outcome::Skipped) => self.skipped += 1,
            Ok(Outcome::Inserted(_)) => self.inserted += 1,
            Ok(Outcome::Relocated(_)) => self.relocated += 1,
            Ok(Outcome::Refreshed(_)) => self.refreshed += 1,
            Err(e) if e.is_duplicate() => self.duplicates += 1,
            Err(e) => {
                error!(path = %file.display(), error = %e, "failed to process bag");
                self.failed += 1;
            }
        }
    }
}

impl Catalog {
    /// Capture the scan snapshot, flipping `missing` for entries whose file
    /// existence changed since the last scan.
    pub async fn snapshot(&self) -> Result<ScanSnapshot> {
        let entries = self
            .store
            .find_all()
            .await
            .context("Failed to load catalog snapshot")?;

        let mut snapshot = ScanSnapshot::default();
        let mut flips = Vec::new();
        for entry in entries {
            let Some(id) = entry.id else { continue };
            let full_path = entry.full_path();
            let exists = full_path.is_file();
            if exists {
                snapshot.known_paths.insert(full_path, id);
            } else {
                snapshot.known_missing.insert(entry.content_id.clone(), id);
            }
            if exists == entry.missing {
                flips.push((id, !exists));
            }
        }

        if flips.is_empty() {
            return Ok(snapshot);
        }

        let _guard = self.lock().await;
        for (id, missing) in flips {
            let Some(mut entry) = self.store.get(id).await? else {
                continue;
            };
            if entry.missing == missing {
                continue;
            }
            if missing {
                warn!(path = %entry.full_path().display(), "bag exists in catalog but is missing");
                self.report(StatusEvent::Working(format!(
                    "Bag {} is missing.",
                    entry.full_path().display()
                )));
                snapshot.newly_missing.push(id);
            } else {
                info!(path = %entry.full_path().display(), "missing bag is back in place");
            }
            entry.missing = missing;
            entry.updated_at = Utc::now();
            self.store.save(&entry).await?;
        }
        Ok(snapshot)
    }

    /// Run a scan. Only snapshot loading and directory traversal can fail
    /// the whole scan; per-file failures are counted in the summary.
    pub async fn scan(self: &Arc<Self>, options: &ScanOptions) -> Result<ScanSummary> {
        let scan_id = Uuid::new_v4();
        let span = tracing::info_span!("scan", id = %scan_id);
        self.scan_inner(options).instrument(span).await
    }

    async fn scan_inner(self: &Arc<Self>, options: &ScanOptions) -> Result<ScanSummary> {
        if options.workers == 0 {
            bail!("scan needs at least one worker");
        }
        let msg = "Scanning for bag files.";
        info!("{}", msg);
        self.report(StatusEvent::Working(msg.to_string()));

        let snapshot = Arc::new(self.snapshot().await?);
        let roots = canonical_roots(&options.roots)?;
        let files = self.discover(&roots, options)?;
        info!(files = files.len(), "discovered candidate files");
        let observed: HashSet<PathBuf> = files.iter().cloned().collect();

        let semaphore = Arc::new(Semaphore::new(options.workers));
        let mut tasks = JoinSet::new();
        for file in files {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("worker pool closed")?;
            let catalog = Arc::clone(self);
            let snapshot = Arc::clone(&snapshot);
            let force = options.force;
            tasks.spawn(
                async move {
                    let _permit = permit;
                    let result = catalog.reconcile_file(&file, &snapshot, force).await;
                    (file, result)
                }
                .in_current_span(),
            );
        }

        let mut summary = ScanSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((file, result)) => summary.record(&file, result),
                Err(e) => {
                    error!(error = %e, "scan worker failed");
                    summary.processed += 1;
                    summary.failed += 1;
                }
            }
        }

        let mut missing = 0;
        for id in &snapshot.newly_missing {
            if let Some(entry) = self.store.get(*id).await? {
                if entry.missing {
                    missing += 1;
                }
            }
        }
        if options.mark_missing {
            missing += self.mark_missing(&roots, &observed).await?;
        }
        summary.missing = missing;

        let msg = format!(
            "Done scanning: {} processed, {} new, {} relocated, {} duplicates, {} missing.",
            summary.processed,
            summary.inserted,
            summary.relocated,
            summary.duplicates,
            summary.missing
        );
        info!("{}", msg);
        self.report(StatusEvent::Idle(msg));
        Ok(summary)
    }

    /// Flag every present entry under `roots` whose path is not in
    /// `observed`. Returns how many entries were flagged.
    pub async fn mark_missing(&self, roots: &[PathBuf], observed: &HashSet<PathBuf>) -> Result<u64> {
        let _guard = self.lock().await;
        let mut flagged = 0;
        for mut entry in self.store.find_all().await? {
            if entry.missing {
                continue;
            }
            let full_path = entry.full_path();
            if observed.contains(&full_path) || !roots.iter().any(|r| full_path.starts_with(r)) {
                continue;
            }
            warn!(path = %full_path.display(), "bag was missing and we couldn't find it");
            self.report(StatusEvent::Working(format!(
                "Bag {} is missing.",
                full_path.display()
            )));
            entry.missing = true;
            entry.updated_at = Utc::now();
            self.store.save(&entry).await?;
            flagged += 1;
        }
        Ok(flagged)
    }

    /// Candidate files under `roots`, sorted. Unreadable directory entries
    /// are reported and skipped.
    fn discover(&self, roots: &[PathBuf], options: &ScanOptions) -> Result<Vec<PathBuf>> {
        let include_set = build_globset(&options.include_globs)?;
        let mut excludes = vec!["**/.git/**".to_string(), "**/target/**".to_string()];
        excludes.extend(options.exclude_globs.iter().cloned());
        let exclude_set = build_globset(&excludes)?;

        let mut files = Vec::new();
        for root in roots {
            if root.is_file() {
                files.push(root.clone());
                continue;
            }
            let walker = WalkDir::new(root).follow_links(options.follow_symlinks);
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        let at = e.path().unwrap_or(root.as_path());
                        let msg = format!("Unable to read {}: {}", at.display(), e);
                        warn!("{}", msg);
                        self.report(StatusEvent::Error(msg));
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                let relative = path.strip_prefix(root).unwrap_or(path);
                let rel_str = relative.to_string_lossy();
                if exclude_set.is_match(rel_str.as_ref()) || !include_set.is_match(rel_str.as_ref()) {
                    continue;
                }
                files.push(path.to_path_buf());
            }
        }

        files.sort();
        files.dedup();
        debug!(count = files.len(), "candidate files");
        Ok(files)
    }
}

fn canonical_roots(roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if roots.is_empty() {
        bail!("No scan roots given and scan.roots is empty");
    }
    roots
        .iter()
        .map(|root| {
            std::fs::canonicalize(root)
                .with_context(|| format!("Scan root does not exist: {}", root.display()))
        })
        .collect()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bag_catalog_core::store::memory::InMemoryStore;
    use std::fs;
    use tempfile::TempDir;

    fn options(root: &Path) -> ScanOptions {
        ScanOptions::from_config(&ScanConfig {
            roots: vec![root.to_path_buf()],
            ..ScanConfig::default()
        })
    }

    #[test]
    fn discover_applies_globs_and_default_excludes() {
        let tmp = TempDir::new().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        fs::create_dir_all(root.join("runs/day1")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("runs/day1/a.bag"), b"x").unwrap();
        fs::write(root.join("runs/b.bag"), b"x").unwrap();
        fs::write(root.join("runs/notes.txt"), b"x").unwrap();
        fs::write(root.join(".git/c.bag"), b"x").unwrap();

        let catalog = Catalog::new(Arc::new(InMemoryStore::new()));
        let mut opts = options(&root);
        opts.exclude_globs = vec!["**/day1/**".to_string()];
        let files = catalog.discover(&[root.clone()], &opts).unwrap();
        assert_eq!(files, vec![root.join("runs/b.bag")]);
    }

    #[cfg(unix)]
    #[test]
    fn walk_errors_name_the_failing_entry() {
        use crate::status::StatusLog;

        let tmp = TempDir::new().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        fs::write(root.join("a.bag"), b"x").unwrap();
        std::os::unix::fs::symlink(root.join("nowhere.bag"), root.join("dangling.bag")).unwrap();

        let log = Arc::new(StatusLog::new());
        let catalog = Catalog::new(Arc::new(InMemoryStore::new())).with_status(log.clone());
        let mut opts = options(&root);
        opts.follow_symlinks = true;
        let files = catalog.discover(&[root.clone()], &opts).unwrap();
        assert_eq!(files, vec![root.join("a.bag")]);

        let errors: Vec<String> = log
            .events()
            .into_iter()
            .filter_map(|e| match e {
                StatusEvent::Error(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("dangling.bag"), "{}", errors[0]);
    }

    #[test]
    fn missing_root_fails_the_scan() {
        let tmp = TempDir::new().unwrap();
        let err = canonical_roots(&[tmp.path().join("nope")]).unwrap_err();
        assert!(err.to_string().contains("Scan root does not exist"));
        assert!(canonical_roots(&[]).is_err());
    }

    #[tokio::test]
    async fn snapshot_partitions_present_and_missing_entries() {
        use bag_catalog_core::models::{BagMetadata, CatalogEntry};

        let tmp = TempDir::new().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let present = root.join("present.bag");
        fs::write(&present, b"x").unwrap();

        let store = Arc::new(InMemoryStore::new());
        let meta = BagMetadata::default();
        let now = Utc::now();
        use bag_catalog_core::store::CatalogStore;
        let a = store
            .save(&CatalogEntry::from_metadata(&present, "h1", 1, &meta, now))
            .await
            .unwrap();
        let b = store
            .save(&CatalogEntry::from_metadata(&root.join("gone.bag"), "h2", 1, &meta, now))
            .await
            .unwrap();

        let catalog = Catalog::new(store.clone());
        let snapshot = catalog.snapshot().await.unwrap();
        assert_eq!(snapshot.known_paths.get(&present), a.id.as_ref());
        assert_eq!(snapshot.known_missing.get("h2"), b.id.as_ref());
        assert_eq!(snapshot.newly_missing, vec![b.id.unwrap()]);
        assert!(store.get(b.id.unwrap()).await.unwrap().unwrap().missing);

        // Second snapshot sees the flag already set and changes nothing.
        let again = catalog.snapshot().await.unwrap();
        assert!(again.newly_missing.is_empty());
        assert_eq!(again.known_missing.len(), 1);
    }
}
