//! End-to-end tests of the scan and reconcile pipeline over the in-memory
//! store, using bag files written with `BagWriter`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;
use tokio::sync::Barrier;

use bag_catalog::bag::writer::{BagWriter, NAV_SAT_FIX_MD5, STRING_MD5};
use bag_catalog::bag::{NAV_SAT_FIX, STRING_MSG};
use bag_catalog::catalog::Catalog;
use bag_catalog::config::ScanConfig;
use bag_catalog::geocode::LocationResolver;
use bag_catalog::maintenance::EntryEdit;
use bag_catalog::reconcile::{Outcome, TrackUpdate};
use bag_catalog::scan::{ScanOptions, ScanSnapshot};
use bag_catalog::status::{StatusEvent, StatusLog};
use bag_catalog_core::models::{BagMetadata, CatalogEntry, MessageType, Topic, TrackPoint};
use bag_catalog_core::store::memory::InMemoryStore;
use bag_catalog_core::store::CatalogStore;

fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_600_000_000, 0).unwrap()
}

/// Write a bag with `fixes` GPS points and a note that makes its content
/// distinct from bags with a different `label`.
fn write_bag(path: &Path, label: &str, fixes: usize) {
    let mut bag = BagWriter::new();
    let gps = bag.add_connection("/gps/fix", NAV_SAT_FIX, NAV_SAT_FIX_MD5);
    let notes = bag.add_connection("/notes", STRING_MSG, STRING_MD5);
    let vehicle = bag.add_connection("/vehicle_name", STRING_MSG, STRING_MD5);
    bag.write_string(vehicle, start(), "rover-1");
    bag.write_string(notes, start(), label);
    for i in 0..fixes {
        bag.write_nav_sat_fix(
            gps,
            start() + Duration::seconds(i as i64 + 1),
            37.0 + i as f64 * 0.001,
            -122.0 - i as f64 * 0.001,
        );
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    bag.write_to(path).unwrap();
}

/// Overwrite `path` with a bag holding a single `/log` topic.
fn write_log_bag(path: &Path) {
    let mut bag = BagWriter::new();
    let log = bag.add_connection("/log", STRING_MSG, STRING_MD5);
    bag.write_string(log, start(), "rewritten");
    bag.write_to(path).unwrap();
}

struct Fixture {
    _tmp: TempDir,
    root: PathBuf,
    store: Arc<InMemoryStore>,
    catalog: Arc<Catalog>,
}

impl Fixture {
    fn new() -> Self {
        Self::with(|catalog| catalog)
    }

    fn with(configure: impl FnOnce(Catalog) -> Catalog) -> Self {
        let tmp = TempDir::new().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let store = Arc::new(InMemoryStore::new());
        let catalog = Arc::new(configure(Catalog::new(store.clone())));
        Self {
            _tmp: tmp,
            root,
            store,
            catalog,
        }
    }

    fn options(&self) -> ScanOptions {
        ScanOptions::from_config(&ScanConfig {
            roots: vec![self.root.clone()],
            workers: 3,
            ..ScanConfig::default()
        })
    }

    async fn entries(&self) -> Vec<CatalogEntry> {
        self.store.find_all().await.unwrap()
    }
}

struct FailingResolver;

#[async_trait]
impl LocationResolver for FailingResolver {
    async fn resolve(&self, _lat: f64, _lon: f64) -> Result<Option<String>> {
        bail!("geocoder unreachable")
    }
}

struct FixedResolver(&'static str);

#[async_trait]
impl LocationResolver for FixedResolver {
    async fn resolve(&self, _lat: f64, _lon: f64) -> Result<Option<String>> {
        Ok(Some(self.0.to_string()))
    }
}

/// Holds every caller until `n` lookups are in flight, so all of them have
/// passed the unlocked duplicate check before any takes the write lock.
struct Rendezvous(Barrier);

#[async_trait]
impl LocationResolver for Rendezvous {
    async fn resolve(&self, _lat: f64, _lon: f64) -> Result<Option<String>> {
        self.0.wait().await;
        Ok(Some("Meeting point".to_string()))
    }
}

/// In-memory store whose next `n` topic writes fail.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryStore,
    topic_failures: AtomicUsize,
}

impl FlakyStore {
    fn fail_topic_writes(&self, n: usize) {
        self.topic_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogStore for FlakyStore {
    async fn find_by_content_id(&self, content_id: &str) -> Result<Option<CatalogEntry>> {
        self.inner.find_by_content_id(content_id).await
    }

    async fn get(&self, id: i64) -> Result<Option<CatalogEntry>> {
        self.inner.get(id).await
    }

    async fn find_all(&self) -> Result<Vec<CatalogEntry>> {
        self.inner.find_all().await
    }

    async fn find_all_missing(&self) -> Result<Vec<CatalogEntry>> {
        self.inner.find_all_missing().await
    }

    async fn save(&self, entry: &CatalogEntry) -> Result<CatalogEntry> {
        self.inner.save(entry).await
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        self.inner.delete(id).await
    }

    async fn clear_structure(&self, entry_id: i64) -> Result<()> {
        self.inner.clear_structure(entry_id).await
    }

    async fn find_message_type(&self, name: &str, md5sum: &str) -> Result<Option<MessageType>> {
        self.inner.find_message_type(name, md5sum).await
    }

    async fn save_message_type(&self, message_type: &MessageType) -> Result<()> {
        self.inner.save_message_type(message_type).await
    }

    async fn link_message_type(&self, entry_id: i64, message_type: &MessageType) -> Result<()> {
        self.inner.link_message_type(entry_id, message_type).await
    }

    async fn message_types_for(&self, entry_id: i64) -> Result<Vec<MessageType>> {
        self.inner.message_types_for(entry_id).await
    }

    async fn find_topic(&self, name: &str, entry_id: i64) -> Result<Option<Topic>> {
        self.inner.find_topic(name, entry_id).await
    }

    async fn save_topic(&self, topic: &Topic) -> Result<Topic> {
        let failing = self
            .topic_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("disk I/O error");
        }
        self.inner.save_topic(topic).await
    }

    async fn topics_for(&self, entry_id: i64) -> Result<Vec<Topic>> {
        self.inner.topics_for(entry_id).await
    }

    async fn track_point_count(&self, entry_id: i64) -> Result<u64> {
        self.inner.track_point_count(entry_id).await
    }

    async fn insert_track_points(&self, entry_id: i64, points: &[TrackPoint]) -> Result<()> {
        self.inner.insert_track_points(entry_id, points).await
    }

    async fn track_points(&self, entry_ids: &[i64]) -> Result<Vec<TrackPoint>> {
        self.inner.track_points(entry_ids).await
    }
}

async fn topic_names(store: &dyn CatalogStore, id: i64) -> Vec<String> {
    let mut names: Vec<String> = store
        .topics_for(id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn first_scan_inserts_with_structure_and_track() {
    let fx = Fixture::with(|c| c.with_resolver(Arc::new(FixedResolver("Test Track, CA"))));
    write_bag(&fx.root.join("a.bag"), "a", 10);

    let summary = fx.catalog.scan(&fx.options()).await.unwrap();
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.failed, 0);

    let entries = fx.entries().await;
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    let id = entry.id.unwrap();
    assert_eq!(entry.filename, "a.bag");
    assert_eq!(entry.path, fx.root.to_string_lossy());
    assert!(!entry.missing);
    assert!(entry.has_track);
    assert_eq!(entry.vehicle.as_deref(), Some("rover-1"));
    assert_eq!(entry.location_name.as_deref(), Some("Test Track, CA"));
    assert_eq!(entry.latitude_deg, Some(37.0));
    assert_eq!(entry.longitude_deg, Some(-122.0));
    assert_eq!(entry.content_id.len(), 64);

    assert_eq!(fx.store.track_point_count(id).await.unwrap(), 10);
    let topics = fx.store.topics_for(id).await.unwrap();
    let mut names: Vec<_> = topics.iter().map(|t| t.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["/gps/fix", "/notes", "/vehicle_name"]);
    let types = fx.store.message_types_for(id).await.unwrap();
    assert_eq!(types.len(), 2);
}

#[tokio::test]
async fn identical_copies_keep_one_entry() {
    let fx = Fixture::new();
    write_bag(&fx.root.join("a.bag"), "same", 3);
    fs::create_dir_all(fx.root.join("backup")).unwrap();
    fs::copy(fx.root.join("a.bag"), fx.root.join("backup/a.bag")).unwrap();
    fs::copy(fx.root.join("a.bag"), fx.root.join("z.bag")).unwrap();
    write_bag(&fx.root.join("other.bag"), "other", 3);

    let summary = fx.catalog.scan(&fx.options()).await.unwrap();
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.duplicates, 2);

    let entries = fx.entries().await;
    assert_eq!(entries.len(), 2);
    assert_ne!(entries[0].content_id, entries[1].content_id);
}

#[tokio::test]
async fn second_scan_of_unchanged_tree_mutates_nothing() {
    let fx = Fixture::new();
    write_bag(&fx.root.join("a.bag"), "a", 4);
    write_bag(&fx.root.join("runs/b.bag"), "b", 0);

    let first = fx.catalog.scan(&fx.options()).await.unwrap();
    assert_eq!(first.inserted, 2);
    let before = fx.entries().await;

    let second = fx.catalog.scan(&fx.options()).await.unwrap();
    assert_eq!(second.processed, 2);
    assert_eq!(second.skipped, 2);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.relocated, 0);
    assert_eq!(second.missing, 0);
    assert_eq!(fx.entries().await, before);
}

#[tokio::test]
async fn moved_file_is_relocated_not_reinserted() {
    let fx = Fixture::new();
    write_bag(&fx.root.join("a.bag"), "a", 10);

    let first = fx.catalog.scan(&fx.options()).await.unwrap();
    assert_eq!(first.inserted, 1);
    let id = fx.entries().await[0].id.unwrap();

    fs::create_dir_all(fx.root.join("archive")).unwrap();
    fs::rename(fx.root.join("a.bag"), fx.root.join("archive/b.bag")).unwrap();

    let second = fx.catalog.scan(&fx.options()).await.unwrap();
    assert_eq!(second.relocated, 1);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.missing, 0);

    let entries = fx.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, Some(id));
    assert_eq!(entries[0].full_path(), fx.root.join("archive/b.bag"));
    assert!(!entries[0].missing);
    assert_eq!(fx.store.track_point_count(id).await.unwrap(), 10);
}

#[tokio::test]
async fn deleted_then_identical_file_relocates_entry() {
    let fx = Fixture::new();
    let a = fx.root.join("a.bag");
    write_bag(&a, "h1", 10);

    let first = fx.catalog.scan(&fx.options()).await.unwrap();
    assert_eq!(first.inserted, 1);
    let entry = fx.entries().await.remove(0);
    assert!(!entry.missing);
    let id = entry.id.unwrap();
    assert_eq!(fx.store.track_point_count(id).await.unwrap(), 10);

    let bytes = fs::read(&a).unwrap();
    fs::remove_file(&a).unwrap();
    fs::write(fx.root.join("b.bag"), bytes).unwrap();

    let second = fx.catalog.scan(&fx.options()).await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.relocated, 1);

    let entries = fx.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].filename, "b.bag");
    assert!(!entries[0].missing);
    assert_eq!(fx.store.track_point_count(id).await.unwrap(), 10);
}

#[tokio::test]
async fn deleted_file_is_flagged_then_purged_with_owned_rows() {
    let log = Arc::new(StatusLog::new());
    let sink = log.clone();
    let fx = Fixture::with(move |c| c.with_status(sink));
    write_bag(&fx.root.join("a.bag"), "a", 5);
    write_bag(&fx.root.join("b.bag"), "b", 0);
    fx.catalog.scan(&fx.options()).await.unwrap();

    let gone = fx
        .entries()
        .await
        .into_iter()
        .find(|e| e.filename == "a.bag")
        .unwrap();
    let gone_id = gone.id.unwrap();
    fs::remove_file(fx.root.join("a.bag")).unwrap();

    let summary = fx.catalog.scan(&fx.options()).await.unwrap();
    assert_eq!(summary.missing, 1);
    assert!(fx.store.get(gone_id).await.unwrap().unwrap().missing);
    assert!(log
        .events()
        .iter()
        .any(|e| matches!(e, StatusEvent::Working(m) if m.contains("is missing"))));

    // Still missing on the next scan, but not counted twice.
    let again = fx.catalog.scan(&fx.options()).await.unwrap();
    assert_eq!(again.missing, 0);

    assert_eq!(fx.catalog.purge_missing().await.unwrap(), 1);
    assert!(fx.store.get(gone_id).await.unwrap().is_none());
    assert!(fx.store.topics_for(gone_id).await.unwrap().is_empty());
    assert_eq!(fx.store.track_point_count(gone_id).await.unwrap(), 0);
    assert_eq!(fx.entries().await.len(), 1);
    assert_eq!(fx.catalog.purge_missing().await.unwrap(), 0);
}

#[tokio::test]
async fn concurrent_identical_files_insert_exactly_once() {
    let fx = Fixture::with(|c| c.with_resolver(Arc::new(Rendezvous(Barrier::new(2)))));
    let a = fx.root.join("a.bag");
    let b = fx.root.join("b.bag");
    write_bag(&a, "twin", 2);
    fs::copy(&a, &b).unwrap();

    let snapshot = ScanSnapshot::default();
    let (ra, rb) = tokio::join!(
        fx.catalog.reconcile_file(&a, &snapshot, false),
        fx.catalog.reconcile_file(&b, &snapshot, false),
    );

    let results = [ra, rb];
    let inserted = results
        .iter()
        .filter(|r| matches!(r, Ok(Outcome::Inserted(_))))
        .count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_duplicate()))
        .count();
    assert_eq!(inserted, 1);
    assert_eq!(duplicates, 1);
    assert_eq!(fx.entries().await.len(), 1);
}

#[tokio::test]
async fn track_is_stored_only_once() {
    let fx = Fixture::new();
    write_bag(&fx.root.join("a.bag"), "a", 10);
    fx.catalog.scan(&fx.options()).await.unwrap();
    let before = fx.entries().await.remove(0);
    let id = before.id.unwrap();

    let update = fx.catalog.refresh_track(id).await.unwrap();
    assert_eq!(update, TrackUpdate::Refused(10));
    assert_eq!(fx.store.track_point_count(id).await.unwrap(), 10);

    let after = fx.store.get(id).await.unwrap().unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn refresh_track_fills_an_entry_without_points() {
    let fx = Fixture::new();
    let path = fx.root.join("a.bag");
    write_bag(&path, "a", 6);

    // Catalog the entry by hand, without its track.
    let meta = BagMetadata::default();
    let entry = fx
        .store
        .save(&CatalogEntry::from_metadata(&path, "h-manual", 1, &meta, Utc::now()))
        .await
        .unwrap();
    let id = entry.id.unwrap();

    assert_eq!(
        fx.catalog.refresh_track(id).await.unwrap(),
        TrackUpdate::Stored(6)
    );
    let stored = fx.store.get(id).await.unwrap().unwrap();
    assert!(stored.has_track);
    assert_eq!(stored.latitude_deg, Some(37.0));

    let coords = fx.catalog.track_coordinates(&[id]).await.unwrap();
    assert_eq!(coords.len(), 6);
    assert_eq!(coords[0], [-122.0, 37.0]);
}

#[tokio::test]
async fn forced_scan_refreshes_known_paths() {
    let fx = Fixture::new();
    let path = fx.root.join("a.bag");
    write_bag(&path, "a", 3);
    fx.catalog.scan(&fx.options()).await.unwrap();
    let original = fx.entries().await.remove(0);

    // Rewritten in place: a plain rescan does not look at it.
    write_bag(&path, "a, second take", 3);
    let plain = fx.catalog.scan(&fx.options()).await.unwrap();
    assert_eq!(plain.skipped, 1);
    assert_eq!(fx.entries().await[0].content_id, original.content_id);

    let mut options = fx.options();
    options.force = true;
    let forced = fx.catalog.scan(&options).await.unwrap();
    assert_eq!(forced.refreshed, 1);
    assert_eq!(forced.inserted, 0);

    let entries = fx.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, original.id);
    assert_ne!(entries[0].content_id, original.content_id);
    assert_eq!(
        fx.store.track_point_count(original.id.unwrap()).await.unwrap(),
        3
    );
}

#[tokio::test]
async fn corrupt_file_is_counted_and_scan_continues() {
    let log = Arc::new(StatusLog::new());
    let sink = log.clone();
    let fx = Fixture::with(move |c| c.with_status(sink));
    fs::write(fx.root.join("broken.bag"), b"#ROSBAG V2.0\n\x10\x00").unwrap();
    fs::write(fx.root.join("text.bag"), b"not a bag at all").unwrap();
    write_bag(&fx.root.join("good.bag"), "good", 2);

    let summary = fx.catalog.scan(&fx.options()).await.unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.inserted, 1);
    assert_eq!(fx.entries().await.len(), 1);
    assert!(log
        .events()
        .iter()
        .any(|e| matches!(e, StatusEvent::Error(m) if m.contains("broken.bag"))));
}

#[tokio::test]
async fn geocoder_failure_leaves_location_empty() {
    let fx = Fixture::with(|c| c.with_resolver(Arc::new(FailingResolver)));
    write_bag(&fx.root.join("a.bag"), "a", 2);

    let summary = fx.catalog.scan(&fx.options()).await.unwrap();
    assert_eq!(summary.inserted, 1);
    let entry = fx.entries().await.remove(0);
    assert!(entry.location_name.is_none());
    assert_eq!(entry.latitude_deg, Some(37.0));
}

#[tokio::test]
async fn prune_keeps_lowest_id_per_content() {
    let fx = Fixture::new();
    let meta = BagMetadata::default();
    let now = Utc::now();
    for (file, content) in [("a.bag", "h1"), ("b.bag", "h1"), ("c.bag", "h2"), ("d.bag", "h1")] {
        fx.store
            .save(&CatalogEntry::from_metadata(
                &fx.root.join(file),
                content,
                1,
                &meta,
                now,
            ))
            .await
            .unwrap();
    }

    assert_eq!(fx.catalog.prune_duplicates().await.unwrap(), 2);
    let names: Vec<_> = fx.entries().await.into_iter().map(|e| e.filename).collect();
    assert_eq!(names, vec!["a.bag", "c.bag"]);
    assert_eq!(fx.catalog.prune_duplicates().await.unwrap(), 0);
}

#[tokio::test]
async fn edit_and_remove_entry() {
    let fx = Fixture::new();
    write_bag(&fx.root.join("a.bag"), "a", 1);
    fx.catalog.scan(&fx.options()).await.unwrap();
    let id = fx.entries().await[0].id.unwrap();

    let edited = fx
        .catalog
        .update_entry(
            id,
            &EntryEdit {
                description: Some("parking lot loop".into()),
                location_name: Some("Lot B".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(edited.description.as_deref(), Some("parking lot loop"));
    assert_eq!(edited.location_name.as_deref(), Some("Lot B"));
    assert_eq!(edited.vehicle.as_deref(), Some("rover-1"));

    assert!(fx.catalog.update_entry(id + 100, &EntryEdit::default()).await.is_err());

    assert!(fx.catalog.remove_entry(id).await.unwrap());
    assert!(!fx.catalog.remove_entry(id).await.unwrap());
    assert!(fx.entries().await.is_empty());
}

#[tokio::test]
async fn explicit_paths_do_not_flag_unseen_entries() {
    let fx = Fixture::new();
    write_bag(&fx.root.join("a.bag"), "a", 1);
    write_bag(&fx.root.join("b.bag"), "b", 1);
    fx.catalog.scan(&fx.options()).await.unwrap();

    write_bag(&fx.root.join("c.bag"), "c", 1);
    let mut options = fx.options();
    options.roots = vec![fx.root.join("c.bag")];
    options.mark_missing = false;
    let summary = fx.catalog.scan(&options).await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.missing, 0);
    assert!(fx.entries().await.iter().all(|e| !e.missing));
}

#[tokio::test]
async fn relocation_target_removed_before_lock_inserts_file() {
    let fx = Fixture::new();
    let a = fx.root.join("a.bag");
    write_bag(&a, "h1", 4);
    fx.catalog.scan(&fx.options()).await.unwrap();
    let id = fx.entries().await[0].id.unwrap();

    let bytes = fs::read(&a).unwrap();
    fs::remove_file(&a).unwrap();
    let snapshot = fx.catalog.snapshot().await.unwrap();
    assert_eq!(snapshot.newly_missing, vec![id]);
    let b = fx.root.join("b.bag");
    fs::write(&b, bytes).unwrap();

    // The missing entry goes away after the snapshot was taken.
    assert!(fx.catalog.remove_entry(id).await.unwrap());

    let outcome = fx.catalog.reconcile_file(&b, &snapshot, false).await.unwrap();
    let new_id = match outcome {
        Outcome::Inserted(new_id) => new_id,
        other => panic!("expected an insert, got {:?}", other),
    };
    assert_ne!(new_id, id);

    let entries = fx.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].filename, "b.bag");
    assert!(!entries[0].missing);
    assert_eq!(fx.store.track_point_count(new_id).await.unwrap(), 4);
    assert_eq!(
        topic_names(fx.store.as_ref(), new_id).await,
        vec!["/gps/fix", "/notes", "/vehicle_name"]
    );
}

#[tokio::test]
async fn two_copies_of_a_missing_file_relocate_once() {
    let fx = Fixture::new();
    let a = fx.root.join("a.bag");
    write_bag(&a, "moved", 5);
    fx.catalog.scan(&fx.options()).await.unwrap();
    let id = fx.entries().await[0].id.unwrap();

    let bytes = fs::read(&a).unwrap();
    fs::remove_file(&a).unwrap();
    let snapshot = fx.catalog.snapshot().await.unwrap();
    assert_eq!(snapshot.known_missing.len(), 1);

    let b = fx.root.join("b.bag");
    let c = fx.root.join("copies/c.bag");
    fs::create_dir_all(fx.root.join("copies")).unwrap();
    fs::write(&b, &bytes).unwrap();
    fs::write(&c, &bytes).unwrap();

    let (rb, rc) = tokio::join!(
        fx.catalog.reconcile_file(&b, &snapshot, false),
        fx.catalog.reconcile_file(&c, &snapshot, false),
    );

    let results = [rb, rc];
    let relocated = results
        .iter()
        .filter(|r| matches!(r, Ok(Outcome::Relocated(got)) if *got == id))
        .count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_duplicate()))
        .count();
    assert_eq!(relocated, 1);
    assert_eq!(duplicates, 1);

    let entries = fx.entries().await;
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].missing);
    assert!(entries[0].full_path() == b || entries[0].full_path() == c);
    assert_eq!(fx.store.track_point_count(id).await.unwrap(), 5);
}

#[tokio::test]
async fn refresh_of_changed_content_replaces_topics_and_types() {
    let fx = Fixture::new();
    let path = fx.root.join("a.bag");
    write_bag(&path, "a", 3);
    fx.catalog.scan(&fx.options()).await.unwrap();
    let id = fx.entries().await[0].id.unwrap();
    assert_eq!(fx.store.message_types_for(id).await.unwrap().len(), 2);

    write_log_bag(&path);
    let mut options = fx.options();
    options.force = true;
    let forced = fx.catalog.scan(&options).await.unwrap();
    assert_eq!(forced.refreshed, 1);

    assert_eq!(topic_names(fx.store.as_ref(), id).await, vec!["/log"]);
    assert_eq!(
        fx.store.message_types_for(id).await.unwrap(),
        vec![MessageType {
            name: STRING_MSG.to_string(),
            md5sum: STRING_MD5.to_string(),
        }]
    );
}

#[tokio::test]
async fn failed_insert_leaves_nothing_behind() {
    let tmp = TempDir::new().unwrap();
    let root = fs::canonicalize(tmp.path()).unwrap();
    let store = Arc::new(FlakyStore::default());
    let catalog = Arc::new(Catalog::new(store.clone()));
    let options = ScanOptions::from_config(&ScanConfig {
        roots: vec![root.clone()],
        ..ScanConfig::default()
    });
    write_bag(&root.join("a.bag"), "a", 4);

    store.fail_topic_writes(1);
    let first = catalog.scan(&options).await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(first.inserted, 0);
    assert!(store.find_all().await.unwrap().is_empty());
    assert_eq!(store.track_point_count(1).await.unwrap(), 0);
    assert!(store.topics_for(1).await.unwrap().is_empty());

    // Nothing was kept, so the next scan picks the file up again.
    let second = catalog.scan(&options).await.unwrap();
    assert_eq!(second.skipped, 0);
    assert_eq!(second.inserted, 1);
    let entry = store.find_all().await.unwrap().remove(0);
    let id = entry.id.unwrap();
    assert!(entry.has_track);
    assert_eq!(store.track_point_count(id).await.unwrap(), 4);
    assert_eq!(topic_names(store.as_ref(), id).await.len(), 3);
}

#[tokio::test]
async fn failed_refresh_restores_previous_entry() {
    let tmp = TempDir::new().unwrap();
    let root = fs::canonicalize(tmp.path()).unwrap();
    let store = Arc::new(FlakyStore::default());
    let catalog = Arc::new(Catalog::new(store.clone()));
    let mut options = ScanOptions::from_config(&ScanConfig {
        roots: vec![root.clone()],
        ..ScanConfig::default()
    });
    let path = root.join("a.bag");
    write_bag(&path, "a", 3);
    catalog.scan(&options).await.unwrap();
    let before = store.find_all().await.unwrap().remove(0);
    let id = before.id.unwrap();

    write_log_bag(&path);
    options.force = true;
    store.fail_topic_writes(1);
    let failed = catalog.scan(&options).await.unwrap();
    assert_eq!(failed.failed, 1);
    assert_eq!(failed.refreshed, 0);

    assert_eq!(store.get(id).await.unwrap().unwrap(), before);
    assert_eq!(
        topic_names(store.as_ref(), id).await,
        vec!["/gps/fix", "/notes", "/vehicle_name"]
    );
    assert_eq!(store.message_types_for(id).await.unwrap().len(), 2);

    let retried = catalog.scan(&options).await.unwrap();
    assert_eq!(retried.refreshed, 1);
    assert_eq!(topic_names(store.as_ref(), id).await, vec!["/log"]);
    assert_ne!(store.get(id).await.unwrap().unwrap().content_id, before.content_id);
}
