//! Storage abstraction for the bag catalog.
//!
//! The [`CatalogStore`] trait defines every storage operation the ingestion
//! pipeline needs, so the reconciler never depends on a particular backend
//! (SQLite in the main crate, in-memory here for tests).
//!
//! The store owns referential integrity: deleting an entry removes its
//! topics, track points and message-type links. Message types themselves are
//! shared and survive entry deletion.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CatalogEntry, MessageType, Topic, TrackPoint};

/// Abstract catalog backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_by_content_id`](CatalogStore::find_by_content_id) | Look up an entry by fingerprint |
/// | [`get`](CatalogStore::get) | Look up an entry by id |
/// | [`find_all`](CatalogStore::find_all) | Every stored entry, ordered by id |
/// | [`find_all_missing`](CatalogStore::find_all_missing) | Entries flagged missing |
/// | [`save`](CatalogStore::save) | Insert (no id) or update (id) an entry |
/// | [`delete`](CatalogStore::delete) | Remove an entry and everything it owns |
/// | [`clear_structure`](CatalogStore::clear_structure) | Drop an entry's topics and type links |
/// | [`find_topic`](CatalogStore::find_topic) | Topic by `(name, entry)` |
/// | [`find_message_type`](CatalogStore::find_message_type) | Message type by `(name, md5sum)` |
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_by_content_id(&self, content_id: &str) -> Result<Option<CatalogEntry>>;

    async fn get(&self, id: i64) -> Result<Option<CatalogEntry>>;

    async fn find_all(&self) -> Result<Vec<CatalogEntry>>;

    async fn find_all_missing(&self) -> Result<Vec<CatalogEntry>>;

    /// Insert or update an entry. Returns the stored entry with its id set.
    ///
    /// Backends may refuse a second entry with the same `content_id`.
    async fn save(&self, entry: &CatalogEntry) -> Result<CatalogEntry>;

    /// Delete an entry with its topics, track points and type links.
    /// Returns `false` if no entry had this id.
    async fn delete(&self, id: i64) -> Result<bool>;

    /// Remove an entry's topics and message-type links. The entry and its
    /// track points stay.
    async fn clear_structure(&self, entry_id: i64) -> Result<()>;

    async fn find_message_type(&self, name: &str, md5sum: &str) -> Result<Option<MessageType>>;

    /// Store a message type if no row with the same `(name, md5sum)` exists.
    async fn save_message_type(&self, message_type: &MessageType) -> Result<()>;

    /// Record that an entry contains messages of this type.
    async fn link_message_type(&self, entry_id: i64, message_type: &MessageType) -> Result<()>;

    async fn message_types_for(&self, entry_id: i64) -> Result<Vec<MessageType>>;

    async fn find_topic(&self, name: &str, entry_id: i64) -> Result<Option<Topic>>;

    /// Insert (no id) or update (id) a topic. Returns it with its id set.
    async fn save_topic(&self, topic: &Topic) -> Result<Topic>;

    async fn topics_for(&self, entry_id: i64) -> Result<Vec<Topic>>;

    async fn track_point_count(&self, entry_id: i64) -> Result<u64>;

    async fn insert_track_points(&self, entry_id: i64, points: &[TrackPoint]) -> Result<()>;

    /// Track points of the given entries, ordered by timestamp.
    async fn track_points(&self, entry_ids: &[i64]) -> Result<Vec<TrackPoint>>;
}
