//! In-memory [`CatalogStore`] implementation for testing.
//!
//! All tables live in one struct behind a `std::sync::RwLock`, so every
//! operation is atomic with respect to the others. Ids are assigned from
//! monotonically increasing counters starting at 1.
//!
//! Unlike the SQLite schema there is no unique index on `content_id`, so
//! tests can exercise duplicate pruning and see the reconciler keep content
//! unique on its own.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{CatalogEntry, MessageType, Topic, TrackPoint};

use super::CatalogStore;

#[derive(Default)]
struct Tables {
    entries: BTreeMap<i64, CatalogEntry>,
    next_entry_id: i64,
    message_types: BTreeSet<MessageType>,
    type_links: BTreeSet<(i64, MessageType)>,
    topics: BTreeMap<i64, Topic>,
    next_topic_id: i64,
    points: Vec<(i64, TrackPoint)>,
}

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| anyhow!("in-memory catalog lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("in-memory catalog lock poisoned"))
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn find_by_content_id(&self, content_id: &str) -> Result<Option<CatalogEntry>> {
        let tables = self.read()?;
        Ok(tables
            .entries
            .values()
            .find(|e| e.content_id == content_id)
            .cloned())
    }

    async fn get(&self, id: i64) -> Result<Option<CatalogEntry>> {
        Ok(self.read()?.entries.get(&id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self.read()?.entries.values().cloned().collect())
    }

    async fn find_all_missing(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self
            .read()?
            .entries
            .values()
            .filter(|e| e.missing)
            .cloned()
            .collect())
    }

    async fn save(&self, entry: &CatalogEntry) -> Result<CatalogEntry> {
        let mut tables = self.write()?;
        let mut stored = entry.clone();
        let id = match entry.id {
            Some(id) => {
                if !tables.entries.contains_key(&id) {
                    bail!("catalog entry {} does not exist", id);
                }
                id
            }
            None => {
                tables.next_entry_id += 1;
                tables.next_entry_id
            }
        };
        stored.id = Some(id);
        tables.entries.insert(id, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let mut tables = self.write()?;
        if tables.entries.remove(&id).is_none() {
            return Ok(false);
        }
        tables.type_links.retain(|(entry_id, _)| *entry_id != id);
        tables.topics.retain(|_, t| t.entry_id != id);
        tables.points.retain(|(entry_id, _)| *entry_id != id);
        Ok(true)
    }

    async fn clear_structure(&self, entry_id: i64) -> Result<()> {
        let mut tables = self.write()?;
        tables.type_links.retain(|(id, _)| *id != entry_id);
        tables.topics.retain(|_, t| t.entry_id != entry_id);
        Ok(())
    }

    async fn find_message_type(&self, name: &str, md5sum: &str) -> Result<Option<MessageType>> {
        let tables = self.read()?;
        Ok(tables
            .message_types
            .iter()
            .find(|mt| mt.name == name && mt.md5sum == md5sum)
            .cloned())
    }

    async fn save_message_type(&self, message_type: &MessageType) -> Result<()> {
        self.write()?.message_types.insert(message_type.clone());
        Ok(())
    }

    async fn link_message_type(&self, entry_id: i64, message_type: &MessageType) -> Result<()> {
        let mut tables = self.write()?;
        if !tables.message_types.contains(message_type) {
            bail!(
                "message type {} / {} is not stored",
                message_type.name,
                message_type.md5sum
            );
        }
        tables.type_links.insert((entry_id, message_type.clone()));
        Ok(())
    }

    async fn message_types_for(&self, entry_id: i64) -> Result<Vec<MessageType>> {
        Ok(self
            .read()?
            .type_links
            .iter()
            .filter(|(id, _)| *id == entry_id)
            .map(|(_, mt)| mt.clone())
            .collect())
    }

    async fn find_topic(&self, name: &str, entry_id: i64) -> Result<Option<Topic>> {
        Ok(self
            .read()?
            .topics
            .values()
            .find(|t| t.name == name && t.entry_id == entry_id)
            .cloned())
    }

    async fn save_topic(&self, topic: &Topic) -> Result<Topic> {
        let mut tables = self.write()?;
        if !tables.entries.contains_key(&topic.entry_id) {
            bail!("catalog entry {} does not exist", topic.entry_id);
        }
        let id = match topic.id {
            Some(id) => id,
            None => {
                tables.next_topic_id += 1;
                tables.next_topic_id
            }
        };
        let mut stored = topic.clone();
        stored.id = Some(id);
        tables.topics.insert(id, stored.clone());
        Ok(stored)
    }

    async fn topics_for(&self, entry_id: i64) -> Result<Vec<Topic>> {
        Ok(self
            .read()?
            .topics
            .values()
            .filter(|t| t.entry_id == entry_id)
            .cloned()
            .collect())
    }

    async fn track_point_count(&self, entry_id: i64) -> Result<u64> {
        Ok(self
            .read()?
            .points
            .iter()
            .filter(|(id, _)| *id == entry_id)
            .count() as u64)
    }

    async fn insert_track_points(&self, entry_id: i64, points: &[TrackPoint]) -> Result<()> {
        let mut tables = self.write()?;
        if !tables.entries.contains_key(&entry_id) {
            bail!("catalog entry {} does not exist", entry_id);
        }
        tables
            .points
            .extend(points.iter().map(|p| (entry_id, *p)));
        Ok(())
    }

    async fn track_points(&self, entry_ids: &[i64]) -> Result<Vec<TrackPoint>> {
        let tables = self.read()?;
        let mut points: Vec<TrackPoint> = tables
            .points
            .iter()
            .filter(|(id, _)| entry_ids.contains(id))
            .map(|(_, p)| *p)
            .collect();
        points.sort_by(|a, b| a.time.cmp(&b.time));
        Ok(points)
    }
}
