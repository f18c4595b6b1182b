//! Core data models used throughout bag-catalog.
//!
//! These types represent the catalog records produced by ingestion and the
//! structural metadata extracted from a bag file before it is reconciled.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::track::GpsTrack;

/// One physical bag file known to the catalog.
///
/// `id` is `None` until the store assigns one on first [`save`](crate::store::CatalogStore::save).
/// `path` is the containing directory and `filename` the final component;
/// together they form the filesystem location. `content_id` is unique across
/// all stored entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: Option<i64>,
    pub path: String,
    pub filename: String,
    pub content_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub missing: bool,
    pub size: u64,
    pub duration_secs: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub message_count: u64,
    pub version: String,
    pub compressed: bool,
    pub indexed: bool,
    pub latitude_deg: Option<f64>,
    pub longitude_deg: Option<f64>,
    pub location_name: Option<String>,
    pub description: Option<String>,
    pub vehicle: Option<String>,
    /// Set once GPS positions have been stored (or were found already stored).
    pub has_track: bool,
}

impl CatalogEntry {
    /// Build an unsaved entry for a freshly fingerprinted file.
    pub fn from_metadata(
        file: &Path,
        content_id: &str,
        size: u64,
        meta: &BagMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        let (path, filename) = split_location(file);
        let first = meta.track.first_position();
        Self {
            id: None,
            path,
            filename,
            content_id: content_id.to_string(),
            created_at: now,
            updated_at: now,
            missing: false,
            size,
            duration_secs: meta.duration_secs,
            start_time: meta.start_time,
            end_time: meta.end_time,
            message_count: meta.message_count,
            version: meta.version.clone(),
            compressed: meta.compressed,
            indexed: meta.indexed,
            latitude_deg: first.map(|(_, lat)| lat),
            longitude_deg: first.map(|(lon, _)| lon),
            location_name: None,
            description: None,
            vehicle: meta.vehicle.clone(),
            has_track: false,
        }
    }

    /// Full filesystem location (`path` joined with `filename`).
    pub fn full_path(&self) -> PathBuf {
        Path::new(&self.path).join(&self.filename)
    }

    /// Point this entry at a new filesystem location.
    pub fn set_location(&mut self, file: &Path) {
        let (path, filename) = split_location(file);
        self.path = path;
        self.filename = filename;
    }
}

/// Split a file path into its `(directory, filename)` catalog columns.
pub fn split_location(file: &Path) -> (String, String) {
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let path = file
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    (path, filename)
}

/// A message schema: type name plus its md5 definition hash.
///
/// Shared by every entry that records messages of this type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageType {
    pub name: String,
    pub md5sum: String,
}

/// A topic recorded in one catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: Option<i64>,
    pub entry_id: i64,
    pub name: String,
    pub message_type: MessageType,
    pub message_count: u64,
    pub connection_count: u32,
}

/// One GPS fix belonging to a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub longitude: f64,
    pub latitude: f64,
    pub time: DateTime<Utc>,
}

/// Topic summary as read from a bag file, before it is attached to an entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicInfo {
    pub name: String,
    pub message_type: String,
    pub md5sum: String,
    pub message_count: u64,
    pub connection_count: u32,
}

/// Structural metadata extracted from a bag file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BagMetadata {
    pub version: String,
    pub compressed: bool,
    pub indexed: bool,
    pub message_count: u64,
    pub duration_secs: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub vehicle: Option<String>,
    /// Distinct `type name -> {md5sum}` pairs seen in the file.
    pub message_types: BTreeMap<String, BTreeSet<String>>,
    pub topics: Vec<TopicInfo>,
    pub track: GpsTrack,
}

impl BagMetadata {
    /// Every distinct message type, flattened out of the multimap.
    pub fn message_type_list(&self) -> Vec<MessageType> {
        self.message_types
            .iter()
            .flat_map(|(name, sums)| {
                sums.iter().map(move |md5sum| MessageType {
                    name: name.clone(),
                    md5sum: md5sum.clone(),
                })
            })
            .collect()
    }
}
