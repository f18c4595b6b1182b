//! SQLite-backed [`CatalogStore`] implementation.
//!
//! Maps each [`CatalogStore`] operation onto the schema created by
//! [`crate::migrate`]. Timestamps are stored as microseconds since the Unix
//! epoch; sizes and counts as `INTEGER`.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use bag_catalog_core::models::{CatalogEntry, MessageType, Topic, TrackPoint};
use bag_catalog_core::store::CatalogStore;

/// SQLite implementation of the [`CatalogStore`] trait.
///
/// Wraps a [`SqlitePool`]. The `bags.content_id` column is `UNIQUE`, so a
/// second entry with the same content is refused here as well as by the
/// reconciler.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const ENTRY_COLUMNS: &str = "id, path, filename, content_id, created_at, updated_at, missing, \
     size, duration_secs, start_time, end_time, message_count, version, compressed, indexed, \
     latitude_deg, longitude_deg, location_name, description, vehicle, has_track";

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(us: i64) -> Result<DateTime<Utc>> {
    let secs = us.div_euclid(1_000_000);
    let nanos = (us.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos).ok_or_else(|| anyhow!("timestamp out of range: {}", us))
}

fn entry_from_row(row: &SqliteRow) -> Result<CatalogEntry> {
    let start: Option<i64> = row.try_get("start_time")?;
    let end: Option<i64> = row.try_get("end_time")?;
    Ok(CatalogEntry {
        id: Some(row.try_get("id")?),
        path: row.try_get("path")?,
        filename: row.try_get("filename")?,
        content_id: row.try_get("content_id")?,
        created_at: from_micros(row.try_get("created_at")?)?,
        updated_at: from_micros(row.try_get("updated_at")?)?,
        missing: row.try_get("missing")?,
        size: row.try_get::<i64, _>("size")? as u64,
        duration_secs: row.try_get("duration_secs")?,
        start_time: start.map(from_micros).transpose()?,
        end_time: end.map(from_micros).transpose()?,
        message_count: row.try_get::<i64, _>("message_count")? as u64,
        version: row.try_get("version")?,
        compressed: row.try_get("compressed")?,
        indexed: row.try_get("indexed")?,
        latitude_deg: row.try_get("latitude_deg")?,
        longitude_deg: row.try_get("longitude_deg")?,
        location_name: row.try_get("location_name")?,
        description: row.try_get("description")?,
        vehicle: row.try_get("vehicle")?,
        has_track: row.try_get("has_track")?,
    })
}

fn topic_from_row(row: &SqliteRow) -> Result<Topic> {
    Ok(Topic {
        id: Some(row.try_get("id")?),
        entry_id: row.try_get("bag_id")?,
        name: row.try_get("name")?,
        message_type: MessageType {
            name: row.try_get("type_name")?,
            md5sum: row.try_get("type_md5sum")?,
        },
        message_count: row.try_get::<i64, _>("message_count")? as u64,
        connection_count: row.try_get::<i64, _>("connection_count")? as u32,
    })
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn find_by_content_id(&self, content_id: &str) -> Result<Option<CatalogEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM bags WHERE content_id = ?",
            ENTRY_COLUMNS
        ))
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn get(&self, id: i64) -> Result<Option<CatalogEntry>> {
        let row = sqlx::query(&format!("SELECT {} FROM bags WHERE id = ?", ENTRY_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn find_all(&self) -> Result<Vec<CatalogEntry>> {
        let rows = sqlx::query(&format!("SELECT {} FROM bags ORDER BY id", ENTRY_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn find_all_missing(&self) -> Result<Vec<CatalogEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM bags WHERE missing = 1 ORDER BY id",
            ENTRY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn save(&self, entry: &CatalogEntry) -> Result<CatalogEntry> {
        match entry.id {
            Some(id) => {
                let result = sqlx::query(
                    r#"
                    UPDATE bags SET
                        path = ?, filename = ?, content_id = ?, created_at = ?,
                        updated_at = ?, missing = ?, size = ?, duration_secs = ?,
                        start_time = ?, end_time = ?, message_count = ?, version = ?,
                        compressed = ?, indexed = ?, latitude_deg = ?, longitude_deg = ?,
                        location_name = ?, description = ?, vehicle = ?, has_track = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&entry.path)
                .bind(&entry.filename)
                .bind(&entry.content_id)
                .bind(to_micros(entry.created_at))
                .bind(to_micros(entry.updated_at))
                .bind(entry.missing)
                .bind(entry.size as i64)
                .bind(entry.duration_secs)
                .bind(entry.start_time.map(to_micros))
                .bind(entry.end_time.map(to_micros))
                .bind(entry.message_count as i64)
                .bind(&entry.version)
                .bind(entry.compressed)
                .bind(entry.indexed)
                .bind(entry.latitude_deg)
                .bind(entry.longitude_deg)
                .bind(&entry.location_name)
                .bind(&entry.description)
                .bind(&entry.vehicle)
                .bind(entry.has_track)
                .bind(id)
                .execute(&self.pool)
                .await?;

                if result.rows_affected() == 0 {
                    bail!("catalog entry {} does not exist", id);
                }
                Ok(entry.clone())
            }
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO bags (path, filename, content_id, created_at, updated_at,
                                      missing, size, duration_secs, start_time, end_time,
                                      message_count, version, compressed, indexed,
                                      latitude_deg, longitude_deg, location_name,
                                      description, vehicle, has_track)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&entry.path)
                .bind(&entry.filename)
                .bind(&entry.content_id)
                .bind(to_micros(entry.created_at))
                .bind(to_micros(entry.updated_at))
                .bind(entry.missing)
                .bind(entry.size as i64)
                .bind(entry.duration_secs)
                .bind(entry.start_time.map(to_micros))
                .bind(entry.end_time.map(to_micros))
                .bind(entry.message_count as i64)
                .bind(&entry.version)
                .bind(entry.compressed)
                .bind(entry.indexed)
                .bind(entry.latitude_deg)
                .bind(entry.longitude_deg)
                .bind(&entry.location_name)
                .bind(&entry.description)
                .bind(&entry.vehicle)
                .bind(entry.has_track)
                .execute(&self.pool)
                .await?;

                let mut stored = entry.clone();
                stored.id = Some(result.last_insert_rowid());
                Ok(stored)
            }
        }
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM bag_positions WHERE bag_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM topics WHERE bag_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM bag_message_types WHERE bag_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM bags WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_structure(&self, entry_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM topics WHERE bag_id = ?")
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM bag_message_types WHERE bag_id = ?")
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_message_type(&self, name: &str, md5sum: &str) -> Result<Option<MessageType>> {
        let row = sqlx::query("SELECT name, md5sum FROM message_types WHERE name = ? AND md5sum = ?")
            .bind(name)
            .bind(md5sum)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| MessageType {
            name: r.get("name"),
            md5sum: r.get("md5sum"),
        }))
    }

    async fn save_message_type(&self, message_type: &MessageType) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO message_types (name, md5sum) VALUES (?, ?)")
            .bind(&message_type.name)
            .bind(&message_type.md5sum)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn link_message_type(&self, entry_id: i64, message_type: &MessageType) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO bag_message_types (bag_id, name, md5sum) VALUES (?, ?, ?)",
        )
        .bind(entry_id)
        .bind(&message_type.name)
        .bind(&message_type.md5sum)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn message_types_for(&self, entry_id: i64) -> Result<Vec<MessageType>> {
        let rows = sqlx::query(
            "SELECT name, md5sum FROM bag_message_types WHERE bag_id = ? ORDER BY name, md5sum",
        )
        .bind(entry_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| MessageType {
                name: r.get("name"),
                md5sum: r.get("md5sum"),
            })
            .collect())
    }

    async fn find_topic(&self, name: &str, entry_id: i64) -> Result<Option<Topic>> {
        let row = sqlx::query(
            r#"
            SELECT id, bag_id, name, type_name, type_md5sum, message_count, connection_count
            FROM topics
            WHERE name = ? AND bag_id = ?
            "#,
        )
        .bind(name)
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(topic_from_row).transpose()
    }

    async fn save_topic(&self, topic: &Topic) -> Result<Topic> {
        let mut stored = topic.clone();
        match topic.id {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE topics SET
                        bag_id = ?, name = ?, type_name = ?, type_md5sum = ?,
                        message_count = ?, connection_count = ?
                    WHERE id = ?
                    "#,
                )
                .bind(topic.entry_id)
                .bind(&topic.name)
                .bind(&topic.message_type.name)
                .bind(&topic.message_type.md5sum)
                .bind(topic.message_count as i64)
                .bind(topic.connection_count as i64)
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO topics (bag_id, name, type_name, type_md5sum,
                                        message_count, connection_count)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(topic.entry_id)
                .bind(&topic.name)
                .bind(&topic.message_type.name)
                .bind(&topic.message_type.md5sum)
                .bind(topic.message_count as i64)
                .bind(topic.connection_count as i64)
                .execute(&self.pool)
                .await?;
                stored.id = Some(result.last_insert_rowid());
            }
        }
        Ok(stored)
    }

    async fn topics_for(&self, entry_id: i64) -> Result<Vec<Topic>> {
        let rows = sqlx::query(
            r#"
            SELECT id, bag_id, name, type_name, type_md5sum, message_count, connection_count
            FROM topics
            WHERE bag_id = ?
            ORDER BY name
            "#,
        )
        .bind(entry_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(topic_from_row).collect()
    }

    async fn track_point_count(&self, entry_id: i64) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bag_positions WHERE bag_id = ?")
            .bind(entry_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn insert_track_points(&self, entry_id: i64, points: &[TrackPoint]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for point in points {
            sqlx::query(
                "INSERT INTO bag_positions (bag_id, longitude, latitude, position_time) VALUES (?, ?, ?, ?)",
            )
            .bind(entry_id)
            .bind(point.longitude)
            .bind(point.latitude)
            .bind(to_micros(point.time))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn track_points(&self, entry_ids: &[i64]) -> Result<Vec<TrackPoint>> {
        if entry_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT longitude, latitude, position_time FROM bag_positions WHERE bag_id IN (",
        );
        let mut ids = query.separated(", ");
        for id in entry_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(") ORDER BY position_time, id");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| {
                Ok(TrackPoint {
                    longitude: r.try_get("longitude")?,
                    latitude: r.try_get("latitude")?,
                    time: from_micros(r.try_get("position_time")?)?,
                })
            })
            .collect()
    }
}
