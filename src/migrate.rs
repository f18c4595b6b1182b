use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every catalog table and index. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // One row per physical bag file
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL,
            filename TEXT NOT NULL,
            content_id TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            missing INTEGER NOT NULL DEFAULT 0,
            size INTEGER NOT NULL,
            duration_secs REAL NOT NULL DEFAULT 0,
            start_time INTEGER,
            end_time INTEGER,
            message_count INTEGER NOT NULL DEFAULT 0,
            version TEXT NOT NULL,
            compressed INTEGER NOT NULL DEFAULT 0,
            indexed INTEGER NOT NULL DEFAULT 0,
            latitude_deg REAL,
            longitude_deg REAL,
            location_name TEXT,
            description TEXT,
            vehicle TEXT,
            has_track INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Message types are shared by every bag that records them
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS message_types (
            name TEXT NOT NULL,
            md5sum TEXT NOT NULL,
            PRIMARY KEY (name, md5sum)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bag_message_types (
            bag_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            md5sum TEXT NOT NULL,
            PRIMARY KEY (bag_id, name, md5sum),
            FOREIGN KEY (bag_id) REFERENCES bags(id),
            FOREIGN KEY (name, md5sum) REFERENCES message_types(name, md5sum)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS topics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bag_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            type_name TEXT NOT NULL,
            type_md5sum TEXT NOT NULL,
            message_count INTEGER NOT NULL,
            connection_count INTEGER NOT NULL,
            UNIQUE(bag_id, name),
            FOREIGN KEY (bag_id) REFERENCES bags(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bag_positions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bag_id INTEGER NOT NULL,
            longitude REAL NOT NULL,
            latitude REAL NOT NULL,
            position_time INTEGER NOT NULL,
            FOREIGN KEY (bag_id) REFERENCES bags(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_bags_missing ON bags(missing)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_topics_bag_id ON topics(bag_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_bag_positions_bag_time ON bag_positions(bag_id, position_time)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
