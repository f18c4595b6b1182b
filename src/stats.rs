//! Catalog statistics and health overview.
//!
//! Provides a quick summary of what's cataloged: bag counts, missing files,
//! message types, topics and stored GPS points, plus a per-vehicle
//! breakdown. Used by `bagcat stats` to confirm that scans are doing what
//! they should.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// Per-vehicle breakdown of bag counts.
struct VehicleStats {
    vehicle: String,
    bag_count: i64,
    total_bytes: i64,
    with_track: i64,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_bags: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bags")
        .fetch_one(&pool)
        .await?;

    let missing_bags: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bags WHERE missing = 1")
        .fetch_one(&pool)
        .await?;

    let message_types: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM message_types")
        .fetch_one(&pool)
        .await?;

    let topics: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM topics")
        .fetch_one(&pool)
        .await?;

    let positions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bag_positions")
        .fetch_one(&pool)
        .await?;

    let catalog_bytes: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(size), 0) FROM bags")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Bag Catalog — Database Stats");
    println!("============================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  Bags:          {} ({})", total_bags, format_bytes(catalog_bytes as u64));
    println!("  Missing:       {}", missing_bags);
    println!("  Message types: {}", message_types);
    println!("  Topics:        {}", topics);
    println!("  GPS points:    {}", positions);

    let vehicle_rows = sqlx::query(
        r#"
        SELECT
            COALESCE(vehicle, '(unknown)') AS vehicle,
            COUNT(*) AS bag_count,
            COALESCE(SUM(size), 0) AS total_bytes,
            SUM(has_track) AS with_track
        FROM bags
        GROUP BY COALESCE(vehicle, '(unknown)')
        ORDER BY bag_count DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let vehicle_stats: Vec<VehicleStats> = vehicle_rows
        .iter()
        .map(|row| VehicleStats {
            vehicle: row.get("vehicle"),
            bag_count: row.get("bag_count"),
            total_bytes: row.get("total_bytes"),
            with_track: row.get::<Option<i64>, _>("with_track").unwrap_or(0),
        })
        .collect();

    if !vehicle_stats.is_empty() {
        println!();
        println!("  By vehicle:");
        println!(
            "  {:<24} {:>6} {:>10} {:>8}",
            "VEHICLE", "BAGS", "SIZE", "TRACKS"
        );
        println!("  {}", "-".repeat(52));

        for v in &vehicle_stats {
            println!(
                "  {:<24} {:>6} {:>10} {:>8}",
                v.vehicle,
                v.bag_count,
                format_bytes(v.total_bytes as u64),
                v.with_track
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
