//! Tourist rows. `last_seen`/`last_location`/`safety_score` are written by
//! the ingest path only.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::Tourist;

pub async fn fetch(pool: &PgPool, id: &str) -> Result<Option<Tourist>, sqlx::Error> {
    sqlx::query_as::<_, Tourist>("SELECT * FROM tourists WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_active(pool: &PgPool, id: &str) -> Result<Option<Tourist>, sqlx::Error> {
    sqlx::query_as::<_, Tourist>("SELECT * FROM tourists WHERE id = $1 AND is_active")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Position/score update inside the ingest transaction. `last_seen` is
/// monotonic: an out-of-order worker can never move it backwards.
pub async fn update_position(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: &str,
    lat: f64,
    lon: f64,
    seen: DateTime<Utc>,
    safety_score: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE tourists
        SET last_lat = $2, last_lon = $3,
            last_seen = GREATEST(COALESCE(last_seen, $4), $4),
            safety_score = $5
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(lat)
    .bind(lon)
    .bind(seen)
    .bind(safety_score)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Recent positions inside a bounding box, for the crowd-density factor.
/// The caller applies the exact great-circle cut.
pub async fn recent_positions_in_box(
    pool: &PgPool,
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
    seen_since: DateTime<Utc>,
) -> Result<Vec<(String, f64, f64)>, sqlx::Error> {
    let rows: Vec<(String, f64, f64)> = sqlx::query_as(
        r#"
        SELECT id, last_lat, last_lon FROM tourists
        WHERE is_active
          AND last_seen >= $5
          AND last_lat BETWEEN $1 AND $2
          AND last_lon BETWEEN $3 AND $4
        "#,
    )
    .bind(min_lat)
    .bind(max_lat)
    .bind(min_lon)
    .bind(max_lon)
    .bind(seen_since)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Broadcast targeting candidates inside a bounding box: id, position,
/// phone. One read-consistent query; the dispatcher applies the exact
/// geometry cut.
pub async fn broadcast_candidates(
    pool: &PgPool,
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
    seen_since: DateTime<Utc>,
) -> Result<Vec<(String, f64, f64, Option<String>)>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, last_lat, last_lon, phone FROM tourists
        WHERE is_active
          AND last_seen >= $5
          AND last_lat BETWEEN $1 AND $2
          AND last_lon BETWEEN $3 AND $4
        "#,
    )
    .bind(min_lat)
    .bind(max_lat)
    .bind(min_lon)
    .bind(max_lon)
    .bind(seen_since)
    .fetch_all(pool)
    .await
}

/// Every active tourist seen since the cutoff, position or not — the
/// `all`-type broadcast target set.
pub async fn all_recent(
    pool: &PgPool,
    seen_since: DateTime<Utc>,
) -> Result<Vec<(String, Option<String>)>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, phone FROM tourists WHERE is_active AND last_seen >= $1",
    )
    .bind(seen_since)
    .fetch_all(pool)
    .await
}
