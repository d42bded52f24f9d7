//! Append-only location samples.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::LocationRow;

pub struct NewLocation<'a> {
    pub tourist_id: &'a str,
    pub trip_id: Option<i64>,
    pub lat: f64,
    pub lon: f64,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub accuracy: Option<f64>,
    pub client_ts: DateTime<Utc>,
    pub safety_score: Option<i32>,
}

pub async fn insert(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    new: &NewLocation<'_>,
) -> Result<LocationRow, sqlx::Error> {
    sqlx::query_as::<_, LocationRow>(
        r#"
        INSERT INTO locations
            (tourist_id, trip_id, lat, lon, altitude, speed, accuracy,
             client_ts, safety_score, safety_score_updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9,
                CASE WHEN $9 IS NULL THEN NULL ELSE now() END)
        RETURNING *
        "#,
    )
    .bind(new.tourist_id)
    .bind(new.trip_id)
    .bind(new.lat)
    .bind(new.lon)
    .bind(new.altitude)
    .bind(new.speed)
    .bind(new.accuracy)
    .bind(new.client_ts)
    .bind(new.safety_score)
    .fetch_one(&mut **tx)
    .await
}

/// Most recent samples for a tourist, newest first.
pub async fn recent(
    pool: &PgPool,
    tourist_id: &str,
    limit: i64,
) -> Result<Vec<LocationRow>, sqlx::Error> {
    sqlx::query_as::<_, LocationRow>(
        r#"
        SELECT * FROM locations
        WHERE tourist_id = $1
        ORDER BY ingested_at DESC
        LIMIT $2
        "#,
    )
    .bind(tourist_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Fill in a score computed after the fact (recompute sweep).
pub async fn set_score(pool: &PgPool, id: i64, score: i32) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE locations
        SET safety_score = $2, safety_score_updated_at = now()
        WHERE id = $1 AND safety_score IS NULL
        "#,
    )
    .bind(id)
    .bind(score)
    .execute(pool)
    .await?;
    Ok(())
}

/// Rows whose scoring failed at ingest time, oldest first.
pub async fn unscored(pool: &PgPool, limit: i64) -> Result<Vec<LocationRow>, sqlx::Error> {
    sqlx::query_as::<_, LocationRow>(
        r#"
        SELECT * FROM locations
        WHERE safety_score IS NULL
        ORDER BY ingested_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
