//! Broadcast records and acknowledgments. The ack row and the counter on
//! the broadcast move in one transaction, so the counter always equals the
//! number of ack rows without needing a trigger.

use chrono::Utc;
use sqlx::PgPool;

use crate::models::BroadcastRow;

pub struct NewBroadcast<'a> {
    pub broadcast_number: String,
    pub broadcast_type: &'a str,
    pub center_lat: Option<f64>,
    pub center_lon: Option<f64>,
    pub radius_km: Option<f64>,
    pub zone_id: Option<i64>,
    pub bbox: Option<(f64, f64, f64, f64)>,
    pub title: &'a str,
    pub message: &'a str,
    pub severity: &'a str,
    pub sent_by: &'a str,
    pub expires_at: Option<chrono::DateTime<Utc>>,
}

pub async fn insert(pool: &PgPool, new: &NewBroadcast<'_>) -> Result<BroadcastRow, sqlx::Error> {
    let (min_lat, min_lon, max_lat, max_lon) = match new.bbox {
        Some((a, b, c, d)) => (Some(a), Some(b), Some(c), Some(d)),
        None => (None, None, None, None),
    };
    sqlx::query_as::<_, BroadcastRow>(
        r#"
        INSERT INTO broadcasts
            (broadcast_number, broadcast_type, center_lat, center_lon, radius_km,
             zone_id, min_lat, min_lon, max_lat, max_lon,
             title, message, severity, sent_by, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        RETURNING *
        "#,
    )
    .bind(&new.broadcast_number)
    .bind(new.broadcast_type)
    .bind(new.center_lat)
    .bind(new.center_lon)
    .bind(new.radius_km)
    .bind(new.zone_id)
    .bind(min_lat)
    .bind(min_lon)
    .bind(max_lat)
    .bind(max_lon)
    .bind(new.title)
    .bind(new.message)
    .bind(new.severity)
    .bind(new.sent_by)
    .bind(new.expires_at)
    .fetch_one(pool)
    .await
}

pub async fn fetch(pool: &PgPool, id: i64) -> Result<Option<BroadcastRow>, sqlx::Error> {
    sqlx::query_as::<_, BroadcastRow>("SELECT * FROM broadcasts WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Record how many delivery legs were submitted.
pub async fn set_delivery_counts(
    pool: &PgPool,
    id: i64,
    tourists_notified: i32,
    devices_notified: i32,
) -> Result<BroadcastRow, sqlx::Error> {
    sqlx::query_as::<_, BroadcastRow>(
        r#"
        UPDATE broadcasts
        SET tourists_notified = $2, devices_notified = $3
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(tourists_notified)
    .bind(devices_notified)
    .fetch_one(pool)
    .await
}

/// Insert an acknowledgment and bump the counter, once per (broadcast,
/// tourist). A repeat returns false and leaves the counter alone.
#[allow(clippy::too_many_arguments)]
pub async fn acknowledge(
    pool: &PgPool,
    broadcast_id: i64,
    tourist_id: &str,
    status: &str,
    lat: Option<f64>,
    lon: Option<f64>,
    notes: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let inserted = sqlx::query(
        r#"
        INSERT INTO broadcast_acks (broadcast_id, tourist_id, status, lat, lon, notes)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (broadcast_id, tourist_id) DO NOTHING
        "#,
    )
    .bind(broadcast_id)
    .bind(tourist_id)
    .bind(status)
    .bind(lat)
    .bind(lon)
    .bind(notes)
    .execute(&mut *tx)
    .await?
    .rows_affected()
        > 0;

    if inserted {
        sqlx::query(
            "UPDATE broadcasts SET acknowledgment_count = acknowledgment_count + 1 WHERE id = $1",
        )
        .bind(broadcast_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(inserted)
}

/// Unexpired broadcasts for tourist-side listing, newest first. Expired
/// ones stay in history but are not listed here.
pub async fn active(pool: &PgPool, limit: i64) -> Result<Vec<BroadcastRow>, sqlx::Error> {
    sqlx::query_as::<_, BroadcastRow>(
        r#"
        SELECT * FROM broadcasts
        WHERE expires_at IS NULL OR expires_at > now()
        ORDER BY sent_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
