//! Alert rows. Generated-alert dedup is enforced here by the partial unique
//! index on (tourist, kind, zone, bucket): concurrent inserts from any
//! number of instances collapse to one row.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{AlertKind, AlertRow, Severity};

pub struct NewAlert<'a> {
    pub tourist_id: &'a str,
    pub location_id: Option<i64>,
    pub kind: AlertKind,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub metadata: serde_json::Value,
    pub zone_id: Option<i64>,
    /// 30-minute bucket for deduplicated kinds, None otherwise.
    pub dedup_bucket: Option<i64>,
}

/// Insert an alert. For deduplicated kinds a bucket collision returns
/// `None` — some instance already created this alert.
pub async fn insert(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    new: &NewAlert<'_>,
) -> Result<Option<AlertRow>, sqlx::Error> {
    sqlx::query_as::<_, AlertRow>(
        r#"
        INSERT INTO alerts
            (tourist_id, location_id, kind, severity, title, description,
             lat, lon, metadata, zone_id, dedup_bucket)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT DO NOTHING
        RETURNING *
        "#,
    )
    .bind(new.tourist_id)
    .bind(new.location_id)
    .bind(new.kind.as_str())
    .bind(new.severity.as_str())
    .bind(&new.title)
    .bind(&new.description)
    .bind(new.lat)
    .bind(new.lon)
    .bind(&new.metadata)
    .bind(new.zone_id)
    .bind(new.dedup_bucket)
    .fetch_optional(&mut **tx)
    .await
}

pub async fn fetch(pool: &PgPool, id: i64) -> Result<Option<AlertRow>, sqlx::Error> {
    sqlx::query_as::<_, AlertRow>("SELECT * FROM alerts WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Recent alert positions near a point (bounding-box prefilter; caller does
/// the great-circle cut). Used by the nearby-alerts scoring factor.
pub async fn recent_in_box(
    pool: &PgPool,
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
    created_since: DateTime<Utc>,
) -> Result<Vec<(String, f64, f64)>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT severity, lat, lon FROM alerts
        WHERE created_at >= $5
          AND lat BETWEEN $1 AND $2
          AND lon BETWEEN $3 AND $4
        "#,
    )
    .bind(min_lat)
    .bind(max_lat)
    .bind(min_lon)
    .bind(max_lon)
    .bind(created_since)
    .fetch_all(pool)
    .await
}

/// All-time alert positions near a point, capped. Only the count matters to
/// the historical factor and it saturates at 30, so the cap is harmless.
pub async fn historical_in_box(
    pool: &PgPool,
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
) -> Result<Vec<(f64, f64)>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT lat, lon FROM alerts
        WHERE lat BETWEEN $1 AND $2
          AND lon BETWEEN $3 AND $4
        LIMIT 500
        "#,
    )
    .bind(min_lat)
    .bind(max_lat)
    .bind(min_lon)
    .bind(max_lon)
    .fetch_all(pool)
    .await
}

/// Full rows near a point for the nearby-risks endpoint.
pub async fn recent_rows_in_box(
    pool: &PgPool,
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
    created_since: DateTime<Utc>,
) -> Result<Vec<AlertRow>, sqlx::Error> {
    sqlx::query_as::<_, AlertRow>(
        r#"
        SELECT * FROM alerts
        WHERE created_at >= $5
          AND lat BETWEEN $1 AND $2
          AND lon BETWEEN $3 AND $4
        ORDER BY created_at DESC
        LIMIT 200
        "#,
    )
    .bind(min_lat)
    .bind(max_lat)
    .bind(min_lon)
    .bind(max_lon)
    .bind(created_since)
    .fetch_all(pool)
    .await
}

pub async fn recent(
    pool: &PgPool,
    created_since: DateTime<Utc>,
    severity: Option<Severity>,
    limit: i64,
) -> Result<Vec<AlertRow>, sqlx::Error> {
    match severity {
        Some(s) => {
            sqlx::query_as::<_, AlertRow>(
                r#"
                SELECT * FROM alerts
                WHERE created_at >= $1 AND severity = $2
                ORDER BY created_at DESC
                LIMIT $3
                "#,
            )
            .bind(created_since)
            .bind(s.as_str())
            .bind(limit)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, AlertRow>(
                r#"
                SELECT * FROM alerts
                WHERE created_at >= $1
                ORDER BY created_at DESC
                LIMIT $2
                "#,
            )
            .bind(created_since)
            .bind(limit)
            .fetch_all(pool)
            .await
        }
    }
}

/// Alerts created after `since`, oldest first — reconnection replay for
/// authority sessions.
pub async fn created_since(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> Result<Vec<AlertRow>, sqlx::Error> {
    sqlx::query_as::<_, AlertRow>(
        r#"
        SELECT * FROM alerts
        WHERE created_at > $1
        ORDER BY created_at ASC
        LIMIT 500
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await
}

/// Same, restricted to one tourist — replay for tourist sessions.
pub async fn created_since_for_tourist(
    pool: &PgPool,
    tourist_id: &str,
    since: DateTime<Utc>,
) -> Result<Vec<AlertRow>, sqlx::Error> {
    sqlx::query_as::<_, AlertRow>(
        r#"
        SELECT * FROM alerts
        WHERE tourist_id = $1 AND created_at > $2
        ORDER BY created_at ASC
        LIMIT 500
        "#,
    )
    .bind(tourist_id)
    .bind(since)
    .fetch_all(pool)
    .await
}

/// Acknowledge an alert. Idempotent: an earlier acknowledgment wins.
pub async fn acknowledge(
    pool: &PgPool,
    id: i64,
    authority_id: &str,
) -> Result<Option<AlertRow>, sqlx::Error> {
    sqlx::query_as::<_, AlertRow>(
        r#"
        UPDATE alerts
        SET acknowledged_at = COALESCE(acknowledged_at, now()),
            acknowledged_by = COALESCE(acknowledged_by, $2)
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(authority_id)
    .fetch_optional(pool)
    .await
}

/// Resolve an alert. Resolving implies acknowledging; `resolved_at`, once
/// set, is never cleared or moved.
pub async fn resolve(
    pool: &PgPool,
    id: i64,
    authority_id: &str,
) -> Result<Option<AlertRow>, sqlx::Error> {
    sqlx::query_as::<_, AlertRow>(
        r#"
        UPDATE alerts
        SET acknowledged_at = COALESCE(acknowledged_at, now()),
            acknowledged_by = COALESCE(acknowledged_by, $2),
            resolved_at = COALESCE(resolved_at, now()),
            resolved_by = COALESCE(resolved_by, $2)
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(authority_id)
    .fetch_optional(pool)
    .await
}

/// Panic/SOS alerts for the unauthenticated public feed. Identity and exact
/// position are stripped by the handler before serialization.
pub async fn public_panic(
    pool: &PgPool,
    created_since: DateTime<Utc>,
    show_resolved: bool,
    limit: i64,
) -> Result<Vec<AlertRow>, sqlx::Error> {
    if show_resolved {
        sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT * FROM alerts
            WHERE kind IN ('panic', 'sos') AND created_at >= $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(created_since)
        .bind(limit)
        .fetch_all(pool)
        .await
    } else {
        sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT * FROM alerts
            WHERE kind IN ('panic', 'sos') AND created_at >= $1
              AND resolved_at IS NULL
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(created_since)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
