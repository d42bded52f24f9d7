//! Trip state machine. The one-active-trip invariant lives in the partial
//! unique index `trips_one_active`; a second concurrent start surfaces as a
//! uniqueness violation, not as application logic.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::TripRow;

pub async fn start(
    pool: &PgPool,
    tourist_id: &str,
    destination: &str,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
) -> Result<TripRow, sqlx::Error> {
    sqlx::query_as::<_, TripRow>(
        r#"
        INSERT INTO trips (tourist_id, destination, start_date, end_date, status)
        VALUES ($1, $2, $3, $4, 'active')
        RETURNING *
        "#,
    )
    .bind(tourist_id)
    .bind(destination)
    .bind(start_date)
    .bind(end_date)
    .fetch_one(pool)
    .await
}

/// Complete the tourist's active trip. Returns None when no trip is active.
pub async fn end_active(pool: &PgPool, tourist_id: &str) -> Result<Option<TripRow>, sqlx::Error> {
    sqlx::query_as::<_, TripRow>(
        r#"
        UPDATE trips SET status = 'completed'
        WHERE tourist_id = $1 AND status = 'active'
        RETURNING *
        "#,
    )
    .bind(tourist_id)
    .fetch_optional(pool)
    .await
}

pub async fn active_for(pool: &PgPool, tourist_id: &str) -> Result<Option<TripRow>, sqlx::Error> {
    sqlx::query_as::<_, TripRow>(
        "SELECT * FROM trips WHERE tourist_id = $1 AND status = 'active'",
    )
    .bind(tourist_id)
    .fetch_optional(pool)
    .await
}
