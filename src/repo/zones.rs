//! Zone rows. Deletion is soft; the geofence index only ever sees active
//! zones.

use sqlx::PgPool;

use crate::models::Zone;

pub async fn fetch_active(pool: &PgPool) -> Result<Vec<Zone>, sqlx::Error> {
    sqlx::query_as::<_, Zone>("SELECT * FROM zones WHERE is_active ORDER BY id")
        .fetch_all(pool)
        .await
}

pub async fn fetch(pool: &PgPool, id: i64) -> Result<Option<Zone>, sqlx::Error> {
    sqlx::query_as::<_, Zone>("SELECT * FROM zones WHERE id = $1 AND is_active")
        .bind(id)
        .fetch_optional(pool)
        .await
}

#[allow(clippy::too_many_arguments)]
pub async fn insert(
    pool: &PgPool,
    name: &str,
    zone_type: &str,
    center_lat: f64,
    center_lon: f64,
    radius_m: Option<f64>,
    bounds: Option<&serde_json::Value>,
    created_by: &str,
) -> Result<Zone, sqlx::Error> {
    sqlx::query_as::<_, Zone>(
        r#"
        INSERT INTO zones (name, zone_type, center_lat, center_lon, radius_m, bounds, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(name)
    .bind(zone_type)
    .bind(center_lat)
    .bind(center_lon)
    .bind(radius_m)
    .bind(bounds)
    .bind(created_by)
    .fetch_one(pool)
    .await
}

pub async fn soft_delete(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE zones SET is_active = FALSE, updated_at = now() WHERE id = $1 AND is_active",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}
