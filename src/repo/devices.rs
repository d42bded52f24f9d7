//! Device push-token registry. A token moves to whichever tourist last
//! registered it (device handoff, reinstalls).

use sqlx::PgPool;

use crate::models::DeviceRow;

pub async fn register(
    pool: &PgPool,
    tourist_id: &str,
    push_token: &str,
    platform: &str,
) -> Result<DeviceRow, sqlx::Error> {
    sqlx::query_as::<_, DeviceRow>(
        r#"
        INSERT INTO devices (tourist_id, push_token, platform)
        VALUES ($1, $2, $3)
        ON CONFLICT (push_token)
        DO UPDATE SET tourist_id = $1, platform = $3, is_active = TRUE
        RETURNING *
        "#,
    )
    .bind(tourist_id)
    .bind(push_token)
    .bind(platform)
    .fetch_one(pool)
    .await
}

pub async fn active_for(pool: &PgPool, tourist_id: &str) -> Result<Vec<DeviceRow>, sqlx::Error> {
    sqlx::query_as::<_, DeviceRow>(
        "SELECT * FROM devices WHERE tourist_id = $1 AND is_active",
    )
    .bind(tourist_id)
    .fetch_all(pool)
    .await
}
