//! Authority rows. Only read here; registration is an external flow.

use sqlx::PgPool;

use crate::models::Authority;

pub async fn fetch(pool: &PgPool, id: &str) -> Result<Option<Authority>, sqlx::Error> {
    sqlx::query_as::<_, Authority>("SELECT * FROM authorities WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}
