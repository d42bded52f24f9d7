//! Incident case files opened by authorities from alerts. Status only
//! moves forward: open → investigating → resolved.

use sqlx::PgPool;

use crate::models::AlertRow;

#[derive(Clone, Debug, sqlx::FromRow, serde::Serialize)]
pub struct IncidentRow {
    pub id: i64,
    pub alert_id: i64,
    pub incident_number: String,
    pub status: String,
    pub priority: String,
    pub assigned_to: Option<String>,
    pub resolution_notes: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Position of a status in the forward-only lifecycle.
pub fn status_rank(status: &str) -> Option<u8> {
    match status {
        "open" => Some(0),
        "investigating" => Some(1),
        "resolved" => Some(2),
        _ => None,
    }
}

pub async fn create(
    pool: &PgPool,
    alert: &AlertRow,
    incident_number: &str,
    priority: &str,
    assigned_to: Option<&str>,
) -> Result<IncidentRow, sqlx::Error> {
    sqlx::query_as::<_, IncidentRow>(
        r#"
        INSERT INTO incidents (alert_id, incident_number, priority, assigned_to)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(alert.id)
    .bind(incident_number)
    .bind(priority)
    .bind(assigned_to)
    .fetch_one(pool)
    .await
}

pub async fn fetch(pool: &PgPool, id: i64) -> Result<Option<IncidentRow>, sqlx::Error> {
    sqlx::query_as::<_, IncidentRow>("SELECT * FROM incidents WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Advance incident status. Conditional on the status the caller saw, so a
/// concurrent advance returns None instead of silently rewinding; resolution
/// notes may only be attached when the status moves to resolved.
pub async fn advance_status(
    pool: &PgPool,
    id: i64,
    from_status: &str,
    to_status: &str,
    resolution_notes: Option<&str>,
) -> Result<Option<IncidentRow>, sqlx::Error> {
    sqlx::query_as::<_, IncidentRow>(
        r#"
        UPDATE incidents
        SET status = $2,
            resolution_notes = CASE WHEN $2 = 'resolved' THEN $3 ELSE resolution_notes END,
            updated_at = now()
        WHERE id = $1 AND status = $4
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(to_status)
    .bind(resolution_notes)
    .bind(from_status)
    .fetch_optional(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_order_is_forward_only() {
        assert!(status_rank("open") < status_rank("investigating"));
        assert!(status_rank("investigating") < status_rank("resolved"));
        // Skipping investigating is still a forward move.
        assert!(status_rank("open") < status_rank("resolved"));
        assert_eq!(status_rank("closed"), None);
    }
}
