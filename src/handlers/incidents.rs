//! Incident case files, opened by authorities from alerts.

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::auth::AuthorityAuth;
use crate::error::{ApiError, ApiResult};
use crate::repo::{self, incidents::IncidentRow};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateBody {
    pub alert_id: i64,
    pub priority: String,
    pub assigned_to: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    AuthorityAuth(_authority_id): AuthorityAuth,
    Json(body): Json<CreateBody>,
) -> ApiResult<Json<IncidentRow>> {
    if !matches!(body.priority.as_str(), "low" | "medium" | "high" | "critical") {
        return Err(ApiError::Validation("unknown priority".into()));
    }
    let alert = repo::alerts::fetch(&state.db, body.alert_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let seq = repo::next_daily_seq(&state.db, "inc").await?;
    let number = repo::artifact_number("INC", Utc::now().date_naive(), seq);
    match repo::incidents::create(&state.db, &alert, &number, &body.priority, body.assigned_to.as_deref())
        .await
    {
        Ok(incident) => Ok(Json(incident)),
        Err(e) if repo::is_unique_violation(&e) => {
            Err(ApiError::Conflict("an incident already exists for this alert".into()))
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Deserialize)]
pub struct StatusBody {
    pub status: String,
    pub resolution_notes: Option<String>,
}

/// Status only advances: open → investigating → resolved. Anything else,
/// including re-opening a resolved case, is a 409.
pub async fn set_status(
    State(state): State<AppState>,
    AuthorityAuth(_): AuthorityAuth,
    Path(id): Path<i64>,
    Json(body): Json<StatusBody>,
) -> ApiResult<Json<IncidentRow>> {
    let Some(to_rank) = repo::incidents::status_rank(&body.status) else {
        return Err(ApiError::Validation("unknown status".into()));
    };
    let current = repo::incidents::fetch(&state.db, id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let from_rank = repo::incidents::status_rank(&current.status)
        .ok_or_else(|| ApiError::Fatal(format!("incident {id} has status {}", current.status)))?;
    if to_rank <= from_rank {
        return Err(ApiError::Conflict(format!(
            "incident is {}; cannot move to {}",
            current.status, body.status
        )));
    }
    repo::incidents::advance_status(
        &state.db,
        id,
        &current.status,
        &body.status,
        body.resolution_notes.as_deref(),
    )
    .await?
    .map(Json)
    .ok_or_else(|| ApiError::Conflict("incident status changed concurrently".into()))
}
