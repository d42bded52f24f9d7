//! Panic trigger and authority-side alert lifecycle.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::alert_rules;
use crate::auth::{AuthorityAuth, TouristAuth};
use crate::error::{ApiError, ApiResult};
use crate::metrics::Metrics;
use crate::models::{AlertKind, AlertRow, Severity};
use crate::repo;
use crate::state::AppState;

#[derive(Serialize)]
pub struct SosResponse {
    pub alert_id: i64,
}

/// Explicit tourist action; the only way panic alerts come into being.
pub async fn sos_trigger(
    State(state): State<AppState>,
    TouristAuth(tourist_id): TouristAuth,
) -> ApiResult<Json<SosResponse>> {
    let tourist = repo::tourists::fetch_active(&state.db, &tourist_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let alert = alert_rules::create(
        &state.db,
        &state.hub,
        &state.metrics,
        &tourist_id,
        None,
        tourist.last_lat,
        tourist.last_lon,
        alert_rules::Decision {
            kind: AlertKind::Panic,
            severity: Severity::Critical,
            title: "Panic button triggered".into(),
            description: format!("Tourist {} triggered the panic button", tourist.name),
            zone_id: None,
            metadata: json!({ "source": "panic_button" }),
        },
        Utc::now(),
    )
    .await?
    // Panic alerts carry no dedup bucket, so insert can only return None on
    // an index we did not hit; treat that as an invariant break.
    .ok_or_else(|| ApiError::Fatal("panic alert insert returned no row".into()))?;

    Metrics::bump(&state.metrics.panic_alerts);
    Ok(Json(SosResponse { alert_id: alert.id }))
}

#[derive(Deserialize)]
pub struct RecentParams {
    pub hours_back: Option<i64>,
    pub severity: Option<String>,
    pub limit: Option<i64>,
}

pub async fn recent(
    State(state): State<AppState>,
    AuthorityAuth(_): AuthorityAuth,
    Query(params): Query<RecentParams>,
) -> ApiResult<Json<Vec<AlertRow>>> {
    let hours = params.hours_back.unwrap_or(24).clamp(1, 24 * 30);
    let limit = params.limit.unwrap_or(100).clamp(1, 500);
    let severity = match &params.severity {
        Some(s) => Some(
            Severity::parse(s).ok_or_else(|| ApiError::Validation("unknown severity".into()))?,
        ),
        None => None,
    };
    let rows = repo::alerts::recent(
        &state.db,
        Utc::now() - chrono::Duration::hours(hours),
        severity,
        limit,
    )
    .await?;
    Ok(Json(rows))
}

pub async fn acknowledge(
    State(state): State<AppState>,
    AuthorityAuth(authority_id): AuthorityAuth,
    Path(id): Path<i64>,
) -> ApiResult<Json<AlertRow>> {
    let alert = repo::alerts::acknowledge(&state.db, id, &authority_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    state.hub.publish(
        crate::hub::CH_ALERTS_AUTHORITY,
        "alert_acknowledged",
        json!({ "alert_id": alert.id, "acknowledged_by": authority_id }),
    );
    Ok(Json(alert))
}

pub async fn resolve(
    State(state): State<AppState>,
    AuthorityAuth(authority_id): AuthorityAuth,
    Path(id): Path<i64>,
) -> ApiResult<Json<AlertRow>> {
    let alert = repo::alerts::resolve(&state.db, id, &authority_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    state.hub.publish(
        crate::hub::CH_ALERTS_AUTHORITY,
        "alert_resolved",
        json!({ "alert_id": alert.id, "resolved_by": authority_id }),
    );
    Ok(Json(alert))
}
