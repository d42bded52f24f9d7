//! Unauthenticated public feed. Identity never leaves this handler:
//! tourist ids are dropped and coordinates snap to a ~100 m grid.

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::geo;
use crate::repo;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct PanicParams {
    pub limit: Option<i64>,
    pub hours_back: Option<i64>,
    pub show_resolved: Option<bool>,
}

#[derive(Serialize)]
pub struct PublicAlert {
    pub id: i64,
    pub kind: String,
    pub severity: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

pub async fn panic_alerts(
    State(state): State<AppState>,
    Query(params): Query<PanicParams>,
) -> ApiResult<Json<Vec<PublicAlert>>> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let hours = params.hours_back.unwrap_or(24).clamp(1, 24 * 7);
    let rows = repo::alerts::public_panic(
        &state.db,
        Utc::now() - chrono::Duration::hours(hours),
        params.show_resolved.unwrap_or(false),
        limit,
    )
    .await?;

    let anonymized = rows
        .into_iter()
        .map(|a| {
            let coarse = match (a.lat, a.lon) {
                (Some(lat), Some(lon)) => {
                    let (lat, lon) = geo::coarsen_100m(lat, lon);
                    (Some(lat), Some(lon))
                }
                _ => (None, None),
            };
            PublicAlert {
                id: a.id,
                kind: a.kind,
                severity: a.severity,
                lat: coarse.0,
                lon: coarse.1,
                resolved: a.resolved_at.is_some(),
                created_at: a.created_at,
            }
        })
        .collect();
    Ok(Json(anonymized))
}
