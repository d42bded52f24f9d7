//! Trip lifecycle. The one-active-trip invariant comes back from the
//! database as a unique violation and surfaces as a 409.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::non_empty;
use crate::auth::TouristAuth;
use crate::error::{ApiError, ApiResult};
use crate::models::TripRow;
use crate::repo;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct StartTripBody {
    pub destination: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

pub async fn start(
    State(state): State<AppState>,
    TouristAuth(tourist_id): TouristAuth,
    Json(body): Json<StartTripBody>,
) -> ApiResult<Json<TripRow>> {
    non_empty(&body.destination, "destination")?;
    if body.end_date <= body.start_date {
        return Err(ApiError::Validation("end_date must be after start_date".into()));
    }
    repo::tourists::fetch_active(&state.db, &tourist_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    match repo::trips::start(&state.db, &tourist_id, body.destination.trim(), body.start_date, body.end_date)
        .await
    {
        Ok(trip) => Ok(Json(trip)),
        Err(e) if repo::is_unique_violation(&e) => {
            Err(ApiError::Conflict("a trip is already active".into()))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn end(
    State(state): State<AppState>,
    TouristAuth(tourist_id): TouristAuth,
) -> ApiResult<Json<TripRow>> {
    repo::trips::end_active(&state.db, &tourist_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::Conflict("no active trip to end".into()))
}
