//! Zone administration. Changes reach the geofence index on the next
//! snapshot refresh.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use super::{check_coords, non_empty};
use crate::auth::AuthorityAuth;
use crate::error::{ApiError, ApiResult};
use crate::models::{Zone, ZoneType};
use crate::repo;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateZoneBody {
    pub name: String,
    pub zone_type: String,
    pub center_lat: f64,
    pub center_lon: f64,
    pub radius_m: Option<f64>,
    pub bounds: Option<Vec<[f64; 2]>>,
}

pub async fn create(
    State(state): State<AppState>,
    AuthorityAuth(authority_id): AuthorityAuth,
    Json(body): Json<CreateZoneBody>,
) -> ApiResult<Json<Zone>> {
    non_empty(&body.name, "name")?;
    let zone_type = ZoneType::parse(&body.zone_type)
        .ok_or_else(|| ApiError::Validation("zone_type must be safe, risky or restricted".into()))?;
    check_coords(body.center_lat, body.center_lon)?;

    let bounds_json = match (&body.bounds, body.radius_m) {
        (Some(bounds), _) => {
            if bounds.len() < 3 {
                return Err(ApiError::Validation("polygon needs at least 3 vertices".into()));
            }
            for [lat, lon] in bounds {
                check_coords(*lat, *lon)?;
            }
            Some(serde_json::json!(bounds))
        }
        (None, Some(radius_m)) if radius_m > 0.0 => None,
        _ => {
            return Err(ApiError::Validation(
                "either a positive radius_m or polygon bounds is required".into(),
            ))
        }
    };

    let zone = repo::zones::insert(
        &state.db,
        body.name.trim(),
        zone_type.as_str(),
        body.center_lat,
        body.center_lon,
        body.radius_m,
        bounds_json.as_ref(),
        &authority_id,
    )
    .await?;
    Ok(Json(zone))
}

pub async fn list(
    State(state): State<AppState>,
    AuthorityAuth(_): AuthorityAuth,
) -> ApiResult<Json<Vec<Zone>>> {
    let zones = repo::zones::fetch_active(&state.db).await?;
    Ok(Json(zones))
}

pub async fn remove(
    State(state): State<AppState>,
    AuthorityAuth(_): AuthorityAuth,
    Path(id): Path<i64>,
) -> ApiResult<axum::http::StatusCode> {
    if !repo::zones::soft_delete(&state.db, id).await? {
        return Err(ApiError::NotFound);
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}
