//! Authority broadcast endpoints and tourist-side acknowledgment/listing.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{check_coords, non_empty};
use crate::auth::{AuthorityAuth, TouristAuth};
use crate::broadcast::{self, Content, Target};
use crate::error::{ApiError, ApiResult};
use crate::metrics::Metrics;
use crate::models::{AckStatus, BroadcastRow, Severity};
use crate::repo;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct BroadcastBody {
    pub title: String,
    pub message: String,
    pub severity: String,
    pub expires_at: Option<DateTime<Utc>>,
    // Targeting, per endpoint
    pub center_lat: Option<f64>,
    pub center_lon: Option<f64>,
    pub radius_km: Option<f64>,
    pub zone_id: Option<i64>,
    pub min_lat: Option<f64>,
    pub min_lon: Option<f64>,
    pub max_lat: Option<f64>,
    pub max_lon: Option<f64>,
}

fn content(body: &BroadcastBody) -> ApiResult<Content> {
    non_empty(&body.title, "title")?;
    non_empty(&body.message, "message")?;
    let severity = Severity::parse(&body.severity)
        .ok_or_else(|| ApiError::Validation("unknown severity".into()))?;
    if let Some(expires_at) = body.expires_at {
        if expires_at <= Utc::now() {
            return Err(ApiError::Validation("expires_at is in the past".into()));
        }
    }
    Ok(Content {
        title: body.title.clone(),
        message: body.message.clone(),
        severity,
        expires_at: body.expires_at,
    })
}

fn require<T>(value: Option<T>, field: &str) -> ApiResult<T> {
    value.ok_or_else(|| ApiError::Validation(format!("{field} is required")))
}

pub async fn radius(
    State(state): State<AppState>,
    AuthorityAuth(sender): AuthorityAuth,
    Json(body): Json<BroadcastBody>,
) -> ApiResult<Json<BroadcastRow>> {
    let content = content(&body)?;
    let center_lat = require(body.center_lat, "center_lat")?;
    let center_lon = require(body.center_lon, "center_lon")?;
    let radius_km = require(body.radius_km, "radius_km")?;
    check_coords(center_lat, center_lon)?;
    if !(0.1..=100.0).contains(&radius_km) {
        return Err(ApiError::Validation("radius_km must be between 0.1 and 100".into()));
    }
    let record = broadcast::dispatch(
        &state,
        &sender,
        Target::Radius { center_lat, center_lon, radius_km },
        content,
    )
    .await?;
    Ok(Json(record))
}

pub async fn zone(
    State(state): State<AppState>,
    AuthorityAuth(sender): AuthorityAuth,
    Json(body): Json<BroadcastBody>,
) -> ApiResult<Json<BroadcastRow>> {
    let content = content(&body)?;
    let zone_id = require(body.zone_id, "zone_id")?;
    let record = broadcast::dispatch(&state, &sender, Target::Zone { zone_id }, content).await?;
    Ok(Json(record))
}

pub async fn region(
    State(state): State<AppState>,
    AuthorityAuth(sender): AuthorityAuth,
    Json(body): Json<BroadcastBody>,
) -> ApiResult<Json<BroadcastRow>> {
    let content = content(&body)?;
    let min_lat = require(body.min_lat, "min_lat")?;
    let min_lon = require(body.min_lon, "min_lon")?;
    let max_lat = require(body.max_lat, "max_lat")?;
    let max_lon = require(body.max_lon, "max_lon")?;
    check_coords(min_lat, min_lon)?;
    check_coords(max_lat, max_lon)?;
    if min_lat >= max_lat || min_lon >= max_lon {
        return Err(ApiError::Validation("bounding box is inverted".into()));
    }
    let record = broadcast::dispatch(
        &state,
        &sender,
        Target::Region { min_lat, min_lon, max_lat, max_lon },
        content,
    )
    .await?;
    Ok(Json(record))
}

pub async fn all(
    State(state): State<AppState>,
    AuthorityAuth(sender): AuthorityAuth,
    Json(body): Json<BroadcastBody>,
) -> ApiResult<Json<BroadcastRow>> {
    let content = content(&body)?;
    let record = broadcast::dispatch(&state, &sender, Target::All, content).await?;
    Ok(Json(record))
}

#[derive(Deserialize)]
pub struct AckBody {
    pub status: AckStatus,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Serialize)]
pub struct AckResponse {
    pub broadcast_id: i64,
    pub status: AckStatus,
    pub already_acknowledged: bool,
}

pub async fn acknowledge(
    State(state): State<AppState>,
    TouristAuth(tourist_id): TouristAuth,
    Path(id): Path<i64>,
    Json(body): Json<AckBody>,
) -> ApiResult<Json<AckResponse>> {
    if let (Some(lat), Some(lon)) = (body.lat, body.lon) {
        check_coords(lat, lon)?;
    }
    repo::broadcasts::fetch(&state.db, id).await?.ok_or(ApiError::NotFound)?;
    let inserted = repo::broadcasts::acknowledge(
        &state.db,
        id,
        &tourist_id,
        body.status.as_str(),
        body.lat,
        body.lon,
        body.notes.as_deref(),
    )
    .await?;
    if inserted {
        Metrics::bump(&state.metrics.broadcast_acks);
    }
    Ok(Json(AckResponse {
        broadcast_id: id,
        status: body.status,
        already_acknowledged: !inserted,
    }))
}

pub async fn active(
    State(state): State<AppState>,
    TouristAuth(_): TouristAuth,
) -> ApiResult<Json<Vec<BroadcastRow>>> {
    let rows = repo::broadcasts::active(&state.db, 100).await?;
    Ok(Json(rows))
}
