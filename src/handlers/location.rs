//! Telemetry ingestion and safety lookups for tourist clients.

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{check_coords, check_speed};
use crate::auth::TouristAuth;
use crate::error::{ApiError, ApiResult};
use crate::geo;
use crate::ingest::{self, IngestResult, LocationSample};
use crate::models::RiskLevel;
use crate::repo;
use crate::scoring;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct LocationUpdateBody {
    pub lat: f64,
    pub lon: f64,
    pub speed: Option<f64>,
    pub altitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

pub async fn update(
    State(state): State<AppState>,
    TouristAuth(tourist_id): TouristAuth,
    Json(body): Json<LocationUpdateBody>,
) -> ApiResult<Json<IngestResult>> {
    check_coords(body.lat, body.lon)?;
    check_speed(body.speed)?;
    if let Some(acc) = body.accuracy {
        if acc < 0.0 {
            return Err(ApiError::Validation("accuracy must be non-negative".into()));
        }
    }
    let result = ingest::ingest(
        &state,
        &tourist_id,
        LocationSample {
            lat: body.lat,
            lon: body.lon,
            altitude: body.altitude,
            speed: body.speed,
            accuracy: body.accuracy,
            timestamp: body.timestamp,
        },
    )
    .await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct NearbyParams {
    pub radius_km: Option<f64>,
}

#[derive(Serialize)]
pub struct NearbyAlert {
    pub id: i64,
    pub kind: String,
    pub severity: String,
    pub lat: f64,
    pub lon: f64,
    pub distance_m: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct NearbyZone {
    pub zone_id: i64,
    pub name: String,
    pub zone_type: crate::models::ZoneType,
    pub distance_m: i64,
    pub inside: bool,
}

#[derive(Serialize)]
pub struct NearbyRisks {
    pub alerts: Vec<NearbyAlert>,
    pub zones: Vec<NearbyZone>,
}

/// Recent alerts and hazard zones around the caller's last known position.
pub async fn nearby_risks(
    State(state): State<AppState>,
    TouristAuth(tourist_id): TouristAuth,
    Query(params): Query<NearbyParams>,
) -> ApiResult<Json<NearbyRisks>> {
    let radius_km = params.radius_km.unwrap_or(5.0);
    if !(0.1..=50.0).contains(&radius_km) {
        return Err(ApiError::Validation("radius_km must be between 0.1 and 50".into()));
    }
    let tourist = repo::tourists::fetch_active(&state.db, &tourist_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let (Some(lat), Some(lon)) = (tourist.last_lat, tourist.last_lon) else {
        return Err(ApiError::Validation("no known location — post an update first".into()));
    };

    let radius_m = radius_km * 1_000.0;
    let dlat = geo::lat_degrees(radius_m);
    let dlon = geo::lon_degrees(radius_m, lat);
    let since = Utc::now() - chrono::Duration::hours(24);
    let mut alerts: Vec<NearbyAlert> = repo::alerts::recent_rows_in_box(
        &state.db,
        lat - dlat,
        lat + dlat,
        lon - dlon,
        lon + dlon,
        since,
    )
    .await?
    .into_iter()
    .filter_map(|a| {
        let (a_lat, a_lon) = (a.lat?, a.lon?);
        let d = geo::haversine_m(lat, lon, a_lat, a_lon);
        (d <= radius_m).then(|| NearbyAlert {
            id: a.id,
            kind: a.kind,
            severity: a.severity,
            lat: a_lat,
            lon: a_lon,
            distance_m: d as i64,
            created_at: a.created_at,
        })
    })
    .collect();
    alerts.sort_by_key(|a| a.distance_m);

    let zones = state
        .geofence
        .zones_near(lat, lon, radius_m)
        .into_iter()
        .filter(|h| h.zone_type != crate::models::ZoneType::Safe)
        .map(|h| NearbyZone {
            zone_id: h.zone_id,
            name: h.name,
            zone_type: h.zone_type,
            distance_m: h.boundary_distance_m as i64,
            inside: h.inside,
        })
        .collect();

    Ok(Json(NearbyRisks { alerts, zones }))
}

#[derive(Serialize)]
pub struct SafetyScore {
    pub safety_score: i32,
    pub risk_level: RiskLevel,
    pub last_seen: Option<DateTime<Utc>>,
}

pub async fn safety_score(
    State(state): State<AppState>,
    TouristAuth(tourist_id): TouristAuth,
) -> ApiResult<Json<SafetyScore>> {
    let tourist = repo::tourists::fetch_active(&state.db, &tourist_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(SafetyScore {
        safety_score: tourist.safety_score,
        risk_level: scoring::risk_level(tourist.safety_score),
        last_seen: tourist.last_seen,
    }))
}
