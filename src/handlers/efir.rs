//! E-FIR filing and public verification.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{check_coords, non_empty};
use crate::auth::{Authenticated, Role};
use crate::efir::{self, EfirRequest, OfficerSnapshot};
use crate::error::{ApiError, ApiResult};
use crate::metrics::Metrics;
use crate::models::EfirRow;
use crate::repo;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct GenerateBody {
    pub description: String,
    pub alert_id: Option<i64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(default)]
    pub witnesses: Vec<String>,
    #[serde(default)]
    pub evidence: Vec<String>,
    pub incident_timestamp: Option<DateTime<Utc>>,
    /// Required when an authority files on a tourist's behalf.
    pub tourist_id: Option<String>,
}

pub async fn generate(
    State(state): State<AppState>,
    Authenticated(claims): Authenticated,
    Json(body): Json<GenerateBody>,
) -> ApiResult<Json<EfirRow>> {
    non_empty(&body.description, "description")?;
    if let (Some(lat), Some(lon)) = (body.lat, body.lon) {
        check_coords(lat, lon)?;
    }

    let (tourist_id, officer) = match claims.role {
        Role::Tourist => {
            if body.tourist_id.as_deref().is_some_and(|t| t != claims.sub) {
                return Err(ApiError::Forbidden);
            }
            (claims.sub.clone(), None)
        }
        Role::Authority | Role::Admin => {
            let tourist_id = body
                .tourist_id
                .clone()
                .ok_or_else(|| ApiError::Validation("tourist_id is required".into()))?;
            let officer = repo::authorities::fetch(&state.db, &claims.sub)
                .await?
                .ok_or(ApiError::Forbidden)?;
            (
                tourist_id,
                Some(OfficerSnapshot {
                    id: officer.id,
                    name: officer.name,
                    badge_number: officer.badge_number,
                }),
            )
        }
    };

    let tourist = repo::tourists::fetch(&state.db, &tourist_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if let Some(alert_id) = body.alert_id {
        repo::alerts::fetch(&state.db, alert_id)
            .await?
            .ok_or(ApiError::NotFound)?;
    }

    let row = efir::issue(
        &state.db,
        &tourist,
        EfirRequest {
            alert_id: body.alert_id,
            description: body.description,
            lat: body.lat,
            lon: body.lon,
            witnesses: body.witnesses,
            evidence: body.evidence,
            incident_timestamp: body.incident_timestamp.unwrap_or_else(Utc::now),
            officer,
        },
    )
    .await?;
    Metrics::bump(&state.metrics.efir_issued);
    Ok(Json(row))
}

#[derive(Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    pub efir_number: String,
}

/// Recompute the record's hashes against the chain. Open to anyone holding
/// a tx id — verification is the point of the chain.
pub async fn verify(
    State(state): State<AppState>,
    Path(tx_id): Path<String>,
) -> ApiResult<Json<VerifyResponse>> {
    let verification = efir::verify(&state.db, &tx_id).await?;
    match verification.outcome {
        Ok(()) => {
            Metrics::bump(&state.metrics.efir_verified);
            Ok(Json(VerifyResponse {
                valid: true,
                reason: None,
                efir_number: verification.efir_number,
            }))
        }
        Err(failure) => {
            Metrics::bump(&state.metrics.efir_verify_failures);
            Ok(Json(VerifyResponse {
                valid: false,
                reason: Some(failure.as_str()),
                efir_number: verification.efir_number,
            }))
        }
    }
}
