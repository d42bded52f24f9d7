//! Push-token registration.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use super::non_empty;
use crate::auth::TouristAuth;
use crate::error::{ApiError, ApiResult};
use crate::models::DeviceRow;
use crate::repo;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RegisterBody {
    pub push_token: String,
    pub platform: String,
}

pub async fn register(
    State(state): State<AppState>,
    TouristAuth(tourist_id): TouristAuth,
    Json(body): Json<RegisterBody>,
) -> ApiResult<Json<DeviceRow>> {
    non_empty(&body.push_token, "push_token")?;
    if !matches!(body.platform.as_str(), "ios" | "android") {
        return Err(ApiError::Validation("platform must be ios or android".into()));
    }
    let row = repo::devices::register(&state.db, &tourist_id, body.push_token.trim(), &body.platform)
        .await?;
    Ok(Json(row))
}
