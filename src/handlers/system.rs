//! Probes and counters.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::metrics::MetricsSnapshot;
use crate::state::AppState;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Ready only when the database answers.
pub async fn ready(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[derive(Serialize)]
pub struct MetricsResponse {
    #[serde(flatten)]
    counters: MetricsSnapshot,
    // In-memory state sizes
    zones: usize,
    ingest_cache: usize,
    hub_seen_remote: usize,
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        counters: state.metrics.snapshot(),
        zones: state.geofence.zone_count(),
        ingest_cache: state.ingest_cache.len(),
        hub_seen_remote: state.hub.seen_remote_len(),
    })
}
