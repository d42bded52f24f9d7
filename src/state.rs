//! Shared application state, cloned into every handler. All members are
//! cheap handles; the only process-global mutability is the geofence
//! snapshot pointer and the hub tables behind their own locks.

use std::sync::Arc;

use axum::extract::FromRef;
use dashmap::DashMap;
use sqlx::PgPool;

use crate::auth::JwtKeys;
use crate::config::Config;
use crate::geofence::GeofenceIndex;
use crate::hub::Hub;
use crate::ingest::CachedIngest;
use crate::metrics::Metrics;
use crate::notifier::SharedNotifier;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub hub: Arc<Hub>,
    pub geofence: Arc<GeofenceIndex>,
    pub metrics: Arc<Metrics>,
    pub jwt: JwtKeys,
    pub notifier: SharedNotifier,
    /// Ingest idempotency: (tourist, client_ts_ms) -> cached result.
    pub ingest_cache: Arc<DashMap<(String, i64), CachedIngest>>,
    /// Per-tourist ingest serialization, so one tourist's samples commit in
    /// server arrival order while different tourists interleave freely.
    pub ingest_locks: Arc<DashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    pub config: Arc<Config>,
    /// Flips to true on graceful shutdown; sessions drain with close 1001.
    pub shutdown: tokio::sync::watch::Receiver<bool>,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}
