// =============================================================================
// SAFEHORIZON — Tourist-Safety Backend (Rust/Axum/Tokio)
// =============================================================================
// Real-time safety pipeline: location ingestion with six-factor scoring,
// geofence evaluation, alert generation with cross-instance dedup, pub/sub
// fan-out to authority dashboards over WebSocket, area-targeted emergency
// broadcasts, and the hash-chained E-FIR ledger.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

mod alert_rules;
mod auth;
mod broadcast;
mod config;
mod efir;
mod error;
mod gateway;
mod geo;
mod geofence;
mod handlers;
mod hub;
mod ingest;
mod metrics;
mod models;
mod notifier;
mod repo;
mod scoring;
mod state;

use crate::config::Config;
use crate::state::AppState;

/// Default statement deadline for OLTP queries, applied per connection.
const STATEMENT_TIMEOUT_MS: u32 = 2_000;

/// Shared sweep cadence for the in-memory maps.
const EVICTION_INTERVAL_SECS: u64 = 60;

/// Recompute cadence for rows whose ingest-time scoring failed.
const RECOMPUTE_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or("safehorizon_backend=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cfg = match Config::from_env() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    info!(
        port = cfg.port,
        jwt_expiry_min = cfg.jwt_expiry_min,
        "SafeHorizon backend starting"
    );

    let pool = match PgPoolOptions::new()
        .max_connections(48)
        .acquire_timeout(Duration::from_secs(5))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query(&format!("SET statement_timeout = {STATEMENT_TIMEOUT_MS}"))
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&cfg.database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("database connection failed: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
        eprintln!("migration failed: {e}");
        std::process::exit(1);
    }

    let metrics = Arc::new(metrics::Metrics::new());

    // Broker is optional: without it the hub serves this instance only.
    let broker_conn = match &cfg.broker_url {
        Some(url) => match redis::Client::open(url.as_str()) {
            Ok(client) => match redis::aio::ConnectionManager::new(client).await {
                Ok(conn) => Some(conn),
                Err(e) => {
                    warn!(error = %e, "broker_connect_failed — running local-only");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "broker_url_invalid — running local-only");
                None
            }
        },
        None => None,
    };
    let hub = Arc::new(hub::Hub::new(broker_conn, metrics.clone()));
    info!(instance = hub.instance_id(), "hub_ready");

    let geofence = Arc::new(geofence::GeofenceIndex::new());
    match repo::zones::fetch_active(&pool).await {
        Ok(rows) => {
            let defs = geofence::build_defs(rows);
            info!(zones = defs.len(), "zone_snapshot_loaded");
            geofence.install(defs);
        }
        Err(e) => warn!(error = %e, "initial_zone_load_failed — starting with empty snapshot"),
    }

    // Transport adapters are wired externally; the logging adapter stands in
    // until then, whatever credentials are configured.
    if cfg.push_credentials_path.is_some() || cfg.sms_sender_id.is_some() {
        info!("notification credentials present — delivery uses the logging adapter");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let app_state = AppState {
        db: pool.clone(),
        hub: hub.clone(),
        geofence: geofence.clone(),
        metrics: metrics.clone(),
        jwt: auth::JwtKeys::new(&cfg.jwt_secret),
        notifier: Arc::new(notifier::LogNotifier),
        ingest_cache: Arc::new(dashmap::DashMap::new()),
        ingest_locks: Arc::new(dashmap::DashMap::new()),
        config: cfg.clone(),
        shutdown: shutdown_rx,
    };

    tokio::spawn(geofence::refresher(geofence.clone(), pool.clone(), cfg.score_refresh_secs));
    if let Some(url) = cfg.broker_url.clone() {
        tokio::spawn(hub::broker_listener(hub.clone(), url));
    }
    tokio::spawn(ingest::recompute_task(app_state.clone(), RECOMPUTE_INTERVAL_SECS));
    tokio::spawn(eviction(app_state.clone()));

    let cors = if cfg.allowed_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = cfg
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    };

    let app = handlers::router()
        .with_state(app_state.clone())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors),
        );

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.port));
    info!(%addr, "listening");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("failed to bind port {}: {e}", cfg.port);
            eprintln!("another instance is probably running; set PORT to pick a different one");
            std::process::exit(1);
        }
    };
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal — draining sessions");
        let _ = shutdown_tx.send(true);
        // Give sessions a moment to flush their 1001 close frames.
        tokio::time::sleep(Duration::from_millis(500)).await;
    });
    if let Err(e) = serve.await {
        eprintln!("server error: {e}");
        std::process::exit(1);
    }
}

/// Shared sweep over the in-memory maps: ingest idempotency entries, idle
/// per-tourist locks, and the hub's remote-dedup table.
async fn eviction(state: AppState) {
    let mut iv = tokio::time::interval(Duration::from_secs(EVICTION_INTERVAL_SECS));
    loop {
        iv.tick().await;
        let before = state.ingest_cache.len();
        ingest::evict_caches(&state);
        state.hub.evict_seen();
        let after = state.ingest_cache.len();
        if before > after {
            info!(evicted = before - after, remaining = after, "ingest_cache_eviction");
        }
    }
}
