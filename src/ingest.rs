//! Location ingestion pipeline: validate → persist → score → blend →
//! alert rules. One public operation.
//!
//! Samples for a single tourist are serialized behind a per-tourist lock so
//! their rows and `last_seen` updates land in server arrival order; samples
//! for different tourists interleave freely. Repeats of the same
//! (tourist, client timestamp) inside the collapse window return the cached
//! result instead of writing a second row.

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::alert_rules;
use crate::error::{ApiError, ApiResult};
use crate::geo;
use crate::metrics::Metrics;
use crate::models::{LocationRow, RiskLevel, Severity, Tourist};
use crate::repo;
use crate::scoring::{self, ScoreInputs};
use crate::state::AppState;

/// Repeats of the same client timestamp inside this window collapse.
const COLLAPSE_WINDOW_MS: i64 = 2_000;

/// Client clocks more than this far off use server time for time-of-day.
const CLOCK_SKEW_MAX_SECS: i64 = 5 * 60;

// Scoring query geometry.
const ALERT_RADIUS_M: f64 = 2_000.0;
const ALERT_LOOKBACK_HOURS: i64 = 6;
const CROWD_RADIUS_M: f64 = 1_000.0;
const CROWD_LOOKBACK_MINS: i64 = 15;
const HISTORY_RADIUS_M: f64 = 1_000.0;
const SPEED_HISTORY: i64 = 10;

/// A validated location sample.
#[derive(Clone, Debug)]
pub struct LocationSample {
    pub lat: f64,
    pub lon: f64,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Serialize)]
pub struct IngestResult {
    pub location_id: i64,
    pub safety_score: Option<i32>,
    pub risk_level: Option<RiskLevel>,
    pub alert_triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<i64>,
    pub recommendations: Vec<&'static str>,
}

#[derive(Clone)]
pub struct CachedIngest {
    pub at_ms: i64,
    pub result: IngestResult,
}

pub async fn ingest(
    state: &AppState,
    tourist_id: &str,
    sample: LocationSample,
) -> ApiResult<IngestResult> {
    let cache_key = (tourist_id.to_string(), sample.timestamp.timestamp_millis());
    if let Some(hit) = state.ingest_cache.get(&cache_key) {
        if Utc::now().timestamp_millis() - hit.at_ms <= COLLAPSE_WINDOW_MS {
            Metrics::bump(&state.metrics.collapsed);
            return Ok(hit.result.clone());
        }
    }

    let lock = state
        .ingest_locks
        .entry(tourist_id.to_string())
        .or_insert_with(|| std::sync::Arc::new(tokio::sync::Mutex::new(())))
        .clone();
    let _serial = lock.lock().await;

    // Re-check under the lock: a racing duplicate may have just landed.
    if let Some(hit) = state.ingest_cache.get(&cache_key) {
        if Utc::now().timestamp_millis() - hit.at_ms <= COLLAPSE_WINDOW_MS {
            Metrics::bump(&state.metrics.collapsed);
            return Ok(hit.result.clone());
        }
    }

    let tourist = repo::tourists::fetch_active(&state.db, tourist_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    // Previous samples feed both the speed factor and the alert rules.
    let previous = repo::locations::recent(&state.db, tourist_id, SPEED_HISTORY).await?;

    // Scoring failure is not fatal: the row persists unscored and the
    // recompute sweep fills it in later.
    let score_result = match gather_inputs(state, &tourist, &sample, &previous).await {
        Ok(inputs) => Some(scoring::compute(&inputs)),
        Err(e) => {
            Metrics::bump(&state.metrics.scoring_failures);
            warn!(tourist = tourist_id, error = %e, "scoring_inputs_failed — persisting unscored");
            None
        }
    };

    let trip = repo::trips::active_for(&state.db, tourist_id).await?;
    let sample_score = score_result.as_ref().map(|r| r.score);
    let blended = sample_score
        .map(|s| scoring::blend(tourist.safety_score, s))
        .unwrap_or(tourist.safety_score);

    let mut tx = state.db.begin().await?;
    let row = repo::locations::insert(
        &mut tx,
        &repo::locations::NewLocation {
            tourist_id,
            trip_id: trip.map(|t| t.id),
            lat: sample.lat,
            lon: sample.lon,
            altitude: sample.altitude,
            speed: sample.speed,
            accuracy: sample.accuracy,
            client_ts: sample.timestamp,
            safety_score: sample_score,
        },
    )
    .await?;
    repo::tourists::update_position(&mut tx, tourist_id, sample.lat, sample.lon, row.ingested_at, blended)
        .await?;
    tx.commit().await?;

    // Alert rules run on the per-sample score, outside the row transaction;
    // the dedup index makes a retry after a crash harmless.
    let mut alert_id = None;
    if let Some(ref scored) = score_result {
        let decision = alert_rules::decide(&alert_rules::RuleContext {
            score: scored.score,
            zone_hits: &state.geofence.zones_containing(sample.lat, sample.lon),
            previous: &previous,
            now: row.ingested_at,
        });
        if let Some(decision) = decision {
            alert_id = alert_rules::create(
                &state.db,
                &state.hub,
                &state.metrics,
                tourist_id,
                Some(row.id),
                Some(sample.lat),
                Some(sample.lon),
                decision,
                row.ingested_at,
            )
            .await?
            .map(|a| a.id);
        }
    }

    Metrics::bump(&state.metrics.ingested);
    let result = IngestResult {
        location_id: row.id,
        safety_score: sample_score,
        risk_level: score_result.as_ref().map(|r| r.risk_level),
        alert_triggered: alert_id.is_some(),
        alert_id,
        recommendations: score_result.map(|r| r.recommendations).unwrap_or_default(),
    };
    state.ingest_cache.insert(
        cache_key,
        CachedIngest { at_ms: Utc::now().timestamp_millis(), result: result.clone() },
    );
    info!(
        tourist = tourist_id,
        location_id = row.id,
        score = ?sample_score,
        alert = ?alert_id,
        "location_ingested"
    );
    Ok(result)
}

/// Assemble the read-only views the scorer needs.
async fn gather_inputs(
    state: &AppState,
    tourist: &Tourist,
    sample: &LocationSample,
    previous: &[LocationRow],
) -> Result<ScoreInputs, sqlx::Error> {
    let now = Utc::now();
    let (lat, lon) = (sample.lat, sample.lon);

    let zone_hits = state.geofence.zones_containing(lat, lon);
    let nearest_hazard = state.geofence.nearest_hazard(lat, lon);

    // Recent alerts within 2 km.
    let (alat, alon) = (geo::lat_degrees(ALERT_RADIUS_M), geo::lon_degrees(ALERT_RADIUS_M, lat));
    let nearby_alerts = repo::alerts::recent_in_box(
        &state.db,
        lat - alat,
        lat + alat,
        lon - alon,
        lon + alon,
        now - chrono::Duration::hours(ALERT_LOOKBACK_HOURS),
    )
    .await?
    .into_iter()
    .filter(|(_, a_lat, a_lon)| geo::haversine_m(lat, lon, *a_lat, *a_lon) <= ALERT_RADIUS_M)
    .filter_map(|(severity, _, _)| Severity::parse(&severity))
    .collect();

    // Other tourists within 1 km, seen in the last 15 minutes.
    let (clat, clon) = (geo::lat_degrees(CROWD_RADIUS_M), geo::lon_degrees(CROWD_RADIUS_M, lat));
    let nearby_tourists = repo::tourists::recent_positions_in_box(
        &state.db,
        lat - clat,
        lat + clat,
        lon - clon,
        lon + clon,
        now - chrono::Duration::minutes(CROWD_LOOKBACK_MINS),
    )
    .await?
    .into_iter()
    .filter(|(id, t_lat, t_lon)| {
        id != &tourist.id && geo::haversine_m(lat, lon, *t_lat, *t_lon) <= CROWD_RADIUS_M
    })
    .count() as u32;

    // All-time alert density within 1 km.
    let (hlat, hlon) = (geo::lat_degrees(HISTORY_RADIUS_M), geo::lon_degrees(HISTORY_RADIUS_M, lat));
    let historical_alert_count = repo::alerts::historical_in_box(
        &state.db,
        lat - hlat,
        lat + hlat,
        lon - hlon,
        lon + hlon,
    )
    .await?
    .into_iter()
    .filter(|(a_lat, a_lon)| geo::haversine_m(lat, lon, *a_lat, *a_lon) <= HISTORY_RADIUS_M)
    .count() as u32;

    let recent_speeds = previous.iter().filter_map(|r| r.speed).collect();

    Ok(ScoreInputs {
        nearby_alerts,
        zone_hits,
        nearest_hazard,
        local_hour: local_hour(sample.timestamp, now, lon),
        nearby_tourists,
        speed: sample.speed,
        recent_speeds,
        historical_alert_count,
    })
}

/// Local hour at the sample's longitude. Clients more than five minutes off
/// the server clock do not get to pick the time of day.
fn local_hour(client_ts: DateTime<Utc>, server_now: DateTime<Utc>, lon: f64) -> u32 {
    let ts = if (client_ts - server_now).num_seconds().abs() > CLOCK_SKEW_MAX_SECS {
        server_now
    } else {
        client_ts
    };
    let offset = (lon / 15.0).round() as i64;
    ((ts.hour() as i64 + offset).rem_euclid(24)) as u32
}

/// Periodic sweep that scores rows whose ingest-time scoring failed.
pub async fn recompute_task(state: AppState, interval_secs: u64) {
    let mut iv = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
    loop {
        iv.tick().await;
        let rows = match repo::locations::unscored(&state.db, 100).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "recompute_fetch_failed");
                continue;
            }
        };
        for row in rows {
            let Ok(Some(tourist)) = repo::tourists::fetch(&state.db, &row.tourist_id).await else {
                continue;
            };
            let sample = LocationSample {
                lat: row.lat,
                lon: row.lon,
                altitude: row.altitude,
                speed: row.speed,
                accuracy: row.accuracy,
                timestamp: row.client_ts,
            };
            match gather_inputs(&state, &tourist, &sample, &[]).await {
                Ok(inputs) => {
                    let scored = scoring::compute(&inputs);
                    if let Err(e) = repo::locations::set_score(&state.db, row.id, scored.score).await
                    {
                        warn!(location_id = row.id, error = %e, "recompute_write_failed");
                        continue;
                    }
                    Metrics::bump(&state.metrics.score_recomputed);
                }
                Err(e) => warn!(location_id = row.id, error = %e, "recompute_inputs_failed"),
            }
        }
    }
}

/// Drop idempotency entries past the collapse window and locks nobody
/// holds. Called from the shared eviction task.
pub fn evict_caches(state: &AppState) {
    let now_ms = Utc::now().timestamp_millis();
    state
        .ingest_cache
        .retain(|_, c| now_ms - c.at_ms <= COLLAPSE_WINDOW_MS);
    state
        .ingest_locks
        .retain(|_, lock| std::sync::Arc::strong_count(lock) > 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_hour_uses_longitude_offset() {
        let noon_utc = DateTime::parse_from_rfc3339("2026-08-01T12:00:00Z").unwrap().to_utc();
        // Delhi (~77°E) is UTC+5-ish by longitude rounding.
        assert_eq!(local_hour(noon_utc, noon_utc, 77.2), 17);
        // Greenwich
        assert_eq!(local_hour(noon_utc, noon_utc, 0.0), 12);
        // New York (~-74°W) rounds to UTC-5.
        assert_eq!(local_hour(noon_utc, noon_utc, -74.0), 7);
    }

    #[test]
    fn skewed_client_clock_falls_back_to_server_time() {
        let server = DateTime::parse_from_rfc3339("2026-08-01T12:00:00Z").unwrap().to_utc();
        let client_off = server - chrono::Duration::hours(3);
        assert_eq!(local_hour(client_off, server, 0.0), 12);
        // Within the window, the client timestamp is taken at face value.
        let client_close = server - chrono::Duration::minutes(4);
        assert_eq!(local_hour(client_close, server, 0.0), 11);
    }

    #[test]
    fn local_hour_wraps_around_midnight() {
        let late = DateTime::parse_from_rfc3339("2026-08-01T23:30:00Z").unwrap().to_utc();
        // UTC+3 pushes 23:30 into 02:xx next day.
        assert_eq!(local_hour(late, late, 45.0), 2);
        // UTC-2 pulls 00:30 back before midnight.
        let early = DateTime::parse_from_rfc3339("2026-08-01T00:30:00Z").unwrap().to_utc();
        assert_eq!(local_hour(early, early, -30.0), 22);
    }
}
