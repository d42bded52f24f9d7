//! Alert generation rules, evaluated after every scored location.
//!
//! `decide` is pure; `create` owns the transaction and the hub publish.
//! Duplicate suppression rides the `alerts_dedup` unique index, so the
//! rules can fire identically on every instance and still produce one row
//! per (tourist, kind, zone, 30-min bucket).

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use tracing::info;

use crate::error::ApiResult;
use crate::geofence::ZoneHit;
use crate::hub::{self, Hub};
use crate::metrics::Metrics;
use crate::models::{AlertKind, AlertRow, LocationRow, Severity, ZoneType};
use crate::repo;
use crate::scoring;

/// Dedup window width in seconds.
const DEDUP_WINDOW_SECS: i64 = 30 * 60;

/// Sequence rule: this many consecutive low samples...
const SEQUENCE_LEN: usize = 5;
/// ...each scoring at or below this...
const SEQUENCE_MAX_SCORE: i32 = 50;
/// ...within this span.
const SEQUENCE_SPAN_SECS: i64 = 20 * 60;

pub fn dedup_bucket(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(DEDUP_WINDOW_SECS)
}

/// What the rules decided to raise.
#[derive(Clone, Debug, PartialEq)]
pub struct Decision {
    pub kind: AlertKind,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub zone_id: Option<i64>,
    pub metadata: serde_json::Value,
}

/// Inputs to the decision: the freshly scored sample plus the samples that
/// came before it (newest first).
pub struct RuleContext<'a> {
    pub score: i32,
    pub zone_hits: &'a [ZoneHit],
    pub previous: &'a [LocationRow],
    pub now: DateTime<Utc>,
}

/// First matching rule wins. Panic/SOS never originate here.
pub fn decide(ctx: &RuleContext<'_>) -> Option<Decision> {
    if let Some(hit) = ctx.zone_hits.iter().find(|h| h.zone_type == ZoneType::Restricted) {
        return Some(Decision {
            kind: AlertKind::Geofence,
            severity: Severity::Critical,
            title: format!("Entered restricted zone: {}", hit.name),
            description: format!(
                "Tourist entered restricted zone \"{}\" ({}m past the boundary)",
                hit.name, hit.boundary_distance_m as i64
            ),
            zone_id: Some(hit.zone_id),
            metadata: json!({ "zone_id": hit.zone_id, "zone_name": hit.name }),
        });
    }

    if let Some(hit) = ctx.zone_hits.iter().find(|h| h.zone_type == ZoneType::Risky) {
        return Some(Decision {
            kind: AlertKind::Geofence,
            severity: Severity::High,
            title: format!("Entered risky zone: {}", hit.name),
            description: format!("Tourist entered risky zone \"{}\"", hit.name),
            zone_id: Some(hit.zone_id),
            metadata: json!({ "zone_id": hit.zone_id, "zone_name": hit.name }),
        });
    }

    // Score collapse: healthy two samples ago, critical-band now.
    if ctx.score <= 40 {
        let recently_healthy = ctx
            .previous
            .iter()
            .take(2)
            .any(|row| row.safety_score.map_or(false, |s| s > 60));
        if recently_healthy {
            let severity = match scoring::risk_level(ctx.score) {
                crate::models::RiskLevel::Critical => Severity::Critical,
                _ => Severity::High,
            };
            return Some(Decision {
                kind: AlertKind::Anomaly,
                severity,
                title: "Sudden safety score drop".into(),
                description: format!("Safety score collapsed to {}", ctx.score),
                zone_id: None,
                metadata: json!({ "score": ctx.score }),
            });
        }
    }

    // Sustained low scores: the current sample plus the previous four.
    if ctx.score <= SEQUENCE_MAX_SCORE && ctx.previous.len() >= SEQUENCE_LEN - 1 {
        let window = &ctx.previous[..SEQUENCE_LEN - 1];
        let all_low = window
            .iter()
            .all(|row| row.safety_score.map_or(false, |s| s <= SEQUENCE_MAX_SCORE));
        let span_ok = window
            .last()
            .map(|oldest| (ctx.now - oldest.ingested_at).num_seconds() <= SEQUENCE_SPAN_SECS)
            .unwrap_or(false);
        if all_low && span_ok {
            return Some(Decision {
                kind: AlertKind::Sequence,
                severity: Severity::High,
                title: "Sustained low safety score".into(),
                description: format!(
                    "{SEQUENCE_LEN} consecutive samples at or below {SEQUENCE_MAX_SCORE}"
                ),
                zone_id: None,
                metadata: json!({ "samples": SEQUENCE_LEN, "score": ctx.score }),
            });
        }
    }

    None
}

/// Event JSON published on the hub and forwarded verbatim to sessions.
pub fn alert_event(alert: &AlertRow) -> serde_json::Value {
    json!({
        "alert": {
            "id": alert.id,
            "kind": alert.kind,
            "severity": alert.severity,
            "tourist_id": alert.tourist_id,
            "title": alert.title,
            "description": alert.description,
            "location": match (alert.lat, alert.lon) {
                (Some(lat), Some(lon)) => json!({ "lat": lat, "lon": lon }),
                _ => serde_json::Value::Null,
            },
            "zone_id": alert.zone_id,
            "metadata": alert.metadata,
            "created_at": alert.created_at,
        }
    })
}

/// Publish a created alert to the authority fan-out and the tourist's
/// private channel.
pub fn publish(hub: &Hub, alert: &AlertRow) {
    let event = alert_event(alert);
    hub.publish(hub::CH_ALERTS_AUTHORITY, "alert_created", event.clone());
    hub.publish(&hub::tourist_channel(&alert.tourist_id), "alert_created", event);
}

/// Create an alert row and publish it. Returns None when the dedup index
/// says another instance (or an earlier sample) already raised it.
pub async fn create(
    pool: &PgPool,
    hub: &Hub,
    metrics: &Metrics,
    tourist_id: &str,
    location_id: Option<i64>,
    lat: Option<f64>,
    lon: Option<f64>,
    decision: Decision,
    now: DateTime<Utc>,
) -> ApiResult<Option<AlertRow>> {
    let bucket = decision.kind.deduplicated().then(|| dedup_bucket(now));
    let mut tx = pool.begin().await?;
    let inserted = repo::alerts::insert(
        &mut tx,
        &repo::alerts::NewAlert {
            tourist_id,
            location_id,
            kind: decision.kind,
            severity: decision.severity,
            title: decision.title,
            description: decision.description,
            lat,
            lon,
            metadata: decision.metadata,
            zone_id: decision.zone_id,
            dedup_bucket: bucket,
        },
    )
    .await?;

    let Some(alert) = inserted else {
        tx.rollback().await?;
        Metrics::bump(&metrics.alerts_deduped);
        info!(tourist = tourist_id, kind = decision.kind.as_str(), "alert_deduped");
        return Ok(None);
    };

    publish(hub, &alert);
    tx.commit().await?;
    Metrics::bump(&metrics.alerts_created);
    info!(
        alert_id = alert.id,
        tourist = tourist_id,
        kind = %alert.kind,
        severity = %alert.severity,
        "alert_created"
    );
    Ok(Some(alert))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskLevel;

    fn hit(zone_type: ZoneType, zone_id: i64) -> ZoneHit {
        ZoneHit {
            zone_id,
            name: format!("zone-{zone_id}"),
            zone_type,
            boundary_distance_m: 25.0,
            inside: true,
        }
    }

    fn sample(score: Option<i32>, age_secs: i64, now: DateTime<Utc>) -> LocationRow {
        LocationRow {
            id: 1,
            tourist_id: "T1".into(),
            trip_id: None,
            lat: 0.0,
            lon: 0.0,
            altitude: None,
            speed: None,
            accuracy: None,
            client_ts: now - chrono::Duration::seconds(age_secs),
            ingested_at: now - chrono::Duration::seconds(age_secs),
            safety_score: score,
            safety_score_updated_at: None,
        }
    }

    #[test]
    fn restricted_zone_beats_everything() {
        let now = Utc::now();
        let hits = vec![hit(ZoneType::Risky, 1), hit(ZoneType::Restricted, 2)];
        let d = decide(&RuleContext { score: 10, zone_hits: &hits, previous: &[], now }).unwrap();
        assert_eq!(d.kind, AlertKind::Geofence);
        assert_eq!(d.severity, Severity::Critical);
        assert_eq!(d.zone_id, Some(2));
        assert_eq!(d.metadata["zone_id"], 2);
    }

    #[test]
    fn risky_zone_is_high_severity_geofence() {
        let now = Utc::now();
        let hits = vec![hit(ZoneType::Risky, 3)];
        let d = decide(&RuleContext { score: 70, zone_hits: &hits, previous: &[], now }).unwrap();
        assert_eq!(d.kind, AlertKind::Geofence);
        assert_eq!(d.severity, Severity::High);
    }

    #[test]
    fn safe_zone_raises_nothing() {
        let now = Utc::now();
        let hits = vec![hit(ZoneType::Safe, 4)];
        assert_eq!(decide(&RuleContext { score: 85, zone_hits: &hits, previous: &[], now }), None);
    }

    #[test]
    fn score_collapse_fires_on_recent_healthy_sample() {
        let now = Utc::now();
        let prev = vec![sample(Some(72), 30, now), sample(Some(55), 60, now)];
        let d = decide(&RuleContext { score: 35, zone_hits: &[], previous: &prev, now }).unwrap();
        assert_eq!(d.kind, AlertKind::Anomaly);
        assert_eq!(d.severity, Severity::Critical);
        assert_eq!(scoring::risk_level(35), RiskLevel::Critical);
    }

    #[test]
    fn score_collapse_at_forty_is_high() {
        let now = Utc::now();
        let prev = vec![sample(Some(72), 30, now)];
        let d = decide(&RuleContext { score: 40, zone_hits: &[], previous: &prev, now }).unwrap();
        assert_eq!(d.severity, Severity::High);
    }

    #[test]
    fn no_collapse_without_healthy_history() {
        let now = Utc::now();
        // Healthy sample is three back, outside the two-sample lookback.
        let prev = vec![
            sample(Some(50), 30, now),
            sample(Some(45), 60, now),
            sample(Some(80), 90, now),
        ];
        assert_eq!(decide(&RuleContext { score: 35, zone_hits: &[], previous: &prev, now }), None);
    }

    #[test]
    fn sequence_fires_after_five_low_samples_in_window() {
        let now = Utc::now();
        let prev = vec![
            sample(Some(48), 120, now),
            sample(Some(44), 300, now),
            sample(Some(50), 600, now),
            sample(Some(41), 900, now),
        ];
        let d = decide(&RuleContext { score: 45, zone_hits: &[], previous: &prev, now }).unwrap();
        assert_eq!(d.kind, AlertKind::Sequence);
        assert_eq!(d.severity, Severity::High);
    }

    #[test]
    fn sequence_needs_tight_span() {
        let now = Utc::now();
        // Oldest of the window is 25 minutes back.
        let prev = vec![
            sample(Some(48), 120, now),
            sample(Some(44), 300, now),
            sample(Some(50), 600, now),
            sample(Some(41), 1500, now),
        ];
        assert_eq!(decide(&RuleContext { score: 45, zone_hits: &[], previous: &prev, now }), None);
    }

    #[test]
    fn sequence_broken_by_unscored_sample() {
        let now = Utc::now();
        let prev = vec![
            sample(Some(48), 120, now),
            sample(None, 300, now),
            sample(Some(50), 600, now),
            sample(Some(41), 900, now),
        ];
        assert_eq!(decide(&RuleContext { score: 45, zone_hits: &[], previous: &prev, now }), None);
    }

    #[test]
    fn dedup_bucket_is_thirty_minutes() {
        let t0 = DateTime::parse_from_rfc3339("2026-08-01T10:00:00Z").unwrap().to_utc();
        let t1 = t0 + chrono::Duration::minutes(29);
        let t2 = t0 + chrono::Duration::minutes(31);
        assert_eq!(dedup_bucket(t0), dedup_bucket(t1));
        assert_ne!(dedup_bucket(t0), dedup_bucket(t2));
    }

    #[test]
    fn alert_event_shape() {
        let alert = AlertRow {
            id: 9,
            tourist_id: "T1".into(),
            location_id: Some(4),
            kind: "panic".into(),
            severity: "critical".into(),
            title: "SOS".into(),
            description: "Panic button pressed".into(),
            lat: Some(28.6139),
            lon: Some(77.2090),
            metadata: json!({}),
            zone_id: None,
            dedup_bucket: None,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            created_at: Utc::now(),
        };
        let event = alert_event(&alert);
        assert_eq!(event["alert"]["kind"], "panic");
        assert_eq!(event["alert"]["severity"], "critical");
        assert_eq!(event["alert"]["tourist_id"], "T1");
        assert_eq!(event["alert"]["location"]["lat"], 28.6139);
        assert_eq!(event["alert"]["location"]["lon"], 77.2090);
    }
}
