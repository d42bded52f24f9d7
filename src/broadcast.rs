//! Area-targeted emergency broadcast fan-out.
//!
//! The target set is materialized from one snapshot query at dispatch time;
//! tourists who move into range afterwards are not retroactively notified.
//! Each delivery leg (hub, push, SMS) runs independently — a dead push
//! gateway never blocks the session fan-out.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::geo;
use crate::geofence;
use crate::hub;
use crate::metrics::Metrics;
use crate::models::{BroadcastRow, BroadcastType, Severity};
use crate::notifier;
use crate::repo;
use crate::state::AppState;

/// Radius/zone/region broadcasts only reach tourists seen this recently.
const TARGET_RECENCY_HOURS: i64 = 24;
/// The `all` type reaches anyone active within a week.
const ALL_RECENCY_DAYS: i64 = 7;

#[derive(Clone, Debug)]
pub enum Target {
    Radius { center_lat: f64, center_lon: f64, radius_km: f64 },
    Zone { zone_id: i64 },
    Region { min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64 },
    All,
}

impl Target {
    pub fn broadcast_type(&self) -> BroadcastType {
        match self {
            Target::Radius { .. } => BroadcastType::Radius,
            Target::Zone { .. } => BroadcastType::Zone,
            Target::Region { .. } => BroadcastType::Region,
            Target::All => BroadcastType::All,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Content {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub expires_at: Option<DateTime<Utc>>,
}

struct Recipient {
    tourist_id: String,
    phone: Option<String>,
}

/// Resolve, record, and fan out a broadcast. Returns the persisted record
/// with submitted-leg counters filled in.
pub async fn dispatch(
    state: &AppState,
    sender_id: &str,
    target: Target,
    content: Content,
) -> ApiResult<BroadcastRow> {
    let recipients = resolve(state, &target).await?;

    let seq = repo::next_daily_seq(&state.db, "bcast").await?;
    let number = repo::artifact_number("BCAST", Utc::now().date_naive(), seq);
    let (center_lat, center_lon, radius_km, zone_id, bbox) = match &target {
        Target::Radius { center_lat, center_lon, radius_km } => {
            (Some(*center_lat), Some(*center_lon), Some(*radius_km), None, None)
        }
        Target::Zone { zone_id } => (None, None, None, Some(*zone_id), None),
        Target::Region { min_lat, min_lon, max_lat, max_lon } => {
            (None, None, None, None, Some((*min_lat, *min_lon, *max_lat, *max_lon)))
        }
        Target::All => (None, None, None, None, None),
    };
    let record = repo::broadcasts::insert(
        &state.db,
        &repo::broadcasts::NewBroadcast {
            broadcast_number: number,
            broadcast_type: target.broadcast_type().as_str(),
            center_lat,
            center_lon,
            radius_km,
            zone_id,
            bbox,
            title: &content.title,
            message: &content.message,
            severity: content.severity.as_str(),
            sent_by: sender_id,
            expires_at: content.expires_at,
        },
    )
    .await?;

    // Zone broadcasts also land on the reserved per-zone channel for any
    // dashboard watching that area.
    if let Target::Zone { zone_id } = &target {
        state
            .hub
            .publish(&hub::zone_channel(*zone_id), "broadcast", broadcast_event(&record));
    }

    let (tourists_notified, devices_notified) = fan_out(state, &record, &content, &recipients).await;
    let record =
        repo::broadcasts::set_delivery_counts(&state.db, record.id, tourists_notified, devices_notified)
            .await?;

    Metrics::bump(&state.metrics.broadcasts_sent);
    info!(
        broadcast = %record.broadcast_number,
        kind = %record.broadcast_type,
        tourists = tourists_notified,
        devices = devices_notified,
        "broadcast_dispatched"
    );
    Ok(record)
}

/// Materialize the target set: one snapshot query plus the exact geometry
/// cut in process.
async fn resolve(state: &AppState, target: &Target) -> ApiResult<Vec<Recipient>> {
    let since = Utc::now() - chrono::Duration::hours(TARGET_RECENCY_HOURS);
    let rows = match target {
        Target::Radius { center_lat, center_lon, radius_km } => {
            let radius_m = radius_km * 1_000.0;
            let dlat = geo::lat_degrees(radius_m);
            let dlon = geo::lon_degrees(radius_m, *center_lat);
            repo::tourists::broadcast_candidates(
                &state.db,
                center_lat - dlat,
                center_lat + dlat,
                center_lon - dlon,
                center_lon + dlon,
                since,
            )
            .await?
            .into_iter()
            .filter(|(_, lat, lon, _)| {
                geo::haversine_m(*center_lat, *center_lon, *lat, *lon) <= radius_m
            })
            .map(|(id, _, _, phone)| Recipient { tourist_id: id, phone })
            .collect()
        }
        Target::Zone { zone_id } => {
            let zone = repo::zones::fetch(&state.db, *zone_id)
                .await?
                .ok_or(ApiError::NotFound)?;
            let def = geofence::build_defs(vec![zone])
                .pop()
                .ok_or_else(|| ApiError::Validation("zone has malformed geometry".into()))?;
            let (min_lat, max_lat, min_lon, max_lon) = def.bbox();
            repo::tourists::broadcast_candidates(&state.db, min_lat, max_lat, min_lon, max_lon, since)
                .await?
                .into_iter()
                .filter(|(_, lat, lon, _)| def.contains(*lat, *lon))
                .map(|(id, _, _, phone)| Recipient { tourist_id: id, phone })
                .collect()
        }
        Target::Region { min_lat, min_lon, max_lat, max_lon } => {
            repo::tourists::broadcast_candidates(&state.db, *min_lat, *max_lat, *min_lon, *max_lon, since)
                .await?
                .into_iter()
                .map(|(id, _, _, phone)| Recipient { tourist_id: id, phone })
                .collect()
        }
        Target::All => {
            let since = Utc::now() - chrono::Duration::days(ALL_RECENCY_DAYS);
            repo::tourists::all_recent(&state.db, since)
                .await?
                .into_iter()
                .map(|(id, phone)| Recipient { tourist_id: id, phone })
                .collect()
        }
    };
    Ok(rows)
}

/// Event JSON delivered to tourist sessions.
pub fn broadcast_event(record: &BroadcastRow) -> serde_json::Value {
    json!({
        "broadcast": {
            "id": record.id,
            "broadcast_number": record.broadcast_number,
            "type": record.broadcast_type,
            "title": record.title,
            "message": record.message,
            "severity": record.severity,
            "sent_at": record.sent_at,
            "expires_at": record.expires_at,
        }
    })
}

/// Run the three legs per recipient. Returns (tourists, devices) submitted.
async fn fan_out(
    state: &AppState,
    record: &BroadcastRow,
    content: &Content,
    recipients: &[Recipient],
) -> (i32, i32) {
    let event = broadcast_event(record);
    let sms_eligible = content.severity >= Severity::High;
    let mut devices_notified = 0i32;
    let mut legs = tokio::task::JoinSet::new();

    for r in recipients {
        // Leg (a): hub publish to the tourist's private channel.
        state
            .hub
            .publish(&hub::tourist_channel(&r.tourist_id), "broadcast", event.clone());

        // Leg (b): one push per active device.
        let devices = repo::devices::active_for(&state.db, &r.tourist_id)
            .await
            .unwrap_or_default();
        for device in devices {
            let notifier = state.notifier.clone();
            let metrics = state.metrics.clone();
            let title = content.title.clone();
            let body = content.message.clone();
            let data = event.clone();
            legs.spawn(async move {
                let ok = notifier::with_retries(&metrics, "push", || {
                    notifier.push(&device.push_token, &title, &body, &data)
                })
                .await;
                if ok {
                    Metrics::bump(&metrics.push_submitted);
                }
                ok
            });
        }

        // Leg (c): SMS for high/critical when we have a number.
        if sms_eligible {
            if let Some(phone) = r.phone.clone() {
                let notifier = state.notifier.clone();
                let metrics = state.metrics.clone();
                let body = format!("{}: {}", content.title, content.message);
                legs.spawn(async move {
                    let ok = notifier::with_retries(&metrics, "sms", || notifier.sms(&phone, &body))
                        .await;
                    if ok {
                        Metrics::bump(&metrics.sms_submitted);
                    }
                    false // SMS legs do not count as device notifications
                });
            }
        }
    }

    while let Some(res) = legs.join_next().await {
        if matches!(res, Ok(true)) {
            devices_notified += 1;
        }
    }
    (recipients.len() as i32, devices_notified)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_maps_to_broadcast_type() {
        assert_eq!(
            Target::Radius { center_lat: 0.0, center_lon: 0.0, radius_km: 5.0 }.broadcast_type(),
            BroadcastType::Radius
        );
        assert_eq!(Target::Zone { zone_id: 1 }.broadcast_type(), BroadcastType::Zone);
        assert_eq!(
            Target::Region { min_lat: 0.0, min_lon: 0.0, max_lat: 1.0, max_lon: 1.0 }
                .broadcast_type(),
            BroadcastType::Region
        );
        assert_eq!(Target::All.broadcast_type(), BroadcastType::All);
    }

    #[test]
    fn radius_cut_matches_scenario_distances() {
        // Mumbai center; candidates at 1.2, 4.8 and 6.0 km. A 5 km radius
        // keeps the first two.
        let center = (19.0760, 72.8777);
        let t4 = (19.0868, 72.8777); // ~1.2 km north
        let t5 = (19.1192, 72.8777); // ~4.8 km north
        let t6 = (19.1300, 72.8777); // ~6.0 km north
        let radius_m = 5_000.0;
        let within = |p: (f64, f64)| geo::haversine_m(center.0, center.1, p.0, p.1) <= radius_m;
        assert!(within(t4));
        assert!(within(t5));
        assert!(!within(t6));
    }

    #[test]
    fn broadcast_event_shape() {
        let record = BroadcastRow {
            id: 3,
            broadcast_number: "BCAST-20260801-0001".into(),
            broadcast_type: "radius".into(),
            center_lat: Some(19.0760),
            center_lon: Some(72.8777),
            radius_km: Some(5.0),
            zone_id: None,
            min_lat: None,
            min_lon: None,
            max_lat: None,
            max_lon: None,
            title: "Flood warning".into(),
            message: "Move to higher ground".into(),
            severity: "critical".into(),
            sent_by: "A1".into(),
            sent_at: Utc::now(),
            expires_at: None,
            tourists_notified: 0,
            devices_notified: 0,
            acknowledgment_count: 0,
        };
        let event = broadcast_event(&record);
        assert_eq!(event["broadcast"]["broadcast_number"], "BCAST-20260801-0001");
        assert_eq!(event["broadcast"]["type"], "radius");
        assert_eq!(event["broadcast"]["severity"], "critical");
    }
}
