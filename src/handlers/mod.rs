//! HTTP surface. Every handler validates at the boundary and hands typed
//! values to the core; role gates ride the auth extractors.

pub mod alerts;
pub mod broadcast;
pub mod devices;
pub mod efir;
pub mod incidents;
pub mod location;
pub mod public;
pub mod system;
pub mod trips;
pub mod zones;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::error::{ApiError, ApiResult};
use crate::gateway;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        // Tourist telemetry & safety
        .route("/api/location/update", post(location::update))
        .route("/api/location/nearby-risks", get(location::nearby_risks))
        .route("/api/safety/score", get(location::safety_score))
        .route("/api/sos/trigger", post(alerts::sos_trigger))
        .route("/api/trip/start", post(trips::start))
        .route("/api/trip/end", post(trips::end))
        .route("/api/device/register", post(devices::register))
        // Alert lifecycle (authority)
        .route("/api/alerts/recent", get(alerts::recent))
        .route("/api/alerts/:id/acknowledge", post(alerts::acknowledge))
        .route("/api/alerts/:id/resolve", post(alerts::resolve))
        .route("/api/incidents", post(incidents::create))
        .route("/api/incidents/:id/status", post(incidents::set_status))
        // Broadcasts
        .route("/api/broadcast/radius", post(broadcast::radius))
        .route("/api/broadcast/zone", post(broadcast::zone))
        .route("/api/broadcast/region", post(broadcast::region))
        .route("/api/broadcast/all", post(broadcast::all))
        .route("/api/broadcast/active", get(broadcast::active))
        .route("/api/broadcast/:id/acknowledge", post(broadcast::acknowledge))
        // Zones
        .route("/api/zones", post(zones::create).get(zones::list))
        .route("/api/zones/:id", delete(zones::remove))
        // E-FIR
        .route("/api/efir/generate", post(efir::generate))
        .route("/api/efir/verify/:tx_id", get(efir::verify))
        // Public & streaming
        .route("/api/public/panic-alerts", get(public::panic_alerts))
        .route("/api/alerts/subscribe", get(gateway::subscribe))
        // Probes
        .route("/health", get(system::health))
        .route("/ready", get(system::ready))
        .route("/metrics", get(system::metrics))
}

pub fn check_coords(lat: f64, lon: f64) -> ApiResult<()> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(ApiError::Validation("coordinates out of range".into()));
    }
    Ok(())
}

/// Speed is meters/second; anything past 150 m/s is not a tourist.
pub fn check_speed(speed: Option<f64>) -> ApiResult<()> {
    if let Some(s) = speed {
        if !(0.0..=150.0).contains(&s) {
            return Err(ApiError::Validation("speed out of range".into()));
        }
    }
    Ok(())
}

pub fn non_empty(value: &str, field: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_bounds() {
        assert!(check_coords(90.0, 180.0).is_ok());
        assert!(check_coords(-90.0, -180.0).is_ok());
        assert!(check_coords(90.01, 0.0).is_err());
        assert!(check_coords(0.0, -180.5).is_err());
    }

    #[test]
    fn speed_bounds() {
        assert!(check_speed(None).is_ok());
        assert!(check_speed(Some(0.0)).is_ok());
        assert!(check_speed(Some(150.0)).is_ok());
        assert!(check_speed(Some(-0.1)).is_err());
        assert!(check_speed(Some(300.0)).is_err());
    }

    #[test]
    fn non_empty_rejects_whitespace() {
        assert!(non_empty("x", "title").is_ok());
        assert!(non_empty("  ", "title").is_err());
    }
}
