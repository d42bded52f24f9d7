//! Six-factor safety scoring.
//!
//! `compute` is a pure function over a `ScoreInputs` snapshot; the ingest
//! path assembles the snapshot from the database and the geofence index, so
//! the same inputs always produce the same score.

use serde::Serialize;

use crate::geofence::ZoneHit;
use crate::models::{RiskLevel, Severity, ZoneType};

// Factor weights. Must sum to 1.0.
const W_NEARBY_ALERTS: f64 = 0.30;
const W_ZONE_RISK: f64 = 0.25;
const W_TIME_OF_DAY: f64 = 0.15;
const W_CROWD: f64 = 0.10;
const W_SPEED: f64 = 0.10;
const W_HISTORY: f64 = 0.10;

// Interpolation band for the zone-risk factor: outside a hazard zone the
// factor climbs from the boundary value to 90 over this many meters.
const HAZARD_FALLOFF_M: f64 = 500.0;

/// Everything the scorer needs, gathered by the caller.
#[derive(Clone, Debug, Default)]
pub struct ScoreInputs {
    /// Severities of alerts created in the last 6 h within 2 km.
    pub nearby_alerts: Vec<Severity>,
    /// Zones containing the point.
    pub zone_hits: Vec<ZoneHit>,
    /// Nearest risky/restricted boundary: (type, meters). None when no
    /// hazard zones exist.
    pub nearest_hazard: Option<(ZoneType, f64)>,
    /// Local hour 0..24, already skew-corrected by the caller.
    pub local_hour: u32,
    /// Distinct other tourists seen within 1 km in the last 15 min.
    pub nearby_tourists: u32,
    /// Current speed in m/s, if the client reported one.
    pub speed: Option<f64>,
    /// Speeds of this tourist's last 10 samples, m/s.
    pub recent_speeds: Vec<f64>,
    /// All alerts ever recorded within 1 km.
    pub historical_alert_count: u32,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct FactorBreakdown {
    pub nearby_alerts: u32,
    pub zone_risk: u32,
    pub time_of_day: u32,
    pub crowd_density: u32,
    pub speed_anomaly: u32,
    pub historical_risk: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct ScoreResult {
    pub score: i32,
    pub risk_level: RiskLevel,
    pub breakdown: FactorBreakdown,
    pub recommendations: Vec<&'static str>,
}

pub fn compute(inputs: &ScoreInputs) -> ScoreResult {
    let breakdown = FactorBreakdown {
        nearby_alerts: factor_nearby_alerts(&inputs.nearby_alerts),
        zone_risk: factor_zone_risk(&inputs.zone_hits, inputs.nearest_hazard),
        time_of_day: factor_time_of_day(inputs.local_hour),
        crowd_density: factor_crowd(inputs.nearby_tourists),
        speed_anomaly: factor_speed(inputs.speed, &inputs.recent_speeds),
        historical_risk: factor_history(inputs.historical_alert_count),
    };

    let weighted = W_NEARBY_ALERTS * breakdown.nearby_alerts as f64
        + W_ZONE_RISK * breakdown.zone_risk as f64
        + W_TIME_OF_DAY * breakdown.time_of_day as f64
        + W_CROWD * breakdown.crowd_density as f64
        + W_SPEED * breakdown.speed_anomaly as f64
        + W_HISTORY * breakdown.historical_risk as f64;
    let score = (weighted.round() as i32).clamp(0, 100);

    ScoreResult {
        score,
        risk_level: risk_level(score),
        breakdown,
        recommendations: recommendations(&breakdown),
    }
}

pub fn risk_level(score: i32) -> RiskLevel {
    if score < 40 {
        RiskLevel::Critical
    } else if score < 60 {
        RiskLevel::High
    } else if score < 80 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Rolling-score update applied on every ingest: 30% prior, 70% new.
pub fn blend(prior: i32, new: i32) -> i32 {
    (0.3 * prior as f64 + 0.7 * new as f64).round() as i32
}

fn factor_nearby_alerts(severities: &[Severity]) -> u32 {
    let weighted: u32 = severities.iter().map(|s| s.weight()).sum();
    100u32.saturating_sub(15 * weighted)
}

fn factor_zone_risk(hits: &[ZoneHit], nearest_hazard: Option<(ZoneType, f64)>) -> u32 {
    // Worst containing zone wins.
    if hits.iter().any(|h| h.zone_type == ZoneType::Restricted) {
        return 0;
    }
    if hits.iter().any(|h| h.zone_type == ZoneType::Risky) {
        return 40;
    }
    if hits.iter().any(|h| h.zone_type == ZoneType::Safe) {
        return 100;
    }
    match nearest_hazard {
        None => 90,
        Some((_, d)) if d >= HAZARD_FALLOFF_M => 90,
        Some((zone_type, d)) => {
            // Climb from the hazard's boundary value toward 90.
            let base = if zone_type == ZoneType::Restricted { 20.0 } else { 40.0 };
            (base + (90.0 - base) * (d / HAZARD_FALLOFF_M)).round() as u32
        }
    }
}

fn factor_time_of_day(hour: u32) -> u32 {
    match hour % 24 {
        22..=23 | 0..=5 => 50,
        6..=8 | 18..=21 => 75,
        _ => 95,
    }
}

fn factor_crowd(nearby: u32) -> u32 {
    match nearby {
        0 => 50,
        1..=3 => 70,
        4..=10 => 85,
        _ => 95,
    }
}

fn factor_speed(speed: Option<f64>, recent: &[f64]) -> u32 {
    let Some(speed) = speed else { return 90 };
    if recent.is_empty() {
        return 90;
    }
    let mut sorted = recent.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let median = if sorted.len() % 2 == 1 {
        sorted[sorted.len() / 2]
    } else {
        (sorted[sorted.len() / 2 - 1] + sorted[sorted.len() / 2]) / 2.0
    };
    let mean = recent.iter().sum::<f64>() / recent.len() as f64;
    let var = recent.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / recent.len() as f64;
    // Floor the deviation at 1 m/s so a perfectly steady history does not
    // turn every tiny fluctuation into an anomaly.
    let std = var.sqrt().max(1.0);
    let z = ((speed - median) / std).abs();
    if z > 3.0 {
        40
    } else if z > 2.0 {
        60
    } else if z > 1.0 {
        80
    } else {
        95
    }
}

fn factor_history(count: u32) -> u32 {
    (100u32.saturating_sub(2 * count.min(30))).max(40)
}

// Canonical recommendation strings, keyed by the factor that fell below 70,
// emitted in fixed factor order.
const REC_NEARBY_ALERTS: &str =
    "Recent incidents reported nearby — stay alert and avoid isolated spots";
const REC_ZONE_RISK: &str = "You are in or near a high-risk zone — move toward a safer area";
const REC_TIME_OF_DAY: &str = "It is late — prefer well-lit, populated routes";
const REC_CROWD: &str = "Few people around — consider staying near other visitors";
const REC_SPEED: &str = "Unusual movement speed detected — verify your route";
const REC_HISTORY: &str = "This area has a history of incidents — remain vigilant";

fn recommendations(b: &FactorBreakdown) -> Vec<&'static str> {
    let mut out = Vec::new();
    if b.nearby_alerts < 70 {
        out.push(REC_NEARBY_ALERTS);
    }
    if b.zone_risk < 70 {
        out.push(REC_ZONE_RISK);
    }
    if b.time_of_day < 70 {
        out.push(REC_TIME_OF_DAY);
    }
    if b.crowd_density < 70 {
        out.push(REC_CROWD);
    }
    if b.speed_anomaly < 70 {
        out.push(REC_SPEED);
    }
    if b.historical_risk < 70 {
        out.push(REC_HISTORY);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geofence::ZoneHit;

    fn hit(zone_type: ZoneType) -> ZoneHit {
        ZoneHit {
            zone_id: 1,
            name: "z".into(),
            zone_type,
            boundary_distance_m: 10.0,
            inside: true,
        }
    }

    #[test]
    fn weights_sum_to_one() {
        let sum = W_NEARBY_ALERTS + W_ZONE_RISK + W_TIME_OF_DAY + W_CROWD + W_SPEED + W_HISTORY;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn nearby_alerts_severity_weighting() {
        assert_eq!(factor_nearby_alerts(&[]), 100);
        assert_eq!(factor_nearby_alerts(&[Severity::Low]), 85);
        assert_eq!(factor_nearby_alerts(&[Severity::Critical]), 40);
        // 4+3 = 7 weighted => 100 - 105 saturates at 0
        assert_eq!(factor_nearby_alerts(&[Severity::Critical, Severity::High]), 0);
    }

    #[test]
    fn zone_risk_containment_precedence() {
        assert_eq!(factor_zone_risk(&[hit(ZoneType::Restricted), hit(ZoneType::Safe)], None), 0);
        assert_eq!(factor_zone_risk(&[hit(ZoneType::Risky)], None), 40);
        assert_eq!(factor_zone_risk(&[hit(ZoneType::Safe)], None), 100);
    }

    #[test]
    fn zone_risk_interpolates_outside() {
        assert_eq!(factor_zone_risk(&[], None), 90);
        assert_eq!(factor_zone_risk(&[], Some((ZoneType::Risky, 600.0))), 90);
        assert_eq!(factor_zone_risk(&[], Some((ZoneType::Risky, 500.0))), 90);
        // Halfway up the band from a risky boundary: 40 + 50*0.5 = 65
        assert_eq!(factor_zone_risk(&[], Some((ZoneType::Risky, 250.0))), 65);
        // Restricted boundary starts lower: 20 + 70*0.5 = 55
        assert_eq!(factor_zone_risk(&[], Some((ZoneType::Restricted, 250.0))), 55);
        assert_eq!(factor_zone_risk(&[], Some((ZoneType::Risky, 0.0))), 40);
    }

    #[test]
    fn time_of_day_bands() {
        assert_eq!(factor_time_of_day(23), 50);
        assert_eq!(factor_time_of_day(3), 50);
        assert_eq!(factor_time_of_day(5), 50);
        assert_eq!(factor_time_of_day(6), 75);
        assert_eq!(factor_time_of_day(8), 75);
        assert_eq!(factor_time_of_day(9), 95);
        assert_eq!(factor_time_of_day(17), 95);
        assert_eq!(factor_time_of_day(18), 75);
        assert_eq!(factor_time_of_day(21), 75);
        assert_eq!(factor_time_of_day(22), 50);
    }

    #[test]
    fn crowd_bands() {
        assert_eq!(factor_crowd(0), 50);
        assert_eq!(factor_crowd(1), 70);
        assert_eq!(factor_crowd(3), 70);
        assert_eq!(factor_crowd(4), 85);
        assert_eq!(factor_crowd(10), 85);
        assert_eq!(factor_crowd(11), 95);
    }

    #[test]
    fn speed_neutral_without_data() {
        assert_eq!(factor_speed(None, &[1.0, 2.0]), 90);
        assert_eq!(factor_speed(Some(5.0), &[]), 90);
    }

    #[test]
    fn speed_z_bands() {
        // History: steady walking ~1.4 m/s, std floored to 1.0
        let hist = vec![1.4; 10];
        assert_eq!(factor_speed(Some(1.4), &hist), 95);
        assert_eq!(factor_speed(Some(2.9), &hist), 80); // z = 1.5
        assert_eq!(factor_speed(Some(3.9), &hist), 60); // z = 2.5
        assert_eq!(factor_speed(Some(9.0), &hist), 40); // z = 7.6
    }

    #[test]
    fn history_floor_at_40() {
        assert_eq!(factor_history(0), 100);
        assert_eq!(factor_history(5), 90);
        assert_eq!(factor_history(30), 40);
        assert_eq!(factor_history(1000), 40);
    }

    #[test]
    fn risk_level_band_edges() {
        assert_eq!(risk_level(39), RiskLevel::Critical);
        assert_eq!(risk_level(40), RiskLevel::High);
        assert_eq!(risk_level(59), RiskLevel::High);
        assert_eq!(risk_level(60), RiskLevel::Medium);
        assert_eq!(risk_level(79), RiskLevel::Medium);
        assert_eq!(risk_level(80), RiskLevel::Low);
        assert_eq!(risk_level(100), RiskLevel::Low);
    }

    #[test]
    fn blend_thirty_seventy() {
        // 0.3*90 + 0.7*50 = 62
        assert_eq!(blend(90, 50), 62);
        assert_eq!(blend(100, 100), 100);
        assert_eq!(blend(0, 0), 0);
    }

    #[test]
    fn perfect_day_scores_high() {
        let inputs = ScoreInputs {
            zone_hits: vec![hit(ZoneType::Safe)],
            local_hour: 12,
            nearby_tourists: 12,
            speed: Some(1.4),
            recent_speeds: vec![1.4; 10],
            historical_alert_count: 0,
            ..Default::default()
        };
        let r = compute(&inputs);
        assert!(r.score >= 95, "got {}", r.score);
        assert_eq!(r.risk_level, RiskLevel::Low);
        assert!(r.recommendations.is_empty());
    }

    #[test]
    fn restricted_zone_at_night_is_critical() {
        let inputs = ScoreInputs {
            nearby_alerts: vec![Severity::Critical, Severity::High],
            zone_hits: vec![hit(ZoneType::Restricted)],
            local_hour: 2,
            nearby_tourists: 0,
            speed: None,
            recent_speeds: vec![],
            historical_alert_count: 30,
            ..Default::default()
        };
        let r = compute(&inputs);
        // 0*0.30 + 0*0.25 + 50*0.15 + 50*0.10 + 90*0.10 + 40*0.10 = 25.5
        assert_eq!(r.score, 26);
        assert_eq!(r.risk_level, RiskLevel::Critical);
        assert_eq!(
            r.recommendations,
            vec![REC_NEARBY_ALERTS, REC_ZONE_RISK, REC_TIME_OF_DAY, REC_CROWD, REC_HISTORY]
        );
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let inputs = ScoreInputs {
            nearby_alerts: vec![Severity::Medium],
            local_hour: 19,
            nearby_tourists: 2,
            speed: Some(2.0),
            recent_speeds: vec![1.0, 1.5, 2.0, 2.5],
            historical_alert_count: 4,
            ..Default::default()
        };
        let a = compute(&inputs);
        let b = compute(&inputs);
        assert_eq!(a.score, b.score);
        assert_eq!(a.recommendations, b.recommendations);
    }
}
