//! Entity rows and domain enums shared across the pipeline.
//!
//! Enum-ish columns are stored as lowercase TEXT; the typed enums here carry
//! the conversions. DB rows map 1:1 via `sqlx::FromRow`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Geofence,
    Anomaly,
    Panic,
    Sos,
    Sequence,
    Manual,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Geofence => "geofence",
            AlertKind::Anomaly => "anomaly",
            AlertKind::Panic => "panic",
            AlertKind::Sos => "sos",
            AlertKind::Sequence => "sequence",
            AlertKind::Manual => "manual",
        }
    }

    /// Kinds that participate in the 30-minute dedup window.
    pub fn deduplicated(&self) -> bool {
        matches!(self, AlertKind::Geofence | AlertKind::Anomaly | AlertKind::Sequence)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Severity weight used by the nearby-alerts scoring factor.
    pub fn weight(&self) -> u32 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    Safe,
    Risky,
    Restricted,
}

impl ZoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneType::Safe => "safe",
            ZoneType::Risky => "risky",
            ZoneType::Restricted => "restricted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "safe" => Some(ZoneType::Safe),
            "risky" => Some(ZoneType::Risky),
            "restricted" => Some(ZoneType::Restricted),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastType {
    Radius,
    Zone,
    Region,
    All,
}

impl BroadcastType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastType::Radius => "radius",
            BroadcastType::Zone => "zone",
            BroadcastType::Region => "region",
            BroadcastType::All => "all",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Safe,
    NeedHelp,
    Evacuating,
}

impl AckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckStatus::Safe => "safe",
            AckStatus::NeedHelp => "need_help",
            AckStatus::Evacuating => "evacuating",
        }
    }
}

// --- Entity rows -------------------------------------------------------------

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Tourist {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub safety_score: i32,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_lat: Option<f64>,
    pub last_lon: Option<f64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Authority {
    pub id: String,
    pub name: String,
    pub badge_number: String,
    pub department: String,
    pub rank: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, sqlx::FromRow, Serialize)]
pub struct Zone {
    pub id: i64,
    pub name: String,
    pub zone_type: String,
    pub center_lat: f64,
    pub center_lon: f64,
    pub radius_m: Option<f64>,
    pub bounds: Option<serde_json::Value>,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct LocationRow {
    pub id: i64,
    pub tourist_id: String,
    pub trip_id: Option<i64>,
    pub lat: f64,
    pub lon: f64,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub accuracy: Option<f64>,
    pub client_ts: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub safety_score: Option<i32>,
    pub safety_score_updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, sqlx::FromRow, Serialize)]
pub struct AlertRow {
    pub id: i64,
    pub tourist_id: String,
    pub location_id: Option<i64>,
    pub kind: String,
    pub severity: String,
    pub title: String,
    pub description: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub metadata: serde_json::Value,
    pub zone_id: Option<i64>,
    #[serde(skip)]
    pub dedup_bucket: Option<i64>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, sqlx::FromRow, Serialize)]
pub struct TripRow {
    pub id: i64,
    pub tourist_id: String,
    pub destination: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, sqlx::FromRow, Serialize)]
pub struct EfirRow {
    pub id: i64,
    pub efir_number: String,
    pub alert_id: Option<i64>,
    pub tourist_id: String,
    pub tx_id: String,
    pub block_hash: String,
    #[serde(skip)]
    pub nonce: String,
    pub tourist_name: String,
    pub tourist_phone: Option<String>,
    pub officer_id: Option<String>,
    pub officer_name: Option<String>,
    pub officer_badge: Option<String>,
    pub source: String,
    pub description: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub witnesses: serde_json::Value,
    pub evidence: serde_json::Value,
    pub incident_timestamp: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, sqlx::FromRow, Serialize)]
pub struct BroadcastRow {
    pub id: i64,
    pub broadcast_number: String,
    pub broadcast_type: String,
    pub center_lat: Option<f64>,
    pub center_lon: Option<f64>,
    pub radius_km: Option<f64>,
    pub zone_id: Option<i64>,
    pub min_lat: Option<f64>,
    pub min_lon: Option<f64>,
    pub max_lat: Option<f64>,
    pub max_lon: Option<f64>,
    pub title: String,
    pub message: String,
    pub severity: String,
    pub sent_by: String,
    pub sent_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub tourists_notified: i32,
    pub devices_notified: i32,
    pub acknowledgment_count: i32,
}

#[derive(Clone, Debug, sqlx::FromRow, Serialize)]
pub struct DeviceRow {
    pub id: i64,
    pub tourist_id: String,
    pub push_token: String,
    pub platform: String,
    pub is_active: bool,
    pub registered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_weights_match_scoring_table() {
        assert_eq!(Severity::Low.weight(), 1);
        assert_eq!(Severity::Medium.weight(), 2);
        assert_eq!(Severity::High.weight(), 3);
        assert_eq!(Severity::Critical.weight(), 4);
    }

    #[test]
    fn severity_ordering_supports_sms_gate() {
        assert!(Severity::High >= Severity::High);
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium < Severity::High);
    }

    #[test]
    fn dedup_applies_only_to_generated_kinds() {
        assert!(AlertKind::Geofence.deduplicated());
        assert!(AlertKind::Sequence.deduplicated());
        assert!(!AlertKind::Panic.deduplicated());
        assert!(!AlertKind::Sos.deduplicated());
        assert!(!AlertKind::Manual.deduplicated());
    }

    #[test]
    fn ack_status_snake_case() {
        assert_eq!(
            serde_json::to_string(&AckStatus::NeedHelp).unwrap(),
            "\"need_help\""
        );
        assert_eq!(AckStatus::NeedHelp.as_str(), "need_help");
    }
}
