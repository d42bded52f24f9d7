//! E-FIR issuance and verification.
//!
//! Every record carries `tx_id = sha256(canonical || nonce)` and
//! `block_hash = sha256(tx_id || prev_block_hash || canonical_ts)`, chaining
//! issuance into a tamper-evident log. Issuance is serialized through a
//! Postgres advisory lock so two simultaneous filings chain correctly; the
//! chain imposes a total order on issuance and nothing else.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::{error, info};

use crate::error::{ApiError, ApiResult};
use crate::models::{EfirRow, Tourist};
use crate::repo;

/// Chain seed for the first record. Part of the deployed artifact; changing
/// it invalidates every existing chain.
pub const GENESIS_BLOCK_HASH: &str = "safehorizon-efir-genesis";

/// Validated filing input, assembled by the handler.
pub struct EfirRequest {
    pub alert_id: Option<i64>,
    pub description: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub witnesses: Vec<String>,
    pub evidence: Vec<String>,
    pub incident_timestamp: DateTime<Utc>,
    /// Present when an authority files on a tourist's behalf.
    pub officer: Option<OfficerSnapshot>,
}

#[derive(Clone)]
pub struct OfficerSnapshot {
    pub id: String,
    pub name: String,
    pub badge_number: String,
}

/// Canonical byte representation. JSON with a fixed field order; strings are
/// escaped, so field boundaries cannot be forged from user content.
#[derive(Serialize)]
struct Canonical<'a> {
    alert_id: Option<i64>,
    tourist_id: &'a str,
    tourist_name: &'a str,
    tourist_phone: Option<&'a str>,
    officer_id: Option<&'a str>,
    officer_name: Option<&'a str>,
    officer_badge: Option<&'a str>,
    source: &'a str,
    description: &'a str,
    lat: Option<f64>,
    lon: Option<f64>,
    witnesses: &'a serde_json::Value,
    evidence: &'a serde_json::Value,
    incident_ts_micros: i64,
}

fn canonical_for_row(row: &EfirRow) -> Vec<u8> {
    let canonical = Canonical {
        alert_id: row.alert_id,
        tourist_id: &row.tourist_id,
        tourist_name: &row.tourist_name,
        tourist_phone: row.tourist_phone.as_deref(),
        officer_id: row.officer_id.as_deref(),
        officer_name: row.officer_name.as_deref(),
        officer_badge: row.officer_badge.as_deref(),
        source: &row.source,
        description: &row.description,
        lat: row.lat,
        lon: row.lon,
        witnesses: &row.witnesses,
        evidence: &row.evidence,
        incident_ts_micros: row.incident_timestamp.timestamp_micros(),
    };
    serde_json::to_vec(&canonical).expect("canonical serialization cannot fail")
}

fn compute_tx_id(canonical: &[u8], nonce: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(canonical);
    h.update(nonce);
    hex::encode(h.finalize())
}

fn compute_block_hash(tx_id: &str, prev_block_hash: &str, canonical_ts_micros: i64) -> String {
    let mut h = Sha256::new();
    h.update(tx_id.as_bytes());
    h.update(prev_block_hash.as_bytes());
    h.update(canonical_ts_micros.to_string().as_bytes());
    hex::encode(h.finalize())
}

fn fresh_nonce() -> [u8; 16] {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Issue an E-FIR for the given tourist. The whole of number allocation,
/// chain linkage, and insert happens inside one advisory-locked transaction.
pub async fn issue(pool: &PgPool, tourist: &Tourist, req: EfirRequest) -> ApiResult<EfirRow> {
    let mut tx = pool.begin().await.map_err(ApiError::from)?;
    repo::efirs::lock_chain(&mut tx).await?;

    let seq = repo::next_daily_seq(&mut *tx, "efir").await?;
    let generated_at = Utc::now();
    let efir_number = repo::artifact_number("EFIR", generated_at.date_naive(), seq);
    let prev_block_hash = repo::efirs::latest_block_hash(&mut tx)
        .await?
        .unwrap_or_else(|| GENESIS_BLOCK_HASH.to_string());

    let source = if req.officer.is_some() { "authority" } else { "tourist" };
    let witnesses = serde_json::Value::from(req.witnesses);
    let evidence = serde_json::Value::from(req.evidence);

    // Build the canonical bytes from exactly what will be persisted.
    let staged = EfirRow {
        id: 0,
        efir_number: efir_number.clone(),
        alert_id: req.alert_id,
        tourist_id: tourist.id.clone(),
        tx_id: String::new(),
        block_hash: String::new(),
        nonce: String::new(),
        tourist_name: tourist.name.clone(),
        tourist_phone: tourist.phone.clone(),
        officer_id: req.officer.as_ref().map(|o| o.id.clone()),
        officer_name: req.officer.as_ref().map(|o| o.name.clone()),
        officer_badge: req.officer.as_ref().map(|o| o.badge_number.clone()),
        source: source.to_string(),
        description: req.description,
        lat: req.lat,
        lon: req.lon,
        witnesses,
        evidence,
        incident_timestamp: req.incident_timestamp,
        generated_at,
    };
    let canonical = canonical_for_row(&staged);
    let nonce = fresh_nonce();
    let tx_id = compute_tx_id(&canonical, &nonce);
    let block_hash = compute_block_hash(&tx_id, &prev_block_hash, generated_at.timestamp_micros());

    let row = repo::efirs::insert(
        &mut tx,
        &repo::efirs::NewEfir {
            efir_number,
            alert_id: staged.alert_id,
            tourist_id: &staged.tourist_id,
            tx_id,
            block_hash,
            nonce: hex::encode(nonce),
            tourist_name: &staged.tourist_name,
            tourist_phone: staged.tourist_phone.as_deref(),
            officer_id: staged.officer_id.as_deref(),
            officer_name: staged.officer_name.as_deref(),
            officer_badge: staged.officer_badge.as_deref(),
            source,
            description: &staged.description,
            lat: staged.lat,
            lon: staged.lon,
            witnesses: staged.witnesses.clone(),
            evidence: staged.evidence.clone(),
            incident_timestamp: staged.incident_timestamp,
            generated_at,
        },
    )
    .await?;
    tx.commit().await.map_err(ApiError::from)?;

    info!(efir_number = %row.efir_number, tourist = %row.tourist_id, "efir_issued");
    Ok(row)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyFailure {
    ContentHashMismatch,
    ChainMismatch,
}

impl VerifyFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyFailure::ContentHashMismatch => "content_hash_mismatch",
            VerifyFailure::ChainMismatch => "chain_mismatch",
        }
    }
}

/// Recompute both hashes of a stored record against its predecessor's
/// block hash. Pure; used by `verify` and directly by tests.
pub fn check_row(row: &EfirRow, prev_block_hash: &str) -> Result<(), VerifyFailure> {
    let canonical = canonical_for_row(row);
    let nonce = hex::decode(&row.nonce).map_err(|_| VerifyFailure::ContentHashMismatch)?;
    if compute_tx_id(&canonical, &nonce) != row.tx_id {
        return Err(VerifyFailure::ContentHashMismatch);
    }
    let expect =
        compute_block_hash(&row.tx_id, prev_block_hash, row.generated_at.timestamp_micros());
    if expect != row.block_hash {
        return Err(VerifyFailure::ChainMismatch);
    }
    Ok(())
}

pub struct Verification {
    pub efir_number: String,
    pub outcome: Result<(), VerifyFailure>,
}

/// Verify the record with the given tx id. A failed verification is an
/// invariant violation: it pages the operator via the error log.
pub async fn verify(pool: &PgPool, tx_id: &str) -> ApiResult<Verification> {
    let row = repo::efirs::fetch_by_tx_id(pool, tx_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let prev = repo::efirs::predecessor(pool, row.id).await?;
    let prev_hash = prev
        .map(|p| p.block_hash)
        .unwrap_or_else(|| GENESIS_BLOCK_HASH.to_string());

    let outcome = check_row(&row, &prev_hash);
    if let Err(failure) = outcome {
        error!(
            efir_number = %row.efir_number,
            reason = failure.as_str(),
            "efir_verification_failed — possible tampering"
        );
    }
    Ok(Verification { efir_number: row.efir_number, outcome })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_row(id: i64, description: &str, prev_block_hash: &str) -> EfirRow {
        let generated_at = Utc::now();
        let mut row = EfirRow {
            id,
            efir_number: format!("EFIR-20260801-{id:04}"),
            alert_id: Some(10 + id),
            tourist_id: "T1".into(),
            tx_id: String::new(),
            block_hash: String::new(),
            nonce: hex::encode(fresh_nonce()),
            tourist_name: "Asha Verma".into(),
            tourist_phone: Some("+91-98x".into()),
            officer_id: None,
            officer_name: None,
            officer_badge: None,
            source: "tourist".into(),
            description: description.into(),
            lat: Some(28.6139),
            lon: Some(77.2090),
            witnesses: json!(["w1"]),
            evidence: json!([]),
            incident_timestamp: generated_at,
            generated_at,
        };
        let canonical = canonical_for_row(&row);
        let nonce = hex::decode(&row.nonce).unwrap();
        row.tx_id = compute_tx_id(&canonical, &nonce);
        row.block_hash =
            compute_block_hash(&row.tx_id, prev_block_hash, generated_at.timestamp_micros());
        row
    }

    #[test]
    fn fresh_record_verifies() {
        let row = make_row(1, "stolen bag", GENESIS_BLOCK_HASH);
        assert_eq!(check_row(&row, GENESIS_BLOCK_HASH), Ok(()));
    }

    #[test]
    fn hashes_are_hex_sha256() {
        let row = make_row(1, "x", GENESIS_BLOCK_HASH);
        assert_eq!(row.tx_id.len(), 64);
        assert_eq!(row.block_hash.len(), 64);
        assert!(row.tx_id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn content_tamper_is_detected_and_chain_survives() {
        let e1 = make_row(1, "first", GENESIS_BLOCK_HASH);
        let mut e2 = make_row(2, "second", &e1.block_hash);
        let e3 = make_row(3, "third", &e2.block_hash);

        // Corrupt E2's description after issuance.
        e2.description = "second (edited)".into();

        assert_eq!(check_row(&e1, GENESIS_BLOCK_HASH), Ok(()));
        assert_eq!(
            check_row(&e2, &e1.block_hash),
            Err(VerifyFailure::ContentHashMismatch)
        );
        // E3 chained from E2's original stored hashes, which are untouched.
        assert_eq!(check_row(&e3, &e2.block_hash), Ok(()));
    }

    #[test]
    fn broken_link_is_chain_mismatch() {
        let e1 = make_row(1, "first", GENESIS_BLOCK_HASH);
        let e2 = make_row(2, "second", &e1.block_hash);
        // Verifying E2 against the wrong predecessor hash.
        assert_eq!(
            check_row(&e2, GENESIS_BLOCK_HASH),
            Err(VerifyFailure::ChainMismatch)
        );
    }

    #[test]
    fn nonce_makes_tx_ids_distinct_for_equal_content() {
        let canonical = b"same content";
        let a = compute_tx_id(canonical, &fresh_nonce());
        let b = compute_tx_id(canonical, &fresh_nonce());
        assert_ne!(a, b);
    }

    #[test]
    fn canonical_is_field_order_stable() {
        let row = make_row(1, "desc", GENESIS_BLOCK_HASH);
        assert_eq!(canonical_for_row(&row), canonical_for_row(&row));
        let s = String::from_utf8(canonical_for_row(&row)).unwrap();
        // tourist snapshot precedes payload fields in the byte layout
        assert!(s.find("tourist_name").unwrap() < s.find("description").unwrap());
    }

    #[test]
    fn officer_snapshot_changes_canonical() {
        let plain = make_row(1, "desc", GENESIS_BLOCK_HASH);
        let mut filed = plain.clone();
        filed.officer_id = Some("A1".into());
        filed.officer_name = Some("Insp. Rao".into());
        filed.officer_badge = Some("B-771".into());
        filed.source = "authority".into();
        assert_ne!(canonical_for_row(&plain), canonical_for_row(&filed));
    }
}
