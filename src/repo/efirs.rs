//! E-FIR rows. Insert-only; nothing here issues UPDATE against `efirs`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::EfirRow;

/// Advisory lock key serializing E-FIR issuance across all instances.
const EFIR_CHAIN_LOCK: i64 = 0x5348_4546_4952;

pub struct NewEfir<'a> {
    pub efir_number: String,
    pub alert_id: Option<i64>,
    pub tourist_id: &'a str,
    pub tx_id: String,
    pub block_hash: String,
    pub nonce: String,
    pub tourist_name: &'a str,
    pub tourist_phone: Option<&'a str>,
    pub officer_id: Option<&'a str>,
    pub officer_name: Option<&'a str>,
    pub officer_badge: Option<&'a str>,
    pub source: &'a str,
    pub description: &'a str,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub witnesses: serde_json::Value,
    pub evidence: serde_json::Value,
    pub incident_timestamp: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
}

/// Take the chain lock for the current transaction. Released automatically
/// at commit/rollback.
pub async fn lock_chain(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(EFIR_CHAIN_LOCK)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Block hash of the most recently issued E-FIR, if any.
pub async fn latest_block_hash(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT block_hash FROM efirs ORDER BY id DESC LIMIT 1")
            .fetch_optional(&mut **tx)
            .await?;
    Ok(row.map(|(h,)| h))
}

pub async fn insert(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    new: &NewEfir<'_>,
) -> Result<EfirRow, sqlx::Error> {
    sqlx::query_as::<_, EfirRow>(
        r#"
        INSERT INTO efirs
            (efir_number, alert_id, tourist_id, tx_id, block_hash, nonce,
             tourist_name, tourist_phone, officer_id, officer_name, officer_badge,
             source, description, lat, lon, witnesses, evidence,
             incident_timestamp, generated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                $12, $13, $14, $15, $16, $17, $18, $19)
        RETURNING *
        "#,
    )
    .bind(&new.efir_number)
    .bind(new.alert_id)
    .bind(new.tourist_id)
    .bind(&new.tx_id)
    .bind(&new.block_hash)
    .bind(&new.nonce)
    .bind(new.tourist_name)
    .bind(new.tourist_phone)
    .bind(new.officer_id)
    .bind(new.officer_name)
    .bind(new.officer_badge)
    .bind(new.source)
    .bind(new.description)
    .bind(new.lat)
    .bind(new.lon)
    .bind(&new.witnesses)
    .bind(&new.evidence)
    .bind(new.incident_timestamp)
    .bind(new.generated_at)
    .fetch_one(&mut **tx)
    .await
}

pub async fn fetch_by_tx_id(pool: &PgPool, tx_id: &str) -> Result<Option<EfirRow>, sqlx::Error> {
    sqlx::query_as::<_, EfirRow>("SELECT * FROM efirs WHERE tx_id = $1")
        .bind(tx_id)
        .fetch_optional(pool)
        .await
}

/// The record issued immediately before the given one, in chain order.
pub async fn predecessor(pool: &PgPool, id: i64) -> Result<Option<EfirRow>, sqlx::Error> {
    sqlx::query_as::<_, EfirRow>(
        "SELECT * FROM efirs WHERE id < $1 ORDER BY id DESC LIMIT 1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}
