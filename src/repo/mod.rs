//! One repository module per entity. Plain SQL via sqlx; relationships are
//! resolved with explicit joins, never lazy loading. Geospatial filters use
//! a bounding-box prefilter in SQL and exact great-circle math in the
//! caller.

pub mod alerts;
pub mod authorities;
pub mod broadcasts;
pub mod devices;
pub mod efirs;
pub mod incidents;
pub mod locations;
pub mod tourists;
pub mod trips;
pub mod zones;

use sqlx::postgres::PgRow;
use sqlx::Row;

/// Whether a sqlx error is a unique-index violation (SQLSTATE 23505).
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

/// Allocate the next per-day sequence for numbered artifacts
/// (EFIR-/INC-/BCAST-). Atomic upsert; gap-free within a day.
pub async fn next_daily_seq<'e, E>(executor: E, scope: &str) -> Result<i32, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let row: PgRow = sqlx::query(
        r#"
        INSERT INTO daily_counters (scope, day, last_seq)
        VALUES ($1, CURRENT_DATE, 1)
        ON CONFLICT (scope, day)
        DO UPDATE SET last_seq = daily_counters.last_seq + 1
        RETURNING last_seq
        "#,
    )
    .bind(scope)
    .fetch_one(executor)
    .await?;
    row.try_get(0)
}

/// Format a numbered artifact id like `EFIR-20260801-0007`.
pub fn artifact_number(prefix: &str, day: chrono::NaiveDate, seq: i32) -> String {
    format!("{prefix}-{}-{seq:04}", day.format("%Y%m%d"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_number_format() {
        let day = chrono::NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        assert_eq!(artifact_number("EFIR", day, 7), "EFIR-20260801-0007");
        assert_eq!(artifact_number("BCAST", day, 1234), "BCAST-20260801-1234");
        // Sequences past 9999 keep their digits rather than wrapping.
        assert_eq!(artifact_number("INC", day, 10001), "INC-20260801-10001");
    }
}
