/// Request record persistence operations
///
/// One row per unique request fingerprint. `put_if_absent` is the dedup
/// primitive: an atomic `INSERT OR IGNORE` against the primary key, with
/// the affected-row count telling the caller whether it won the race.
use anyhow::{Context, Result};
use sdk::errors::truncate_cause;
use sdk::types::{RequestRecord, RequestStatus};
use sqlx::{Row, SqlitePool};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bound on the persisted human-readable failure cause
pub const MAX_FAILURE_CAUSE_CHARS: usize = 1000;

/// Request repository for database operations
pub struct RequestRepository {
    pool: SqlitePool,
}

impl RequestRepository {
    /// Create a new request repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a record unless one already exists for the fingerprint.
    ///
    /// Returns true iff this call created the row. Losing the race (or a
    /// pre-existing record) returns false with no mutation.
    pub async fn put_if_absent(&self, record: &RequestRecord) -> Result<bool> {
        let result_json =
            serde_json::to_string(&record.result).context("Failed to serialize result payload")?;

        let outcome = sqlx::query(
            "INSERT OR IGNORE INTO requests \
             (fingerprint, correlation_id, status, result, narrative, failure_cause, created_at, updated_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.fingerprint)
        .bind(&record.correlation_id)
        .bind(record.status.as_str())
        .bind(result_json)
        .bind(&record.narrative)
        .bind(&record.failure_cause)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert request record")?;

        Ok(outcome.rows_affected() == 1)
    }

    /// Get a record by fingerprint
    pub async fn get(&self, fingerprint: &str) -> Result<Option<RequestRecord>> {
        let row = sqlx::query(
            "SELECT fingerprint, correlation_id, status, result, narrative, failure_cause, \
             created_at, updated_at, expires_at \
             FROM requests WHERE fingerprint = ?",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch request record")?;

        row.map(|r| {
            let result_json: String = r.get("result");
            let result = serde_json::from_str(&result_json)
                .context("Failed to deserialize result payload")?;

            Ok(RequestRecord {
                fingerprint: r.get("fingerprint"),
                correlation_id: r.get("correlation_id"),
                status: RequestStatus::from_str_lossy(&r.get::<String, _>("status")),
                result,
                narrative: r.get("narrative"),
                failure_cause: r.get("failure_cause"),
                created_at: r.get("created_at"),
                updated_at: r.get("updated_at"),
                expires_at: r.get("expires_at"),
            })
        })
        .transpose()
    }

    /// Mark a request completed, attaching the synthesized narrative
    pub async fn mark_completed(&self, fingerprint: &str, narrative: &str) -> Result<()> {
        let now = unix_now()?;

        sqlx::query(
            "UPDATE requests SET status = ?, narrative = ?, updated_at = ? WHERE fingerprint = ?",
        )
        .bind(RequestStatus::Completed.as_str())
        .bind(narrative)
        .bind(now)
        .bind(fingerprint)
        .execute(&self.pool)
        .await
        .context("Failed to mark request completed")?;

        Ok(())
    }

    /// Mark a request failed with a truncated human-readable cause
    ///
    /// The cause is bounded to `MAX_FAILURE_CAUSE_CHARS`; raw stack data
    /// never reaches the stored record.
    pub async fn mark_failed(&self, fingerprint: &str, cause: &str) -> Result<()> {
        let now = unix_now()?;
        let cause = truncate_cause(cause, MAX_FAILURE_CAUSE_CHARS);

        sqlx::query(
            "UPDATE requests SET status = ?, failure_cause = ?, updated_at = ? WHERE fingerprint = ?",
        )
        .bind(RequestStatus::Failed.as_str())
        .bind(cause)
        .bind(now)
        .bind(fingerprint)
        .execute(&self.pool)
        .await
        .context("Failed to mark request failed")?;

        Ok(())
    }

    /// Delete records past their advisory expiry (cleanup)
    pub async fn delete_expired(&self) -> Result<u64> {
        let now = unix_now()?;

        let result = sqlx::query("DELETE FROM requests WHERE expires_at IS NOT NULL AND expires_at < ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .context("Failed to delete expired requests")?;

        Ok(result.rows_affected())
    }
}

/// Current unix time in seconds
pub fn unix_now() -> Result<i64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("System clock before unix epoch")?
        .as_secs() as i64)
}
