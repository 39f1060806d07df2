//! Failed-request queue on SQLite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orion_core::error::StoreError;
use orion_core::request::{QueuedRequest, UserRequest};
use orion_core::store::{QueueFilter, QueueStats, RequestQueue};
use sqlx::Row;
use tracing::{debug, warn};

use super::{SqliteStore, parse_ts, ts};

const QUEUE_COLUMNS: &str =
    "id, payload, attempts, next_retry_at, terminal, last_error, created_at, updated_at";

impl SqliteStore {
    fn row_to_queued(row: &sqlx::sqlite::SqliteRow) -> Result<QueuedRequest, StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::Query(format!("id column: {e}")))?;
        let payload: String = row
            .try_get("payload")
            .map_err(|e| StoreError::Query(format!("payload column: {e}")))?;
        let attempts: i64 = row
            .try_get("attempts")
            .map_err(|e| StoreError::Query(format!("attempts column: {e}")))?;
        let next_retry_at: String = row
            .try_get("next_retry_at")
            .map_err(|e| StoreError::Query(format!("next_retry_at column: {e}")))?;
        let terminal: i64 = row
            .try_get("terminal")
            .map_err(|e| StoreError::Query(format!("terminal column: {e}")))?;
        let last_error: Option<String> = row
            .try_get("last_error")
            .map_err(|e| StoreError::Query(format!("last_error column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::Query(format!("created_at column: {e}")))?;
        let updated_at: String = row
            .try_get("updated_at")
            .map_err(|e| StoreError::Query(format!("updated_at column: {e}")))?;

        let request: UserRequest = serde_json::from_str(&payload)
            .map_err(|e| StoreError::Corrupt(format!("queue entry {id} payload: {e}")))?;

        Ok(QueuedRequest {
            id,
            request,
            attempts: attempts as u32,
            next_retry_at: parse_ts(&next_retry_at, "next_retry_at")?,
            terminal: terminal != 0,
            last_error,
            created_at: parse_ts(&created_at, "created_at")?,
            updated_at: parse_ts(&updated_at, "updated_at")?,
        })
    }

    /// Decode rows one by one. Undecodable rows are logged and returned by id
    /// instead of failing the whole batch.
    fn decode_queued(
        rows: &[sqlx::sqlite::SqliteRow],
    ) -> (Vec<QueuedRequest>, Vec<(String, String)>) {
        let mut entries = Vec::with_capacity(rows.len());
        let mut corrupt = Vec::new();
        for row in rows {
            match Self::row_to_queued(row) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    let id: Option<String> = row.try_get("id").ok();
                    warn!(request_id = ?id, error = %e, "Skipping undecodable queue entry");
                    if let Some(id) = id {
                        corrupt.push((id, e.to_string()));
                    }
                }
            }
        }
        (entries, corrupt)
    }

    /// Take an undecodable entry out of rotation. The row is kept for inspection.
    async fn quarantine(&self, id: &str, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE failed_requests
            SET terminal = 1, last_error = ?2, updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(format!("unreadable entry: {reason}"))
        .bind(ts(&Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("quarantine failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl RequestQueue for SqliteStore {
    async fn enqueue(
        &self,
        request: UserRequest,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<QueuedRequest, StoreError> {
        let payload = serde_json::to_string(&request)
            .map_err(|e| StoreError::Storage(format!("request serialization: {e}")))?;
        let now = Utc::now();

        // Re-enqueueing the same request resets it rather than duplicating it.
        sqlx::query(
            r#"
            INSERT INTO failed_requests
                (id, session_id, channel, payload, attempts, next_retry_at, terminal, last_error, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 0, ?5, 0, ?6, ?7, ?7)
            ON CONFLICT(id) DO UPDATE SET
                payload = excluded.payload,
                attempts = 0,
                next_retry_at = excluded.next_retry_at,
                terminal = 0,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&request.id)
        .bind(request.session_id.as_str())
        .bind(&request.channel)
        .bind(&payload)
        .bind(ts(&next_retry_at))
        .bind(error)
        .bind(ts(&now))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("enqueue failed: {e}")))?;

        debug!(request_id = %request.id, retry_at = %next_retry_at, "Enqueued failed request");

        Ok(QueuedRequest {
            id: request.id.clone(),
            request,
            attempts: 0,
            next_retry_at,
            terminal: false,
            last_error: Some(error.to_string()),
            created_at: now,
            updated_at: now,
        })
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<QueuedRequest>, StoreError> {
        let sql = format!(
            r#"
            SELECT {QUEUE_COLUMNS} FROM failed_requests
            WHERE terminal = 0 AND next_retry_at <= ?1
            ORDER BY next_retry_at ASC, created_at ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(ts(&now))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("due entries: {e}")))?;

        let (entries, corrupt) = Self::decode_queued(&rows);
        for (id, reason) in corrupt {
            if let Err(e) = self.quarantine(&id, &reason).await {
                warn!(request_id = %id, error = %e, "Failed to quarantine queue entry");
            }
        }
        Ok(entries)
    }

    async fn reschedule(
        &self,
        id: &str,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE failed_requests
            SET attempts = ?2, next_retry_at = ?3, last_error = ?4, updated_at = ?5
            WHERE id = ?1 AND terminal = 0
            "#,
        )
        .bind(id)
        .bind(attempts as i64)
        .bind(ts(&next_retry_at))
        .bind(error)
        .bind(ts(&Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("reschedule failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("pending queue entry {id}")));
        }
        Ok(())
    }

    async fn mark_terminal(&self, id: &str, attempts: u32, error: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE failed_requests
            SET attempts = ?2, terminal = 1, last_error = ?3, updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(attempts as i64)
        .bind(error)
        .bind(ts(&Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("mark terminal failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("queue entry {id}")));
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM failed_requests WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("remove failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: &str) -> Result<Option<QueuedRequest>, StoreError> {
        let sql = format!("SELECT {QUEUE_COLUMNS} FROM failed_requests WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("get entry: {e}")))?;

        row.as_ref().map(Self::row_to_queued).transpose()
    }

    async fn list(&self, filter: QueueFilter) -> Result<Vec<QueuedRequest>, StoreError> {
        let clause = match filter {
            QueueFilter::All => "",
            QueueFilter::Pending => "WHERE terminal = 0",
            QueueFilter::Terminal => "WHERE terminal = 1",
        };
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM failed_requests {clause} ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("list entries: {e}")))?;

        Ok(Self::decode_queued(&rows).0)
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<QueueStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN terminal = 0 THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN terminal = 1 THEN 1 ELSE 0 END), 0) AS terminal,
                COALESCE(SUM(CASE WHEN terminal = 0 AND next_retry_at <= ?1 THEN 1 ELSE 0 END), 0) AS due
            FROM failed_requests
            "#,
        )
        .bind(ts(&now))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("queue stats: {e}")))?;

        let get = |column: &str| -> Result<u64, StoreError> {
            row.try_get::<i64, _>(column)
                .map(|v| v as u64)
                .map_err(|e| StoreError::Query(format!("{column} column: {e}")))
        };

        Ok(QueueStats {
            pending: get("pending")?,
            terminal: get("terminal")?,
            due: get("due")?,
        })
    }

    async fn purge_terminal(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM failed_requests WHERE terminal = 1 AND updated_at < ?1")
            .bind(ts(&before))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("purge terminal: {e}")))?;
        Ok(result.rows_affected())
    }
}
