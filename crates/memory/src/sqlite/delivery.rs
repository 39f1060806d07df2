//! Notification delivery claims on SQLite.

use async_trait::async_trait;
use chrono::Utc;
use orion_core::error::StoreError;
use orion_core::store::DeliveryLog;

use super::{SqliteStore, ts};

#[async_trait]
impl DeliveryLog for SqliteStore {
    async fn claim(&self, request_id: &str, channel: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO deliveries (request_id, channel, claimed_at) VALUES (?1, ?2, ?3)",
        )
        .bind(request_id)
        .bind(channel)
        .bind(ts(&Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("delivery claim failed: {e}")))?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, request_id: &str, channel: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM deliveries WHERE request_id = ?1 AND channel = ?2")
            .bind(request_id)
            .bind(channel)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("delivery release failed: {e}")))?;
        Ok(())
    }

    async fn delivered(&self, request_id: &str) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar(
            "SELECT channel FROM deliveries WHERE request_id = ?1 ORDER BY channel ASC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("delivered channels: {e}")))
    }
}
