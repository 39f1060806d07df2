//! SQLite backend for all durable orchestrator state.
//!
//! One database file, four tables:
//! - `sessions` — one row per session, hands out sequence numbers
//! - `messages` — the conversation log, keyed by (session_id, seq)
//! - `failed_requests` — the retry queue, indexed by retry time
//! - `deliveries` — (request_id, channel) claims for notification dedup
//!
//! Timestamps are stored as fixed-width RFC 3339 strings so that string
//! comparison matches time order.

mod conversation;
mod delivery;
mod queue;

use chrono::{DateTime, SecondsFormat, Utc};
use orion_core::error::StoreError;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// A SQLite store implementing `ConversationStore`, `RequestQueue` and `DeliveryLog`.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open a store from a connection string or file path.
    ///
    /// The database and all tables/indexes are created automatically.
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?;
        // Shared-cache memory databases lock whole tables; keep them on one connection.
        let max_connections = if url.contains(":memory:") { 1 } else { 4 };
        let store = Self::connect(options, max_connections).await?;
        info!("SQLite store initialized at {url}");
        Ok(store)
    }

    /// Open (or create) the database file at `path`, creating parent directories.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Storage(format!("Cannot create {}: {e}", parent.display()))
            })?;
        }
        let options = SqliteConnectOptions::new().filename(path);
        let store = Self::connect(options, 4).await?;
        info!("SQLite store initialized at {}", path.display());
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn connect(options: SqliteConnectOptions, max_connections: u32) -> Result<Self, StoreError> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        Self::from_pool(pool).await
    }

    /// Close the pool, flushing WAL contents to the main file.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run schema migrations.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id            TEXT PRIMARY KEY,
                created_at    TEXT NOT NULL,
                last_activity TEXT NOT NULL,
                next_seq      INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Migration(format!("sessions table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                session_id  TEXT NOT NULL,
                seq         INTEGER NOT NULL,
                role        TEXT NOT NULL,
                content     TEXT NOT NULL,
                tool_call   TEXT,
                request_id  TEXT,
                created_at  TEXT NOT NULL,
                PRIMARY KEY (session_id, seq)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Migration(format!("messages table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(format!("messages index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_request ON messages(session_id, request_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Migration(format!("messages request index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS failed_requests (
                id            TEXT PRIMARY KEY,
                session_id    TEXT NOT NULL,
                channel       TEXT NOT NULL,
                payload       TEXT NOT NULL,
                attempts      INTEGER NOT NULL DEFAULT 0,
                next_retry_at TEXT NOT NULL,
                terminal      INTEGER NOT NULL DEFAULT 0,
                last_error    TEXT,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Migration(format!("failed_requests table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_failed_requests_due ON failed_requests(terminal, next_retry_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Migration(format!("failed_requests index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deliveries (
                request_id  TEXT NOT NULL,
                channel     TEXT NOT NULL,
                claimed_at  TEXT NOT NULL,
                PRIMARY KEY (request_id, channel)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Migration(format!("deliveries table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }
}

/// Fixed-width UTC timestamp; lexical order equals time order.
pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(value: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("{column} '{value}': {e}")))
}
