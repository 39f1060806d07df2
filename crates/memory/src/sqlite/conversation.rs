//! Conversation log on SQLite.

use async_trait::async_trait;
use orion_core::error::StoreError;
use orion_core::message::{Message, Role, SessionId, SessionSummary};
use orion_core::store::{ConversationStore, PrunePolicy};
use sqlx::Row;
use tracing::debug;

use super::{SqliteStore, parse_ts, ts};

const MESSAGE_COLUMNS: &str = "seq, role, content, tool_call, request_id, created_at";

impl SqliteStore {
    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StoreError> {
        let seq: i64 = row
            .try_get("seq")
            .map_err(|e| StoreError::Query(format!("seq column: {e}")))?;
        let role: String = row
            .try_get("role")
            .map_err(|e| StoreError::Query(format!("role column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| StoreError::Query(format!("content column: {e}")))?;
        let tool_call: Option<String> = row
            .try_get("tool_call")
            .map_err(|e| StoreError::Query(format!("tool_call column: {e}")))?;
        let request_id: Option<String> = row
            .try_get("request_id")
            .map_err(|e| StoreError::Query(format!("request_id column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::Query(format!("created_at column: {e}")))?;

        let role = Role::parse(&role)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown role '{role}'")))?;
        let tool_call = tool_call
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("tool_call payload: {e}")))?;

        Ok(Message {
            seq: seq as u64,
            role,
            content,
            tool_call,
            request_id,
            timestamp: parse_ts(&created_at, "created_at")?,
        })
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn append(&self, session: &SessionId, mut message: Message) -> Result<Message, StoreError> {
        let created_at = ts(&message.timestamp);
        let tool_call = message
            .tool_call
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Storage(format!("tool_call serialization: {e}")))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("BEGIN failed: {e}")))?;

        // Claiming the sequence number and inserting happen in one transaction,
        // so concurrent appends to a session can never share or skip a number.
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sessions (id, created_at, last_activity, next_seq)
            VALUES (?1, ?2, ?2, 2)
            ON CONFLICT(id) DO UPDATE SET
                next_seq = next_seq + 1,
                last_activity = excluded.last_activity
            RETURNING next_seq - 1
            "#,
        )
        .bind(session.as_str())
        .bind(&created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("session upsert failed: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO messages (session_id, seq, role, content, tool_call, request_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(session.as_str())
        .bind(seq)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&tool_call)
        .bind(&message.request_id)
        .bind(&created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT message failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("COMMIT failed: {e}")))?;

        message.seq = seq as u64;
        debug!(session_id = %session, seq, role = message.role.as_str(), "Appended message");
        Ok(message)
    }

    async fn load(&self, session: &SessionId) -> Result<Vec<Message>, StoreError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ?1 ORDER BY seq ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(session.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("load session: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn load_recent(&self, session: &SessionId, limit: usize) -> Result<Vec<Message>, StoreError> {
        let sql = format!(
            r#"
            SELECT * FROM (
                SELECT {MESSAGE_COLUMNS} FROM messages
                WHERE session_id = ?1
                ORDER BY seq DESC
                LIMIT ?2
            ) ORDER BY seq ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(session.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("load recent: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn has_request(&self, session: &SessionId, request_id: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM messages WHERE session_id = ?1 AND request_id = ?2 AND role = ?3 LIMIT 1",
        )
        .bind(session.as_str())
        .bind(request_id)
        .bind(Role::User.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("request lookup: {e}")))?;
        Ok(found.is_some())
    }

    async fn prune(&self, policy: &PrunePolicy) -> Result<u64, StoreError> {
        let mut removed = 0;

        if let Some(cutoff) = policy.cutoff(chrono::Utc::now()) {
            let result = sqlx::query("DELETE FROM messages WHERE created_at < ?1")
                .bind(ts(&cutoff))
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Storage(format!("prune by age: {e}")))?;
            removed += result.rows_affected();
        }

        if let Some(max) = policy.max_messages_per_session {
            let result = sqlx::query(
                r#"
                DELETE FROM messages WHERE rowid IN (
                    SELECT rowid FROM (
                        SELECT rowid,
                               ROW_NUMBER() OVER (PARTITION BY session_id ORDER BY seq DESC) AS rn
                        FROM messages
                    ) WHERE rn > ?1
                )
                "#,
            )
            .bind(max as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("prune by size: {e}")))?;
            removed += result.rows_affected();
        }

        debug!(removed, "Pruned conversation log");
        Ok(removed)
    }

    async fn sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.last_activity, COUNT(m.seq) AS message_count
            FROM sessions s
            LEFT JOIN messages m ON m.session_id = s.id
            GROUP BY s.id
            ORDER BY s.last_activity DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("list sessions: {e}")))?;

        rows.iter()
            .map(|row| {
                let id: String = row
                    .try_get("id")
                    .map_err(|e| StoreError::Query(format!("id column: {e}")))?;
                let last_activity: String = row
                    .try_get("last_activity")
                    .map_err(|e| StoreError::Query(format!("last_activity column: {e}")))?;
                let count: i64 = row
                    .try_get("message_count")
                    .map_err(|e| StoreError::Query(format!("message_count column: {e}")))?;
                Ok(SessionSummary {
                    id: SessionId(id),
                    message_count: count as u64,
                    last_activity: parse_ts(&last_activity, "last_activity")?,
                })
            })
            .collect()
    }

    async fn clear(&self, session: &SessionId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE session_id = ?1")
            .bind(session.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("clear session: {e}")))?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use orion_core::tool::{ToolArguments, ToolInvocation};
    use std::sync::Arc;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn append_assigns_increasing_sequence() {
        let store = test_store().await;
        let session = SessionId::from("cli:me");

        let first = store.append(&session, Message::user("one")).await.unwrap();
        let second = store.append(&session, Message::assistant("two")).await.unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);

        let loaded = store.load(&session).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].content, "one");
        assert_eq!(loaded[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn tool_call_payload_round_trips() {
        let store = test_store().await;
        let session = SessionId::from("cli:me");
        let mut args = ToolArguments::new();
        args.insert("expression".into(), serde_json::json!("2+2"));
        let call = ToolInvocation::new("calculator", args);

        store
            .append(&session, Message::tool_result(call.clone(), "4").for_request("r1"))
            .await
            .unwrap();

        let loaded = store.load(&session).await.unwrap();
        assert_eq!(loaded[0].tool_call.as_ref(), Some(&call));
        assert_eq!(loaded[0].request_id.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn sessions_do_not_share_sequences() {
        let store = test_store().await;
        let a = SessionId::from("a");
        let b = SessionId::from("b");
        store.append(&a, Message::user("a1")).await.unwrap();
        let b1 = store.append(&b, Message::user("b1")).await.unwrap();
        let a2 = store.append(&a, Message::user("a2")).await.unwrap();
        assert_eq!(b1.seq, 1);
        assert_eq!(a2.seq, 2);
    }

    #[tokio::test]
    async fn has_request_looks_up_the_user_message() {
        let store = test_store().await;
        let session = SessionId::from("s");
        store
            .append(&session, Message::user("q").for_request("r1"))
            .await
            .unwrap();
        store
            .append(&session, Message::assistant("a").for_request("r2"))
            .await
            .unwrap();
        assert!(store.has_request(&session, "r1").await.unwrap());
        assert!(!store.has_request(&session, "r2").await.unwrap());
        assert!(!store.has_request(&SessionId::from("other"), "r1").await.unwrap());
    }

    #[tokio::test]
    async fn load_recent_keeps_order() {
        let store = test_store().await;
        let session = SessionId::from("s");
        for i in 1..=5 {
            store.append(&session, Message::user(format!("m{i}"))).await.unwrap();
        }
        let recent = store.load_recent(&session, 2).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m5"]);
    }

    #[tokio::test]
    async fn prune_by_age_and_size() {
        let store = test_store().await;
        let session = SessionId::from("s");

        let mut old = Message::user("ancient");
        old.timestamp = Utc::now() - Duration::days(40);
        store.append(&session, old).await.unwrap();
        for i in 0..4 {
            store.append(&session, Message::user(format!("new{i}"))).await.unwrap();
        }

        let removed = store
            .prune(&PrunePolicy::older_than(Duration::days(30)).with_max_messages(2))
            .await
            .unwrap();
        assert_eq!(removed, 3);

        let left = store.load(&session).await.unwrap();
        let contents: Vec<_> = left.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["new2", "new3"]);

        // Session survives pruning and keeps numbering forward.
        let next = store.append(&session, Message::user("after")).await.unwrap();
        assert_eq!(next.seq, 6);
    }

    #[tokio::test]
    async fn sessions_listing_and_clear() {
        let store = test_store().await;
        let session = SessionId::from("telegram:42");
        store.append(&session, Message::user("hi")).await.unwrap();
        store.append(&session, Message::assistant("hello")).await.unwrap();

        let sessions = store.sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].message_count, 2);

        assert_eq!(store.clear(&session).await.unwrap(), 2);
        assert!(store.load(&session).await.unwrap().is_empty());
        assert_eq!(store.sessions().await.unwrap()[0].message_count, 0);
    }

    #[tokio::test]
    async fn concurrent_appends_keep_per_session_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(&dir.path().join("log.sqlite")).await.unwrap());

        let mut handles = Vec::new();
        for name in ["a", "b"] {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let session = SessionId::from(name);
                for i in 0..20 {
                    store
                        .append(&session, Message::user(format!("{name}{i}")))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for name in ["a", "b"] {
            let messages = store.load(&SessionId::from(name)).await.unwrap();
            assert_eq!(messages.len(), 20);
            for (i, m) in messages.iter().enumerate() {
                assert_eq!(m.seq, i as u64 + 1);
                assert_eq!(m.content, format!("{name}{i}"));
            }
        }
    }

    #[tokio::test]
    async fn log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.sqlite");
        let session = SessionId::from("s");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.append(&session, Message::user("persisted")).await.unwrap();
            store.close().await;
        }
        let store = SqliteStore::open(&path).await.unwrap();
        let loaded = store.load(&session).await.unwrap();
        assert_eq!(loaded[0].content, "persisted");
    }
}
