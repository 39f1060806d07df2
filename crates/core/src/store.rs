//! Store traits — the durable state of the orchestrator.
//!
//! Three stores survive a restart:
//! - the conversation log, keyed by (session id, sequence number)
//! - the failed-request queue, keyed by request id and queried by retry time
//! - the delivery log, which remembers which channel already got which outcome

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::message::{Message, SessionId, SessionSummary};
use crate::request::{QueuedRequest, UserRequest};

/// Size/age limits applied by [`ConversationStore::prune`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrunePolicy {
    /// Drop messages older than this.
    pub max_age: Option<Duration>,
    /// Keep only the newest N messages of each session.
    pub max_messages_per_session: Option<usize>,
}

impl PrunePolicy {
    pub fn older_than(max_age: Duration) -> Self {
        Self {
            max_age: Some(max_age),
            max_messages_per_session: None,
        }
    }

    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages_per_session = Some(max);
        self
    }

    /// Oldest timestamp that survives, relative to `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.max_age.map(|age| now - age)
    }
}

/// Durable, append-only per-session message log.
///
/// Implementations: SQLite, in-memory (for testing).
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append a message, assigning the next sequence number of the session.
    /// Creates the session on its first message.
    async fn append(
        &self,
        session: &SessionId,
        message: Message,
    ) -> std::result::Result<Message, StoreError>;

    /// All messages of a session in append order.
    async fn load(&self, session: &SessionId) -> std::result::Result<Vec<Message>, StoreError>;

    /// The newest `limit` messages of a session, still in append order.
    async fn load_recent(
        &self,
        session: &SessionId,
        limit: usize,
    ) -> std::result::Result<Vec<Message>, StoreError>;

    /// Whether the user message of `request_id` is already in the session.
    async fn has_request(
        &self,
        session: &SessionId,
        request_id: &str,
    ) -> std::result::Result<bool, StoreError>;

    /// Remove messages per the policy. Sessions themselves are never deleted.
    /// Returns the number of messages removed.
    async fn prune(&self, policy: &PrunePolicy) -> std::result::Result<u64, StoreError>;

    async fn sessions(&self) -> std::result::Result<Vec<SessionSummary>, StoreError>;

    /// Delete every message of one session. Returns the number removed.
    async fn clear(&self, session: &SessionId) -> std::result::Result<u64, StoreError>;

    async fn stats(&self) -> std::result::Result<ConversationStats, StoreError> {
        let sessions = self.sessions().await?;
        Ok(ConversationStats {
            sessions: sessions.len() as u64,
            messages: sessions.iter().map(|s| s.message_count).sum(),
            last_activity: sessions.iter().map(|s| s.last_activity).max(),
        })
    }
}

/// Totals across the whole conversation log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationStats {
    pub sessions: u64,
    pub messages: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Which queue entries to list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueFilter {
    #[default]
    All,
    Pending,
    Terminal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub terminal: u64,
    /// Pending entries whose retry time has passed
    pub due: u64,
}

/// Durable store of requests awaiting a delayed retry.
#[async_trait]
pub trait RequestQueue: Send + Sync {
    /// Persist a failed request with zero attempts.
    async fn enqueue(
        &self,
        request: UserRequest,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> std::result::Result<QueuedRequest, StoreError>;

    /// Non-terminal entries whose retry time is at or before `now`, oldest first.
    async fn due(&self, now: DateTime<Utc>) -> std::result::Result<Vec<QueuedRequest>, StoreError>;

    async fn reschedule(
        &self,
        id: &str,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> std::result::Result<(), StoreError>;

    /// Give up on an entry. It stays in the queue for auditing.
    async fn mark_terminal(
        &self,
        id: &str,
        attempts: u32,
        error: &str,
    ) -> std::result::Result<(), StoreError>;

    /// Returns whether an entry was removed.
    async fn remove(&self, id: &str) -> std::result::Result<bool, StoreError>;

    async fn get(&self, id: &str) -> std::result::Result<Option<QueuedRequest>, StoreError>;

    async fn list(&self, filter: QueueFilter) -> std::result::Result<Vec<QueuedRequest>, StoreError>;

    async fn stats(&self, now: DateTime<Utc>) -> std::result::Result<QueueStats, StoreError>;

    /// Delete terminal entries last touched before `before`.
    async fn purge_terminal(&self, before: DateTime<Utc>) -> std::result::Result<u64, StoreError>;
}

/// Durable record of which channels already received a request's outcome.
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    /// Atomically claim the right to deliver. `false` means someone already did.
    async fn claim(&self, request_id: &str, channel: &str) -> std::result::Result<bool, StoreError>;

    /// Undo a claim after a failed send so a later attempt can deliver.
    async fn release(&self, request_id: &str, channel: &str) -> std::result::Result<(), StoreError>;

    /// Channels that hold a claim for this request.
    async fn delivered(&self, request_id: &str) -> std::result::Result<Vec<String>, StoreError>;
}
