//! In-memory store — useful for testing and one-shot CLI runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orion_core::error::StoreError;
use orion_core::message::{Message, Role, SessionId, SessionSummary};
use orion_core::request::{QueuedRequest, UserRequest};
use orion_core::store::{
    ConversationStore, DeliveryLog, PrunePolicy, QueueFilter, QueueStats, RequestQueue,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct SessionLog {
    next_seq: u64,
    last_activity: Option<DateTime<Utc>>,
    messages: Vec<Message>,
}

/// Implements every store trait on plain collections. Nothing survives the process.
#[derive(Default)]
pub struct InMemoryStore {
    sessions: Arc<RwLock<BTreeMap<SessionId, SessionLog>>>,
    queue: Arc<RwLock<HashMap<String, QueuedRequest>>>,
    deliveries: Arc<RwLock<HashSet<(String, String)>>>,
    fail_queue_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every queue write fail with a storage error (simulates a full disk).
    pub fn fail_queue_writes(&self, fail: bool) {
        self.fail_queue_writes.store(fail, Ordering::SeqCst);
    }

    fn check_queue_writable(&self) -> Result<(), StoreError> {
        if self.fail_queue_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("queue is not writable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn append(&self, session: &SessionId, mut message: Message) -> Result<Message, StoreError> {
        let mut sessions = self.sessions.write().await;
        let log = sessions.entry(session.clone()).or_default();
        log.next_seq += 1;
        message.seq = log.next_seq;
        log.last_activity = Some(message.timestamp);
        log.messages.push(message.clone());
        Ok(message)
    }

    async fn load(&self, session: &SessionId) -> Result<Vec<Message>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session)
            .map(|log| log.messages.clone())
            .unwrap_or_default())
    }

    async fn load_recent(&self, session: &SessionId, limit: usize) -> Result<Vec<Message>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session)
            .map(|log| {
                let skip = log.messages.len().saturating_sub(limit);
                log.messages[skip..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn has_request(&self, session: &SessionId, request_id: &str) -> Result<bool, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session).is_some_and(|log| {
            log.messages
                .iter()
                .any(|m| m.role == Role::User && m.request_id.as_deref() == Some(request_id))
        }))
    }

    async fn prune(&self, policy: &PrunePolicy) -> Result<u64, StoreError> {
        let cutoff = policy.cutoff(Utc::now());
        let mut removed = 0;
        let mut sessions = self.sessions.write().await;
        for log in sessions.values_mut() {
            let before = log.messages.len();
            if let Some(cutoff) = cutoff {
                log.messages.retain(|m| m.timestamp >= cutoff);
            }
            if let Some(max) = policy.max_messages_per_session {
                let excess = log.messages.len().saturating_sub(max);
                log.messages.drain(..excess);
            }
            removed += (before - log.messages.len()) as u64;
        }
        Ok(removed)
    }

    async fn sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = sessions
            .iter()
            .map(|(id, log)| SessionSummary {
                id: id.clone(),
                message_count: log.messages.len() as u64,
                last_activity: log.last_activity.unwrap_or_else(Utc::now),
            })
            .collect();
        summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(summaries)
    }

    async fn clear(&self, session: &SessionId) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions
            .get_mut(session)
            .map(|log| {
                let count = log.messages.len() as u64;
                log.messages.clear();
                count
            })
            .unwrap_or(0))
    }
}

#[async_trait]
impl RequestQueue for InMemoryStore {
    async fn enqueue(
        &self,
        request: UserRequest,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<QueuedRequest, StoreError> {
        self.check_queue_writable()?;
        let now = Utc::now();
        let mut queue = self.queue.write().await;
        let created_at = queue.get(&request.id).map(|e| e.created_at).unwrap_or(now);
        let entry = QueuedRequest {
            id: request.id.clone(),
            request,
            attempts: 0,
            next_retry_at,
            terminal: false,
            last_error: Some(error.to_string()),
            created_at,
            updated_at: now,
        };
        queue.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<QueuedRequest>, StoreError> {
        let queue = self.queue.read().await;
        let mut due: Vec<QueuedRequest> = queue
            .values()
            .filter(|e| !e.terminal && e.next_retry_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|e| (e.next_retry_at, e.created_at));
        Ok(due)
    }

    async fn reschedule(
        &self,
        id: &str,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        self.check_queue_writable()?;
        let mut queue = self.queue.write().await;
        let entry = queue
            .get_mut(id)
            .filter(|e| !e.terminal)
            .ok_or_else(|| StoreError::NotFound(format!("pending queue entry {id}")))?;
        entry.attempts = attempts;
        entry.next_retry_at = next_retry_at;
        entry.last_error = Some(error.to_string());
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_terminal(&self, id: &str, attempts: u32, error: &str) -> Result<(), StoreError> {
        self.check_queue_writable()?;
        let mut queue = self.queue.write().await;
        let entry = queue
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("queue entry {id}")))?;
        entry.attempts = attempts;
        entry.terminal = true;
        entry.last_error = Some(error.to_string());
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        self.check_queue_writable()?;
        Ok(self.queue.write().await.remove(id).is_some())
    }

    async fn get(&self, id: &str) -> Result<Option<QueuedRequest>, StoreError> {
        Ok(self.queue.read().await.get(id).cloned())
    }

    async fn list(&self, filter: QueueFilter) -> Result<Vec<QueuedRequest>, StoreError> {
        let queue = self.queue.read().await;
        let mut entries: Vec<QueuedRequest> = queue
            .values()
            .filter(|e| match filter {
                QueueFilter::All => true,
                QueueFilter::Pending => !e.terminal,
                QueueFilter::Terminal => e.terminal,
            })
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<QueueStats, StoreError> {
        let queue = self.queue.read().await;
        let mut stats = QueueStats::default();
        for entry in queue.values() {
            if entry.terminal {
                stats.terminal += 1;
            } else {
                stats.pending += 1;
                if entry.next_retry_at <= now {
                    stats.due += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn purge_terminal(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut queue = self.queue.write().await;
        let len_before = queue.len();
        queue.retain(|_, e| !(e.terminal && e.updated_at < before));
        Ok((len_before - queue.len()) as u64)
    }
}

#[async_trait]
impl DeliveryLog for InMemoryStore {
    async fn claim(&self, request_id: &str, channel: &str) -> Result<bool, StoreError> {
        Ok(self
            .deliveries
            .write()
            .await
            .insert((request_id.to_string(), channel.to_string())))
    }

    async fn release(&self, request_id: &str, channel: &str) -> Result<(), StoreError> {
        self.deliveries
            .write()
            .await
            .remove(&(request_id.to_string(), channel.to_string()));
        Ok(())
    }

    async fn delivered(&self, request_id: &str) -> Result<Vec<String>, StoreError> {
        let deliveries = self.deliveries.read().await;
        let mut channels: Vec<String> = deliveries
            .iter()
            .filter(|(id, _)| id == request_id)
            .map(|(_, channel)| channel.clone())
            .collect();
        channels.sort();
        Ok(channels)
    }
}
