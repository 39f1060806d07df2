//! Periodic housekeeping, kept off the request path.
//!
//! Prunes the conversation log by age and size and purges terminal queue
//! entries older than the retention period.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use orion_config::AppConfig;
use orion_core::error::StoreError;
use orion_core::store::{ConversationStore, PrunePolicy, RequestQueue};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub pruned_messages: u64,
    pub purged_entries: u64,
}

#[derive(Clone)]
pub struct Maintenance {
    conversations: Arc<dyn ConversationStore>,
    queue: Arc<dyn RequestQueue>,
    policy: PrunePolicy,
    terminal_retention: chrono::Duration,
}

impl Maintenance {
    pub fn new(conversations: Arc<dyn ConversationStore>, queue: Arc<dyn RequestQueue>) -> Self {
        Self {
            conversations,
            queue,
            policy: PrunePolicy::default(),
            terminal_retention: chrono::Duration::days(7),
        }
    }

    pub fn with_config(self, config: &AppConfig) -> Self {
        self.with_policy(config.memory.prune_policy())
            .with_terminal_retention(config.queue.terminal_retention())
    }

    pub fn with_policy(mut self, policy: PrunePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_terminal_retention(mut self, retention: chrono::Duration) -> Self {
        self.terminal_retention = retention;
        self
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<MaintenanceReport, StoreError> {
        let pruned_messages = self.conversations.prune(&self.policy).await?;
        let purged_entries = self
            .queue
            .purge_terminal(now - self.terminal_retention)
            .await?;

        info!(pruned_messages, purged_entries, "Maintenance pass finished");
        Ok(MaintenanceReport {
            pruned_messages,
            purged_entries,
        })
    }

    pub fn start(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = this.run_once(Utc::now()).await {
                            error!(error = %e, "Maintenance pass failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Maintenance stopped");
                            return;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orion_core::message::{Message, SessionId};
    use orion_core::request::UserRequest;
    use orion_core::store::QueueFilter;
    use orion_memory::InMemoryStore;

    #[tokio::test]
    async fn prunes_messages_and_purges_old_terminal_entries() {
        let store = Arc::new(InMemoryStore::new());
        let session = SessionId::from("cli:me");
        for i in 0..5 {
            store
                .append(&session, Message::user(format!("m{i}")))
                .await
                .unwrap();
        }

        let dead = UserRequest::new(session.clone(), "cli", "me", "dead");
        store.enqueue(dead.clone(), Utc::now(), "timeout").await.unwrap();
        store.mark_terminal(&dead.id, 2, "timeout").await.unwrap();
        let pending = UserRequest::new(session.clone(), "cli", "me", "pending");
        store.enqueue(pending.clone(), Utc::now(), "timeout").await.unwrap();

        let maintenance = Maintenance::new(store.clone(), store.clone())
            .with_policy(PrunePolicy::default().with_max_messages(2))
            .with_terminal_retention(chrono::Duration::days(7));

        // Within retention the terminal entry stays.
        let report = maintenance.run_once(Utc::now()).await.unwrap();
        assert_eq!(report.pruned_messages, 3);
        assert_eq!(report.purged_entries, 0);

        let report = maintenance
            .run_once(Utc::now() + chrono::Duration::days(8))
            .await
            .unwrap();
        assert_eq!(report.purged_entries, 1);
        assert_eq!(store.list(QueueFilter::All).await.unwrap().len(), 1);
        assert_eq!(store.load(&session).await.unwrap().len(), 2);
    }
}
