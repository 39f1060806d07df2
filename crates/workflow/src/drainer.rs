//! Failed-request drainer.
//!
//! Periodically re-runs queued requests whose retry time has passed. Each
//! entry runs in its own task, so a panic or a store error on one entry is
//! logged and the rest of the batch proceeds.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use orion_agent::Orchestrator;
use orion_channels::{NotificationManager, NotificationOutcome};
use orion_config::QueueConfig;
use orion_core::error::StoreError;
use orion_core::request::{QueuedRequest, RunOutcome};
use orion_core::store::RequestQueue;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// What happened to one queue entry during a drain cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryResult {
    /// Completed and removed from the queue
    Succeeded,
    /// Failed again, will retry at the given time
    Rescheduled { attempts: u32, next_retry_at: DateTime<Utc> },
    /// Gave up; kept in the queue for auditing
    Terminal { attempts: u32 },
    /// Could not be processed or its state could not be saved
    Errored(String),
}

/// Summary of one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub results: Vec<(String, EntryResult)>,
    /// Another cycle was already running, nothing was done
    pub skipped: bool,
}

impl DrainReport {
    pub fn processed(&self) -> usize {
        self.results.len()
    }

    pub fn count(&self, pred: impl Fn(&EntryResult) -> bool) -> usize {
        self.results.iter().filter(|(_, r)| pred(r)).count()
    }

    pub fn result(&self, id: &str) -> Option<&EntryResult> {
        self.results.iter().find(|(i, _)| i == id).map(|(_, r)| r)
    }
}

#[derive(Clone)]
pub struct Drainer {
    orchestrator: Arc<Orchestrator>,
    queue: Arc<dyn RequestQueue>,
    notifier: Arc<NotificationManager>,
    max_attempts: u32,
    retry_delay: chrono::Duration,
    cycle: Arc<Mutex<()>>,
}

impl Drainer {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        queue: Arc<dyn RequestQueue>,
        notifier: Arc<NotificationManager>,
    ) -> Self {
        Self {
            orchestrator,
            queue,
            notifier,
            max_attempts: 2,
            retry_delay: chrono::Duration::minutes(5),
            cycle: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_config(self, config: &QueueConfig) -> Self {
        self.with_max_attempts(config.max_attempts)
            .with_retry_delay(config.retry_delay())
    }

    /// Drainer retries before an entry is marked terminal. At least one.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: chrono::Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Process every entry due at `now`.
    ///
    /// Only a failure to read the queue is an error; per-entry problems are
    /// reported in the [`DrainReport`]. Overlapping calls are skipped.
    pub async fn drain_once(&self, now: DateTime<Utc>) -> Result<DrainReport, StoreError> {
        let Ok(_cycle) = self.cycle.try_lock() else {
            debug!("Drain cycle already running, skipping");
            return Ok(DrainReport {
                skipped: true,
                ..Default::default()
            });
        };

        let due = self.queue.due(now).await?;
        if due.is_empty() {
            debug!("No queued requests due");
            return Ok(DrainReport::default());
        }
        info!(count = due.len(), "Draining failed-request queue");

        let mut report = DrainReport::default();
        for entry in due {
            let id = entry.id.clone();
            let this = self.clone();
            let task = entry.clone();
            let result = match tokio::spawn(async move { this.process(task).await }).await {
                Ok(result) => result,
                Err(e) => {
                    // A crashed run still uses up an attempt.
                    error!(request_id = %id, error = %e, "Queue entry task aborted");
                    self.record_failure(&entry, "internal error while processing the request", true)
                        .await
                }
            };
            let result = result.unwrap_or_else(|e| {
                error!(request_id = %id, error = %e, "Failed to update queue entry");
                EntryResult::Errored(e.to_string())
            });
            report.results.push((id, result));
        }

        info!(
            processed = report.processed(),
            succeeded = report.count(|r| matches!(r, EntryResult::Succeeded)),
            terminal = report.count(|r| matches!(r, EntryResult::Terminal { .. })),
            "Drain cycle finished"
        );
        Ok(report)
    }

    async fn process(&self, entry: QueuedRequest) -> Result<EntryResult, StoreError> {
        debug!(request_id = %entry.id, attempt = entry.attempts + 1, "Retrying queued request");

        match self.orchestrator.run(&entry.request).await {
            RunOutcome::Done(result) => {
                self.queue.remove(&entry.id).await?;
                info!(request_id = %entry.id, attempt = entry.attempts + 1, "Queued request succeeded");
                self.notify(
                    &entry,
                    NotificationOutcome::Succeeded {
                        result: result.answer,
                    },
                )
                .await;
                Ok(EntryResult::Succeeded)
            }
            RunOutcome::RecoverableFailure(failure) => {
                self.record_failure(&entry, &failure.reason, true).await
            }
            RunOutcome::UnrecoverableFailure(failure) => {
                self.record_failure(&entry, &failure.reason, false).await
            }
        }
    }

    /// Count a failed attempt: reschedule while attempts remain, otherwise
    /// mark the entry terminal and tell the user.
    async fn record_failure(
        &self,
        entry: &QueuedRequest,
        reason: &str,
        recoverable: bool,
    ) -> Result<EntryResult, StoreError> {
        let attempts = entry.attempts + 1;

        if recoverable && attempts < self.max_attempts {
            let next_retry_at = Utc::now() + self.retry_delay;
            self.queue
                .reschedule(&entry.id, attempts, next_retry_at, reason)
                .await?;
            info!(
                request_id = %entry.id,
                attempt = attempts,
                next_retry_at = %next_retry_at,
                reason,
                "Queued request rescheduled"
            );
            return Ok(EntryResult::Rescheduled {
                attempts,
                next_retry_at,
            });
        }

        self.queue.mark_terminal(&entry.id, attempts, reason).await?;
        warn!(
            request_id = %entry.id,
            attempts,
            recoverable,
            reason,
            "Queued request gave up"
        );
        self.notify(
            entry,
            NotificationOutcome::Failed {
                attempts,
                reason: reason.to_string(),
            },
        )
        .await;
        Ok(EntryResult::Terminal { attempts })
    }

    async fn notify(&self, entry: &QueuedRequest, outcome: NotificationOutcome) {
        let report = self
            .notifier
            .notify(
                &entry.id,
                entry.channel(),
                &entry.request.destination,
                &outcome,
            )
            .await;
        if !report.all_delivered() {
            warn!(request_id = %entry.id, failed = ?report.failed, "Some notifications were not delivered");
        }
    }

    /// Run [`drain_once`](Self::drain_once) every `interval` until `shutdown`
    /// turns true or its sender is dropped.
    pub fn start(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = interval.as_secs(), "Drainer started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = this.drain_once(Utc::now()).await {
                            error!(error = %e, "Cannot read failed-request queue");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Drainer stopped");
                            return;
                        }
                    }
                }
            }
        })
    }
}
