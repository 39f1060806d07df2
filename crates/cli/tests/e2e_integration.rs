//! End-to-end scenarios for the Orion orchestration core.
//!
//! These wire the real stores, dispatcher, limiter, drainer and notifier
//! together, with scripted models standing in for the LLM provider.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use orion_agent::Orchestrator;
use orion_channels::NotificationManager;
use orion_core::channel::NotificationChannel;
use orion_core::error::{ChannelError, ProviderError};
use orion_core::message::{Role, SessionId};
use orion_core::model::{Action, EvaluationRequest, Evaluator, Model, Verdict, WorkerTurn};
use orion_core::request::{RunOutcome, Submission, UserRequest};
use orion_core::store::{ConversationStore, DeliveryLog, QueueFilter, RequestQueue};
use orion_core::tool::{ToolArguments, ToolInvocation};
use orion_memory::SqliteStore;
use orion_providers::RateLimiter;
use orion_tools::{ResponseCache, default_dispatcher};
use orion_workflow::{Drainer, EntryResult};
use serde_json::json;

// ── Mock collaborators ───────────────────────────────────────────────────

enum Step {
    Act(Action),
    Hang,
}

/// A worker that replays scripted steps in sequence.
struct ScriptedModel {
    steps: Mutex<VecDeque<Step>>,
    call_count: Mutex<usize>,
}

impl ScriptedModel {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            call_count: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait]
impl Model for ScriptedModel {
    fn provider_id(&self) -> &str {
        "e2e_mock"
    }

    async fn next_action(&self, _turn: WorkerTurn<'_>) -> Result<Action, ProviderError> {
        *self.call_count.lock().unwrap() += 1;
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Act(action)) => Ok(action),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Action::Answer("too late".into()))
            }
            None => panic!("ScriptedModel exhausted: call #{}", self.calls()),
        }
    }
}

struct AcceptAll;

#[async_trait]
impl Evaluator for AcceptAll {
    fn provider_id(&self) -> &str {
        "e2e_mock"
    }

    async fn evaluate(&self, _request: EvaluationRequest<'_>) -> Result<Verdict, ProviderError> {
        Ok(Verdict::Accept)
    }
}

struct RecordingChannel {
    name: &'static str,
    destination: &'static str,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingChannel {
    fn new(name: &'static str, destination: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            destination,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        self.name
    }

    fn default_destination(&self) -> Option<&str> {
        Some(self.destination)
    }

    async fn send(&self, destination: &str, text: &str) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), text.to_string()));
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn answer(text: &str) -> Step {
    Step::Act(Action::Answer(text.into()))
}

fn calculate(expression: &str) -> Step {
    let mut args = ToolArguments::new();
    args.insert("expression".into(), json!(expression));
    Step::Act(Action::Invoke(ToolInvocation::new("calculator", args)))
}

fn orchestrator(model: Arc<ScriptedModel>, store: Arc<SqliteStore>) -> Arc<Orchestrator> {
    Arc::new(
        Orchestrator::new(
            model,
            Arc::new(AcceptAll),
            Arc::new(default_dispatcher()),
            store.clone(),
            Arc::new(RateLimiter::new(30, Duration::from_secs(60))),
        )
        .with_queue(store)
        .with_step_attempts(2)
        .with_step_retry_delay(Duration::from_millis(10))
        .with_call_timeout(Duration::from_millis(50)),
    )
}

struct Channels {
    telegram: Arc<RecordingChannel>,
    webhook: Arc<RecordingChannel>,
    manager: Arc<NotificationManager>,
}

fn channels(store: Arc<SqliteStore>) -> Channels {
    let telegram = RecordingChannel::new("telegram", "42");
    let webhook = RecordingChannel::new("webhook", "https://hooks.example.com");
    let manager = NotificationManager::new(store)
        .with_channel(telegram.clone())
        .with_channel(webhook.clone())
        .with_broadcast(vec!["webhook".into()]);
    Channels {
        telegram,
        webhook,
        manager: Arc::new(manager),
    }
}

async fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap())
}

fn telegram_request(text: &str) -> UserRequest {
    UserRequest::new(SessionId::from("telegram:42"), "telegram", "42", text)
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_calculator_request_completes_with_ordered_history() {
    let store = memory_store().await;
    let model = ScriptedModel::new(vec![calculate("2+2"), answer("2+2 = 4")]);
    let request = UserRequest::new(SessionId::from("cli:me"), "console", "stdout", "What is 2+2?");

    let submission = orchestrator(model.clone(), store.clone()).submit(&request).await;
    let Submission::Completed(result) = submission else {
        panic!("expected completion, got {submission:?}");
    };
    assert_eq!(result.answer, "2+2 = 4");
    assert_eq!(result.tool_calls, 1);

    let history = store.load(&request.session_id).await.unwrap();
    let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::ToolResult, Role::Assistant]);
    let seqs: Vec<u64> = history.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(history[1].content, "4");
    assert!(store.list(QueueFilter::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn e2e_two_timeouts_land_in_queue_five_minutes_out() {
    let store = memory_store().await;
    let model = ScriptedModel::new(vec![Step::Hang, Step::Hang]);
    let request = telegram_request("weather in Paris?");

    let before = Utc::now();
    let submission = orchestrator(model.clone(), store.clone()).submit(&request).await;
    assert!(matches!(submission, Submission::Queued { .. }), "got {submission:?}");
    assert_eq!(model.calls(), 2);

    let entry = store.get(&request.id).await.unwrap().expect("queued");
    assert_eq!(entry.attempts, 0);
    assert!(!entry.terminal);
    let delay = entry.next_retry_at - before;
    assert!(delay >= chrono::Duration::minutes(5) - chrono::Duration::seconds(1));
    assert!(delay <= chrono::Duration::minutes(5) + chrono::Duration::seconds(5));
    assert!(entry.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn e2e_drainer_success_removes_entry_and_notifies_once_per_channel() {
    let store = memory_store().await;
    let model = ScriptedModel::new(vec![Step::Hang, Step::Hang, answer("Sunny, 21°C")]);
    let orchestrator = orchestrator(model.clone(), store.clone());
    let request = telegram_request("weather in Paris?");
    assert!(matches!(
        orchestrator.submit(&request).await,
        Submission::Queued { .. }
    ));

    let channels = channels(store.clone());
    let drainer = Drainer::new(orchestrator, store.clone(), channels.manager.clone());

    // Not due yet.
    let early = drainer.drain_once(Utc::now()).await.unwrap();
    assert_eq!(early.processed(), 0);

    let later = Utc::now() + chrono::Duration::minutes(6);
    let report = drainer.drain_once(later).await.unwrap();
    assert_eq!(report.result(&request.id), Some(&EntryResult::Succeeded));
    assert!(store.get(&request.id).await.unwrap().is_none());

    let telegram = channels.telegram.sent();
    assert_eq!(telegram.len(), 1);
    assert_eq!(telegram[0].0, "42");
    assert_eq!(
        telegram[0].1,
        "✅ Your earlier request has been processed:\n\nSunny, 21°C"
    );
    assert_eq!(channels.webhook.sent().len(), 1);

    // The replay did not duplicate the user message.
    let history = store.load(&request.session_id).await.unwrap();
    assert_eq!(history.iter().filter(|m| m.role == Role::User).count(), 1);

    let mut delivered = store.delivered(&request.id).await.unwrap();
    delivered.sort();
    assert_eq!(delivered, vec!["telegram".to_string(), "webhook".to_string()]);
}

#[tokio::test]
async fn e2e_exhausted_retries_are_terminal_with_one_failure_notice() {
    let store = memory_store().await;
    // Initial run plus two drainer retries, each timing out twice.
    let model = ScriptedModel::new((0..6).map(|_| Step::Hang).collect());
    let orchestrator = orchestrator(model.clone(), store.clone());
    let request = telegram_request("weather in Paris?");
    orchestrator.submit(&request).await;

    let channels = channels(store.clone());
    let drainer = Drainer::new(orchestrator, store.clone(), channels.manager.clone())
        .with_max_attempts(2)
        .with_retry_delay(chrono::Duration::minutes(5));

    let first = drainer
        .drain_once(Utc::now() + chrono::Duration::minutes(6))
        .await
        .unwrap();
    assert!(matches!(
        first.result(&request.id),
        Some(EntryResult::Rescheduled { attempts: 1, .. })
    ));

    let second = drainer
        .drain_once(Utc::now() + chrono::Duration::minutes(12))
        .await
        .unwrap();
    assert_eq!(
        second.result(&request.id),
        Some(&EntryResult::Terminal { attempts: 2 })
    );

    let entry = store.get(&request.id).await.unwrap().expect("kept for audit");
    assert!(entry.terminal);
    assert_eq!(entry.attempts, 2);

    // Never retried again.
    let third = drainer
        .drain_once(Utc::now() + chrono::Duration::days(1))
        .await
        .unwrap();
    assert_eq!(third.processed(), 0);
    assert_eq!(model.calls(), 6);

    let telegram = channels.telegram.sent();
    assert_eq!(telegram.len(), 1);
    assert!(telegram[0].1.starts_with("❌ Failed to process your request after 2 attempts:"));
    assert_eq!(channels.webhook.sent().len(), 1);
}

#[tokio::test]
async fn e2e_unknown_tool_fails_without_queueing() {
    let store = memory_store().await;
    let model = ScriptedModel::new(vec![Step::Act(Action::Invoke(ToolInvocation::new(
        "teleport",
        ToolArguments::new(),
    )))]);
    let request = telegram_request("beam me up");

    let outcome = orchestrator(model, store.clone()).run(&request).await;
    let RunOutcome::UnrecoverableFailure(failure) = outcome else {
        panic!("expected unrecoverable failure, got {outcome:?}");
    };
    assert!(failure.reason.contains("teleport"));
    assert!(store.list(QueueFilter::All).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn e2e_cache_serves_repeat_calls_until_ttl() {
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(300), 16));
    let dispatcher = default_dispatcher().with_cache(cache.clone());
    let mut args = ToolArguments::new();
    args.insert("expression".into(), json!("6*7"));
    let call = ToolInvocation::new("calculator", args);

    let first = dispatcher.dispatch(&call).await.unwrap();
    assert!(!first.cached);
    assert_eq!(first.value, json!(42));

    let second = dispatcher.dispatch(&call).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.value, json!(42));

    tokio::time::advance(Duration::from_secs(301)).await;
    let third = dispatcher.dispatch(&call).await.unwrap();
    assert!(!third.cached);
}

#[tokio::test]
async fn e2e_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orion.sqlite");
    let request = telegram_request("remind me later");

    {
        let store = Arc::new(SqliteStore::open(&path).await.unwrap());
        let model = ScriptedModel::new(vec![Step::Hang, Step::Hang]);
        let submission = orchestrator(model, store.clone()).submit(&request).await;
        assert!(matches!(submission, Submission::Queued { .. }));
        store.close().await;
    }

    let store = Arc::new(SqliteStore::open(&path).await.unwrap());
    let entry = store.get(&request.id).await.unwrap().expect("entry survived restart");
    assert_eq!(entry.request.text, "remind me later");
    assert_eq!(store.load(&request.session_id).await.unwrap().len(), 1);

    let model = ScriptedModel::new(vec![answer("Reminder set")]);
    let channels = channels(store.clone());
    let drainer = Drainer::new(orchestrator(model, store.clone()), store.clone(), channels.manager.clone());
    let report = drainer
        .drain_once(Utc::now() + chrono::Duration::minutes(6))
        .await
        .unwrap();
    assert_eq!(report.result(&request.id), Some(&EntryResult::Succeeded));
    assert_eq!(channels.telegram.sent().len(), 1);
}
