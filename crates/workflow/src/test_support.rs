//! Shared fixtures for drainer and maintenance tests.

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
use orion_core::request::UserRequest;
use orion_core::store::RequestQueue;
use orion_memory::InMemoryStore;
use orion_providers::RateLimiter;
use orion_tools::default_dispatcher;

pub enum Reply {
    Answer(String),
    Timeout,
    Fatal,
}

/// Worker that replays replies in call order. Panics on a user message
/// of "boom" or when the replies run out.
pub struct ReplayModel {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<usize>,
}

impl ReplayModel {
    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Model for ReplayModel {
    fn provider_id(&self) -> &str {
        "replay"
    }

    async fn next_action(&self, turn: WorkerTurn<'_>) -> Result<Action, ProviderError> {
        *self.calls.lock().unwrap() += 1;
        let asked = turn
            .history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str());
        if asked == Some("boom") {
            panic!("model crashed");
        }

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Answer(text)) => Ok(Action::Answer(text)),
            Some(Reply::Timeout) => Err(ProviderError::Timeout("60s".into())),
            Some(Reply::Fatal) => Err(ProviderError::Authentication("bad key".into())),
            None => panic!("ReplayModel: no more replies"),
        }
    }
}

pub struct AcceptAll;

#[async_trait]
impl Evaluator for AcceptAll {
    fn provider_id(&self) -> &str {
        "replay"
    }

    async fn evaluate(&self, _request: EvaluationRequest<'_>) -> Result<Verdict, ProviderError> {
        Ok(Verdict::Accept)
    }
}

pub struct RecordingChannel {
    name: &'static str,
    destination: &'static str,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingChannel {
    pub fn new(name: &'static str, destination: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            destination,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<(String, String)> {
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

pub struct Env {
    pub store: Arc<InMemoryStore>,
    pub model: Arc<ReplayModel>,
    pub telegram: Arc<RecordingChannel>,
    pub webhook: Arc<RecordingChannel>,
    pub drainer: crate::Drainer,
}

impl Env {
    pub fn new(replies: Vec<Reply>) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let model = Arc::new(ReplayModel {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(0),
        });
        let orchestrator = Orchestrator::new(
            model.clone(),
            Arc::new(AcceptAll),
            Arc::new(default_dispatcher()),
            store.clone(),
            Arc::new(RateLimiter::new(100, Duration::from_secs(60))),
        )
        .with_step_attempts(1)
        .with_step_retry_delay(Duration::ZERO);

        let telegram = RecordingChannel::new("telegram", "42");
        let webhook = RecordingChannel::new("webhook", "https://hooks.example.com");
        let notifier = NotificationManager::new(store.clone())
            .with_channel(telegram.clone())
            .with_channel(webhook.clone())
            .with_broadcast(vec!["webhook".into()]);

        let drainer = crate::Drainer::new(Arc::new(orchestrator), store.clone(), Arc::new(notifier));
        Self {
            store,
            model,
            telegram,
            webhook,
            drainer,
        }
    }

    pub fn request(&self, text: &str) -> UserRequest {
        UserRequest::new(SessionId::from("telegram:42"), "telegram", "42", text)
    }

    /// Queue a request that is already due.
    pub async fn enqueue(&self, text: &str) -> UserRequest {
        let request = self.request(text);
        self.store
            .enqueue(request.clone(), Utc::now() - chrono::Duration::seconds(1), "timeout")
            .await
            .unwrap();
        request
    }
}
