//! Scripted collaborators for orchestrator tests.

use async_trait::async_trait;
use orion_core::error::ProviderError;
use orion_core::model::{Action, EvaluationRequest, Evaluator, Model, Verdict, WorkerTurn};
use orion_core::tool::{ToolArguments, ToolInvocation};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub const PROVIDER: &str = "scripted";

/// One scripted worker response.
pub enum Step {
    Act(Action),
    Fail(ProviderError),
    /// Sleep, then act. Longer than the call timeout means "hang".
    Slow(Duration, Action),
}

/// A worker model that replays a fixed script.
///
/// Panics if called more often than the script allows.
pub struct ScriptedModel {
    steps: Mutex<VecDeque<Step>>,
    feedback_seen: Mutex<Vec<Option<String>>>,
    history_seen: Mutex<Vec<Vec<String>>>,
}

impl ScriptedModel {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            feedback_seen: Mutex::new(Vec::new()),
            history_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.feedback_seen.lock().unwrap().len()
    }

    /// The feedback each worker turn was given, in call order.
    pub fn feedback_seen(&self) -> Vec<Option<String>> {
        self.feedback_seen.lock().unwrap().clone()
    }

    /// The message contents each worker turn was shown, in call order.
    pub fn history_seen(&self) -> Vec<Vec<String>> {
        self.history_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Model for ScriptedModel {
    fn provider_id(&self) -> &str {
        PROVIDER
    }

    async fn next_action(&self, turn: WorkerTurn<'_>) -> Result<Action, ProviderError> {
        self.feedback_seen
            .lock()
            .unwrap()
            .push(turn.feedback.map(str::to_string));
        self.history_seen
            .lock()
            .unwrap()
            .push(turn.history.iter().map(|m| m.content.clone()).collect());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedModel: no more steps (call #{})", self.calls()));

        match step {
            Step::Act(action) => Ok(action),
            Step::Fail(e) => Err(e),
            Step::Slow(delay, action) => {
                tokio::time::sleep(delay).await;
                Ok(action)
            }
        }
    }
}

/// An evaluator that replays verdicts, accepting once the script runs out.
pub struct ScriptedEvaluator {
    verdicts: Mutex<VecDeque<Verdict>>,
    candidates: Mutex<Vec<String>>,
}

impl ScriptedEvaluator {
    pub fn new(verdicts: Vec<Verdict>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into()),
            candidates: Mutex::new(Vec::new()),
        }
    }

    pub fn accepting() -> Self {
        Self::new(vec![])
    }

    pub fn rejecting(times: usize) -> Self {
        Self::new(
            (0..times)
                .map(|i| Verdict::Reject {
                    feedback: format!("not good enough ({i})"),
                })
                .collect(),
        )
    }

    pub fn candidates(&self) -> Vec<String> {
        self.candidates.lock().unwrap().clone()
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    fn provider_id(&self) -> &str {
        PROVIDER
    }

    async fn evaluate(&self, request: EvaluationRequest<'_>) -> Result<Verdict, ProviderError> {
        self.candidates
            .lock()
            .unwrap()
            .push(request.candidate.to_string());
        Ok(self
            .verdicts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Verdict::Accept))
    }
}

pub fn answer(text: &str) -> Step {
    Step::Act(Action::Answer(text.into()))
}

pub fn invoke(tool: &str, args: serde_json::Value) -> Step {
    let arguments: ToolArguments = match args {
        serde_json::Value::Object(map) => map,
        _ => ToolArguments::new(),
    };
    Step::Act(Action::Invoke(ToolInvocation::new(tool, arguments)))
}

pub fn hang(action: Step) -> Step {
    match action {
        Step::Act(action) => Step::Slow(Duration::from_secs(3600), action),
        other => other,
    }
}
