//! Model and Evaluator traits — the abstraction over the completion API.
//!
//! The worker model looks at the session so far plus the tool catalog and
//! proposes the next [`Action`]. The evaluator is an independent pass that
//! judges a candidate answer against the original request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::{ToolDescriptor, ToolInvocation};

/// What the worker wants to do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Action {
    /// Run a tool and come back with its result.
    Invoke(ToolInvocation),
    /// A candidate final answer, to be judged by the evaluator.
    Answer(String),
}

/// Input to one worker step.
#[derive(Debug, Clone, Copy)]
pub struct WorkerTurn<'a> {
    /// Session history, oldest first, including this request's messages.
    pub history: &'a [Message],
    pub tools: &'a [ToolDescriptor],
    pub success_criteria: &'a str,
    /// Evaluator feedback from the previous rejected answer, if any.
    pub feedback: Option<&'a str>,
}

/// Input to one evaluator step.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationRequest<'a> {
    pub original_request: &'a str,
    pub candidate: &'a str,
    pub success_criteria: &'a str,
    pub history: &'a [Message],
    pub previous_feedback: Option<&'a str>,
}

/// The evaluator's judgement on a candidate answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Reject { feedback: String },
    /// The candidate is a question for the user; stop and hand it back.
    NeedsUserInput,
}

/// The worker side of the completion API.
#[async_trait]
pub trait Model: Send + Sync {
    /// Key used by the rate limiter for this model's calls.
    fn provider_id(&self) -> &str;

    async fn next_action(&self, turn: WorkerTurn<'_>) -> std::result::Result<Action, ProviderError>;
}

/// The evaluator side of the completion API.
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn evaluate(
        &self,
        request: EvaluationRequest<'_>,
    ) -> std::result::Result<Verdict, ProviderError>;
}
