//! Requests and their outcomes.
//!
//! A [`UserRequest`] is what a channel adapter submits. Running it yields a
//! [`RunOutcome`]; requests that fail recoverably are persisted as
//! [`QueuedRequest`]s and retried by the drainer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FailureClass, ProviderError, StoreError, ToolError};
use crate::message::SessionId;

/// One natural-language request from a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRequest {
    /// Unique request ID, reused as the queue entry ID if the request is queued
    pub id: String,

    pub session_id: SessionId,

    /// Originating channel name (e.g., "telegram", "cli")
    pub channel: String,

    /// Where replies go on the originating channel (chat id, address, ...)
    pub destination: String,

    pub text: String,

    /// What a good answer looks like; falls back to the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_criteria: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl UserRequest {
    pub fn new(
        session_id: SessionId,
        channel: impl Into<String>,
        destination: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            channel: channel.into(),
            destination: destination.into(),
            text: text.into(),
            success_criteria: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_success_criteria(mut self, criteria: impl Into<String>) -> Self {
        self.success_criteria = Some(criteria.into());
        self
    }
}

/// The accepted answer to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub request_id: String,
    pub answer: String,
    /// Worker/tool/evaluator cycles used
    pub iterations: u32,
    pub tool_calls: u32,
}

/// Which part of the taxonomy a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ToolExecution,
    ProviderTransient,
    ProviderFatal,
    IterationBudgetExceeded,
    Timeout,
    Persistence,
}

/// Why a request did not produce a final result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub request_id: String,
    pub kind: FailureKind,
    pub class: FailureClass,
    pub reason: String,
}

impl RunFailure {
    pub fn new(
        request_id: impl Into<String>,
        kind: FailureKind,
        class: FailureClass,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            kind,
            class,
            reason: reason.into(),
        }
    }

    pub fn from_provider(request_id: &str, err: &ProviderError) -> Self {
        let kind = if err.is_transient() {
            FailureKind::ProviderTransient
        } else {
            FailureKind::ProviderFatal
        };
        Self::new(request_id, kind, err.failure_class(), err.to_string())
    }

    /// Unknown tools and bad arguments are the model's fault, not the tool's.
    pub fn from_tool(request_id: &str, err: &ToolError) -> Self {
        let kind = match err {
            ToolError::UnknownTool(_) | ToolError::InvalidArguments { .. } => {
                FailureKind::ProviderFatal
            }
            ToolError::Execution { .. } | ToolError::Timeout { .. } => FailureKind::ToolExecution,
        };
        Self::new(request_id, kind, err.failure_class(), err.to_string())
    }

    pub fn from_store(request_id: &str, err: &StoreError) -> Self {
        Self::new(
            request_id,
            FailureKind::Persistence,
            FailureClass::Unrecoverable,
            err.to_string(),
        )
    }

    pub fn iteration_budget(request_id: &str, max_iterations: u32) -> Self {
        Self::new(
            request_id,
            FailureKind::IterationBudgetExceeded,
            FailureClass::Unrecoverable,
            format!("max iterations exceeded ({max_iterations})"),
        )
    }

    pub fn timeout(request_id: &str) -> Self {
        Self::new(
            request_id,
            FailureKind::Timeout,
            FailureClass::Unrecoverable,
            "timeout",
        )
    }
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?}): {}", self.class, self.kind, self.reason)
    }
}

/// The terminal state of one orchestrator run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Done(FinalResult),
    /// Worth retrying later; the caller hands it to the failed-request queue.
    RecoverableFailure(RunFailure),
    /// Surfaced to the caller immediately, never queued.
    UnrecoverableFailure(RunFailure),
}

impl RunOutcome {
    /// Wrap a failure in the variant matching its class.
    pub fn failed(failure: RunFailure) -> Self {
        match failure.class {
            FailureClass::Recoverable => Self::RecoverableFailure(failure),
            FailureClass::Unrecoverable => Self::UnrecoverableFailure(failure),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// What a foreground caller gets back from a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Completed(FinalResult),
    /// The request failed recoverably and is now in the retry queue.
    Queued {
        request_id: String,
        retry_at: DateTime<Utc>,
        reason: String,
    },
    Failed(RunFailure),
}

/// A request that exhausted its in-loop retries, persisted for the drainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    /// Same as the request ID
    pub id: String,

    pub request: UserRequest,

    /// Retries already performed by the drainer
    pub attempts: u32,

    pub next_retry_at: DateTime<Utc>,

    /// Set once the entry has given up; terminal entries are never retried.
    pub terminal: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueuedRequest {
    pub fn channel(&self) -> &str {
        &self.request.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_variant_follows_class() {
        let transient = RunFailure::from_provider("r1", &ProviderError::Timeout("30s".into()));
        assert_eq!(transient.kind, FailureKind::ProviderTransient);
        assert!(matches!(
            RunOutcome::failed(transient),
            RunOutcome::RecoverableFailure(_)
        ));

        let fatal = RunFailure::from_provider("r1", &ProviderError::Authentication("bad key".into()));
        assert_eq!(fatal.kind, FailureKind::ProviderFatal);
        assert!(matches!(
            RunOutcome::failed(fatal),
            RunOutcome::UnrecoverableFailure(_)
        ));
    }

    #[test]
    fn unknown_tool_counts_as_provider_fatal() {
        let failure = RunFailure::from_tool("r1", &ToolError::UnknownTool("teleport".into()));
        assert_eq!(failure.kind, FailureKind::ProviderFatal);
        assert_eq!(failure.class, FailureClass::Unrecoverable);
    }

    #[test]
    fn iteration_budget_reason() {
        let failure = RunFailure::iteration_budget("r1", 10);
        assert!(failure.reason.contains("max iterations exceeded"));
        assert_eq!(failure.class, FailureClass::Unrecoverable);
    }

    #[test]
    fn request_builder() {
        let req = UserRequest::new(SessionId::from("cli:me"), "cli", "me", "What is 2+2?")
            .with_success_criteria("a number");
        assert_eq!(req.success_criteria.as_deref(), Some("a number"));
        assert!(!req.id.is_empty());
    }
}
