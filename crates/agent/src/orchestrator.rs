//! The worker/evaluator loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orion_config::{AppConfig, DenialPolicy};
use orion_core::error::ProviderError;
use orion_core::message::Message;
use orion_core::model::{Action, EvaluationRequest, Evaluator, Model, Verdict, WorkerTurn};
use orion_core::request::{FinalResult, RunFailure, RunOutcome, Submission, UserRequest};
use orion_core::store::{ConversationStore, RequestQueue};
use orion_core::tool::{ToolInvocation, render_value};
use orion_providers::{Permit, RateLimiter};
use orion_tools::ToolDispatcher;
use tracing::{debug, error, info, warn};

use crate::session_lock::SessionLocks;

const FEEDBACK_PREFIX: &str = "Evaluator feedback on this answer:";

/// Drives one request through worker, tool and evaluator steps until the
/// evaluator accepts an answer, a failure ends the run, or the iteration
/// budget is spent.
///
/// Foreground callers use [`submit`](Self::submit); the drainer calls
/// [`run`](Self::run) directly. Both take the same per-session lock.
pub struct Orchestrator {
    worker: Arc<dyn Model>,
    evaluator: Arc<dyn Evaluator>,
    tools: Arc<ToolDispatcher>,
    conversations: Arc<dyn ConversationStore>,
    limiter: Arc<RateLimiter>,
    queue: Option<Arc<dyn RequestQueue>>,
    locks: SessionLocks,

    max_iterations: u32,
    step_attempts: u32,
    step_retry_delay: Duration,
    step_timeout: Duration,
    call_timeout: Duration,
    denial_policy: DenialPolicy,
    history_limit: usize,
    default_success_criteria: String,
    retry_delay: chrono::Duration,
}

impl Orchestrator {
    pub fn new(
        worker: Arc<dyn Model>,
        evaluator: Arc<dyn Evaluator>,
        tools: Arc<ToolDispatcher>,
        conversations: Arc<dyn ConversationStore>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            worker,
            evaluator,
            tools,
            conversations,
            limiter,
            queue: None,
            locks: SessionLocks::new(),
            max_iterations: 10,
            step_attempts: 2,
            step_retry_delay: Duration::from_secs(2),
            step_timeout: Duration::from_secs(180),
            call_timeout: Duration::from_secs(60),
            denial_policy: DenialPolicy::Block,
            history_limit: 20,
            default_success_criteria: "The answer should be clear and accurate".into(),
            retry_delay: chrono::Duration::minutes(5),
        }
    }

    /// Apply every orchestrator-related setting from the loaded config.
    pub fn with_config(self, config: &AppConfig) -> Self {
        self.with_max_iterations(config.orchestrator.max_iterations)
            .with_step_attempts(config.orchestrator.step_attempts)
            .with_step_retry_delay(config.orchestrator.step_retry_delay())
            .with_step_timeout(config.orchestrator.step_timeout())
            .with_call_timeout(config.model.call_timeout())
            .with_denial_policy(config.rate_limit.on_denied)
            .with_history_limit(config.orchestrator.history_limit)
            .with_default_success_criteria(config.orchestrator.default_success_criteria.clone())
            .with_retry_delay(config.queue.retry_delay())
    }

    /// Queue that receives recoverable failures from [`submit`](Self::submit).
    pub fn with_queue(mut self, queue: Arc<dyn RequestQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Attempts per model or tool call before the step gives up. At least one.
    pub fn with_step_attempts(mut self, attempts: u32) -> Self {
        self.step_attempts = attempts.max(1);
        self
    }

    pub fn with_step_retry_delay(mut self, delay: Duration) -> Self {
        self.step_retry_delay = delay;
        self
    }

    /// Wall-clock bound on one whole step, including retries and rate-limit waits.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Bound on a single model call.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_denial_policy(mut self, policy: DenialPolicy) -> Self {
        self.denial_policy = policy;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_default_success_criteria(mut self, criteria: impl Into<String>) -> Self {
        self.default_success_criteria = criteria.into();
        self
    }

    /// Delay before the first drainer retry of a queued request.
    pub fn with_retry_delay(mut self, delay: chrono::Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Run a request and queue it on recoverable failure.
    ///
    /// A queue write failure is reported as a `Persistence` failure, never dropped.
    pub async fn submit(&self, request: &UserRequest) -> Submission {
        let failure = match self.run(request).await {
            RunOutcome::Done(result) => return Submission::Completed(result),
            RunOutcome::UnrecoverableFailure(failure) => return Submission::Failed(failure),
            RunOutcome::RecoverableFailure(failure) => failure,
        };

        let Some(queue) = &self.queue else {
            warn!(request_id = %request.id, "No retry queue configured, reporting failure");
            return Submission::Failed(failure);
        };

        let retry_at = Utc::now() + self.retry_delay;
        match queue.enqueue(request.clone(), retry_at, &failure.reason).await {
            Ok(entry) => {
                info!(
                    request_id = %entry.id,
                    session_id = %request.session_id,
                    retry_at = %retry_at,
                    reason = %failure.reason,
                    "Request queued for retry"
                );
                Submission::Queued {
                    request_id: entry.id,
                    retry_at,
                    reason: failure.reason,
                }
            }
            Err(e) => {
                error!(
                    request_id = %request.id,
                    error = %e,
                    "Failed to persist request to retry queue"
                );
                Submission::Failed(RunFailure::from_store(&request.id, &e))
            }
        }
    }

    /// Run one request to a terminal outcome.
    pub async fn run(&self, request: &UserRequest) -> RunOutcome {
        let _session = self.locks.lock(&request.session_id).await;
        info!(
            request_id = %request.id,
            session_id = %request.session_id,
            channel = %request.channel,
            "Processing request"
        );

        let outcome = match self.run_locked(request).await {
            Ok(result) => RunOutcome::Done(result),
            Err(failure) => RunOutcome::failed(failure),
        };

        match &outcome {
            RunOutcome::Done(result) => info!(
                request_id = %request.id,
                iterations = result.iterations,
                tool_calls = result.tool_calls,
                "Request completed"
            ),
            RunOutcome::RecoverableFailure(f) | RunOutcome::UnrecoverableFailure(f) => warn!(
                request_id = %request.id,
                class = %f.class,
                kind = ?f.kind,
                reason = %f.reason,
                "Request failed"
            ),
        }
        outcome
    }

    async fn run_locked(&self, request: &UserRequest) -> Result<FinalResult, RunFailure> {
        let mut history = self.start(request).await?;
        let criteria = request
            .success_criteria
            .as_deref()
            .unwrap_or(&self.default_success_criteria);
        let mut feedback: Option<String> = None;
        let mut tool_calls = 0;

        for iteration in 1..=self.max_iterations {
            debug!(request_id = %request.id, iteration, "Worker step");

            let turn = WorkerTurn {
                history: &history,
                tools: self.tools.catalog(),
                success_criteria: criteria,
                feedback: feedback.as_deref(),
            };
            let worker = self.worker.as_ref();
            let action = self
                .bounded(
                    request,
                    "worker",
                    self.call_model(request, worker.provider_id(), move || worker.next_action(turn)),
                )
                .await?;

            match action {
                Action::Invoke(call) => {
                    let value = self
                        .bounded(request, "tool", self.call_tool(request, &call))
                        .await?;
                    tool_calls += 1;
                    let message =
                        Message::tool_result(call, render_value(&value)).for_request(&request.id);
                    history.push(self.append(request, message).await?);
                }
                Action::Answer(candidate) => {
                    let message = Message::assistant(candidate.clone()).for_request(&request.id);
                    history.push(self.append(request, message).await?);

                    let evaluation = EvaluationRequest {
                        original_request: &request.text,
                        candidate: &candidate,
                        success_criteria: criteria,
                        history: &history,
                        previous_feedback: feedback.as_deref(),
                    };
                    let evaluator = self.evaluator.as_ref();
                    let verdict = self
                        .bounded(
                            request,
                            "evaluator",
                            self.call_model(request, evaluator.provider_id(), move || {
                                evaluator.evaluate(evaluation)
                            }),
                        )
                        .await?;

                    match verdict {
                        Verdict::Accept | Verdict::NeedsUserInput => {
                            debug!(
                                request_id = %request.id,
                                needs_user_input = matches!(verdict, Verdict::NeedsUserInput),
                                "Evaluator finished the run"
                            );
                            return Ok(FinalResult {
                                request_id: request.id.clone(),
                                answer: candidate,
                                iterations: iteration,
                                tool_calls,
                            });
                        }
                        Verdict::Reject { feedback: reason } => {
                            debug!(request_id = %request.id, feedback = %reason, "Candidate rejected");
                            let message = Message::assistant(format!("{FEEDBACK_PREFIX} {reason}"))
                                .for_request(&request.id);
                            history.push(self.append(request, message).await?);
                            feedback = Some(reason);
                        }
                    }
                }
            }
        }

        Err(RunFailure::iteration_budget(&request.id, self.max_iterations))
    }

    /// Append the user message unless a replay already did, then load the
    /// prompt window of the session.
    async fn start(&self, request: &UserRequest) -> Result<Vec<Message>, RunFailure> {
        let replay = self
            .conversations
            .has_request(&request.session_id, &request.id)
            .await
            .map_err(|e| RunFailure::from_store(&request.id, &e))?;

        if replay {
            debug!(request_id = %request.id, "Resuming request already in the session");
        } else {
            let message = Message::user(request.text.clone()).for_request(&request.id);
            self.append(request, message).await?;
        }

        self.conversations
            .load_recent(&request.session_id, self.history_limit.max(1))
            .await
            .map_err(|e| RunFailure::from_store(&request.id, &e))
    }

    async fn append(&self, request: &UserRequest, message: Message) -> Result<Message, RunFailure> {
        self.conversations
            .append(&request.session_id, message)
            .await
            .map_err(|e| {
                error!(
                    request_id = %request.id,
                    session_id = %request.session_id,
                    error = %e,
                    "Failed to append to conversation log"
                );
                RunFailure::from_store(&request.id, &e)
            })
    }

    /// Enforce the wall-clock bound on one step.
    async fn bounded<T>(
        &self,
        request: &UserRequest,
        step: &str,
        work: impl Future<Output = Result<T, RunFailure>>,
    ) -> Result<T, RunFailure> {
        match tokio::time::timeout(self.step_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    request_id = %request.id,
                    step,
                    timeout_secs = self.step_timeout.as_secs(),
                    "Step timed out"
                );
                Err(RunFailure::timeout(&request.id))
            }
        }
    }

    /// One model call with rate limiting, a per-call timeout and in-step retries.
    async fn call_model<T, F, Fut>(
        &self,
        request: &UserRequest,
        provider: &str,
        mut call: F,
    ) -> Result<T, RunFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = ProviderError::Timeout("no attempt made".into());

        for attempt in 1..=self.step_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.step_retry_delay).await;
            }

            match self.denial_policy {
                DenialPolicy::Block => self.limiter.acquire(provider).await,
                DenialPolicy::FailFast => {
                    if let Permit::Denied { retry_after } = self.limiter.try_acquire(provider) {
                        warn!(
                            request_id = %request.id,
                            provider,
                            attempt,
                            retry_after_ms = retry_after.as_millis() as u64,
                            "Rate limit denied model call"
                        );
                        last_error = ProviderError::RateLimited {
                            retry_after_ms: retry_after.as_millis() as u64,
                        };
                        continue;
                    }
                }
            }

            match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_transient() => {
                    warn!(request_id = %request.id, provider, attempt, error = %e, "Transient model error");
                    last_error = e;
                }
                Ok(Err(e)) => return Err(RunFailure::from_provider(&request.id, &e)),
                Err(_) => {
                    warn!(
                        request_id = %request.id,
                        provider,
                        attempt,
                        timeout_secs = self.call_timeout.as_secs(),
                        "Model call timed out"
                    );
                    last_error = ProviderError::Timeout(format!(
                        "no response within {}s",
                        self.call_timeout.as_secs()
                    ));
                }
            }
        }

        Err(RunFailure::from_provider(&request.id, &last_error))
    }

    /// One tool invocation, retrying recoverable failures within the step.
    async fn call_tool(
        &self,
        request: &UserRequest,
        call: &ToolInvocation,
    ) -> Result<serde_json::Value, RunFailure> {
        let mut attempt = 1;
        loop {
            match self.tools.dispatch(call).await {
                Ok(dispatched) => {
                    debug!(
                        request_id = %request.id,
                        tool = %call.name,
                        cached = dispatched.cached,
                        "Tool step done"
                    );
                    return Ok(dispatched.value);
                }
                Err(e) if e.failure_class().is_recoverable() && attempt < self.step_attempts => {
                    warn!(request_id = %request.id, tool = %call.name, attempt, error = %e, "Retrying tool");
                    attempt += 1;
                    tokio::time::sleep(self.step_retry_delay).await;
                }
                Err(e) => return Err(RunFailure::from_tool(&request.id, &e)),
            }
        }
    }
}
