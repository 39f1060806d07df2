//! OpenAI-compatible completion adapter.
//!
//! Works with Groq (the default), OpenAI, OpenRouter, Ollama, vLLM and any
//! other endpoint exposing `/chat/completions` with function calling.
//!
//! One instance serves either as the worker [`Model`] (tool catalog sent as
//! functions) or as the [`Evaluator`] (JSON verdict), depending on which
//! trait the orchestrator calls it through.

use async_trait::async_trait;
use orion_config::ModelConfig;
use orion_core::error::ProviderError;
use orion_core::message::{Message, Role};
use orion_core::model::{Action, EvaluationRequest, Evaluator, Model, Verdict, WorkerTurn};
use orion_core::tool::{ToolArguments, ToolDescriptor, ToolInvocation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const WORKER_PROMPT: &str = "You are Orion, a helpful personal AI assistant that can use tools to complete tasks. \
Keep working on a task until either you have a question or clarification for the user, or the success criteria is met. \
Use a tool whenever it gives a more reliable answer than guessing (for example, use the calculator for arithmetic). \
If you have a question for the user, reply with the question clearly stated.";

const EVALUATOR_PROMPT: &str = "You are an evaluator that determines if a task has been completed successfully by an Assistant. \
Assess the Assistant's last response based on the given criteria. Respond only with a JSON object of the form \
{\"feedback\": string, \"success_criteria_met\": bool, \"user_input_needed\": bool}.";

/// An OpenAI-compatible completion endpoint bound to one model.
pub struct OpenAiCompatModel {
    provider: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatModel {
    pub fn new(
        provider: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        // The orchestrator enforces the per-call timeout; this is a backstop.
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            provider: provider.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.7,
            client,
        })
    }

    /// Groq's OpenAI-compatible endpoint (convenience constructor).
    pub fn groq(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("groq", "https://api.groq.com/openai/v1", api_key, model)
    }

    /// The worker model described by the configuration.
    pub fn worker_from_config(config: &ModelConfig) -> Result<Self, ProviderError> {
        Self::from_config(config, &config.worker_model)
    }

    /// The evaluator model described by the configuration.
    pub fn evaluator_from_config(config: &ModelConfig) -> Result<Self, ProviderError> {
        Self::from_config(config, &config.evaluator_model)
            .map(|m| m.with_temperature(0.0))
    }

    fn from_config(config: &ModelConfig, model: &str) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("no API key configured".into()))?;
        Ok(Self::new(&config.provider, &config.base_url, api_key, model)?
            .with_temperature(config.temperature))
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Convert session history to OpenAI API messages.
    ///
    /// A stored tool result expands into the assistant tool call plus the
    /// tool response, which is the pairing the API expects.
    fn to_api_messages(history: &[Message]) -> Vec<ApiMessage> {
        let mut out = Vec::with_capacity(history.len());
        for m in history {
            match (m.role, &m.tool_call) {
                (Role::ToolResult, Some(call)) => {
                    out.push(ApiMessage {
                        role: "assistant".into(),
                        content: None,
                        tool_calls: Some(vec![ApiToolCall {
                            id: call.id.clone(),
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: call.name.clone(),
                                arguments: serde_json::Value::Object(call.arguments.clone())
                                    .to_string(),
                            },
                        }]),
                        tool_call_id: None,
                    });
                    out.push(ApiMessage::text("tool", &m.content).responding_to(&call.id));
                }
                (Role::ToolResult, None) => {
                    out.push(ApiMessage::text("user", format!("Tool output: {}", m.content)));
                }
                (Role::User, _) => out.push(ApiMessage::text("user", &m.content)),
                (Role::Assistant, _) => out.push(ApiMessage::text("assistant", &m.content)),
            }
        }
        out
    }

    /// Convert the tool catalog to OpenAI function definitions.
    fn to_api_tools(tools: &[ToolDescriptor]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn worker_system_prompt(turn: &WorkerTurn<'_>) -> String {
        let mut prompt = format!(
            "{WORKER_PROMPT}\n\nThe current date and time is {}.\n\nThe success criteria for this task:\n{}",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            turn.success_criteria
        );
        if let Some(feedback) = turn.feedback {
            prompt.push_str(&format!(
                "\n\nPreviously you thought you completed the assignment, but your reply was rejected.\n\
                 Here is the feedback on why this was rejected:\n{feedback}\n\
                 With this feedback, please continue the assignment, ensuring that you meet the \
                 success criteria or have a question for the user."
            ));
        }
        prompt
    }

    fn evaluator_user_prompt(request: &EvaluationRequest<'_>) -> String {
        let mut prompt = format!(
            "You are evaluating a conversation between the User and Assistant.\n\n\
             The entire conversation with the assistant is:\n{}\n\
             The user's original request was:\n{}\n\n\
             The success criteria for this assignment is:\n{}\n\n\
             And the final response from the Assistant that you are evaluating is:\n{}\n\n\
             Decide if the success criteria is met by this response, and whether more user input \
             is required because the assistant has a question, needs clarification, or seems stuck.",
            format_conversation(request.history),
            request.original_request,
            request.success_criteria,
            request.candidate
        );
        if let Some(previous) = request.previous_feedback {
            prompt.push_str(&format!(
                "\nIn a prior attempt you provided this feedback: {previous}\n\
                 If the Assistant is repeating the same mistakes, consider responding that user input is required."
            ));
        }
        prompt
    }

    async fn chat(&self, body: serde_json::Value) -> Result<ApiMessage, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(provider = %self.provider, model = %self.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.provider, status, body = %error_body, "Provider returned error");
            return Err(ProviderError::from_status(status, error_body));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("Failed to parse response: {e}")))?;

        api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| ProviderError::Malformed("No choices in response".into()))
    }
}

/// Turn the worker's reply into an action. A tool call wins over text.
fn parse_action(message: ApiMessage) -> Result<Action, ProviderError> {
    if let Some(call) = message.tool_calls.and_then(|calls| calls.into_iter().next()) {
        let arguments: ToolArguments = if call.function.arguments.trim().is_empty() {
            ToolArguments::new()
        } else {
            serde_json::from_str(&call.function.arguments).map_err(|e| {
                ProviderError::Malformed(format!(
                    "arguments for {} are not a JSON object: {e}",
                    call.function.name
                ))
            })?
        };
        return Ok(Action::Invoke(
            ToolInvocation::new(call.function.name, arguments).with_id(call.id),
        ));
    }

    match message.content {
        Some(text) if !text.trim().is_empty() => Ok(Action::Answer(text)),
        _ => Err(ProviderError::Malformed(
            "response has neither tool call nor content".into(),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct EvaluatorOutput {
    #[serde(default)]
    feedback: String,
    success_criteria_met: bool,
    #[serde(default)]
    user_input_needed: bool,
}

/// Turn the evaluator's JSON reply into a verdict.
fn parse_verdict(content: &str) -> Result<Verdict, ProviderError> {
    // Some models wrap JSON in a code fence despite json mode.
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let output: EvaluatorOutput = serde_json::from_str(trimmed)
        .map_err(|e| ProviderError::Malformed(format!("evaluator verdict: {e}")))?;

    Ok(if output.success_criteria_met {
        Verdict::Accept
    } else if output.user_input_needed {
        Verdict::NeedsUserInput
    } else {
        Verdict::Reject {
            feedback: output.feedback,
        }
    })
}

fn format_conversation(history: &[Message]) -> String {
    let mut conversation = String::from("Conversation history:\n\n");
    for m in history {
        match m.role {
            Role::User => conversation.push_str(&format!("User: {}\n", m.content)),
            Role::Assistant => conversation.push_str(&format!("Assistant: {}\n", m.content)),
            Role::ToolResult => conversation.push_str(&format!("Tool: {}\n", m.content)),
        }
    }
    conversation
}

#[async_trait]
impl Model for OpenAiCompatModel {
    fn provider_id(&self) -> &str {
        &self.provider
    }

    async fn next_action(&self, turn: WorkerTurn<'_>) -> Result<Action, ProviderError> {
        let mut messages = vec![ApiMessage::text("system", Self::worker_system_prompt(&turn))];
        messages.extend(Self::to_api_messages(turn.history));

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": false,
        });
        if !turn.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(turn.tools));
        }

        parse_action(self.chat(body).await?)
    }
}

#[async_trait]
impl Evaluator for OpenAiCompatModel {
    fn provider_id(&self) -> &str {
        &self.provider
    }

    async fn evaluate(&self, request: EvaluationRequest<'_>) -> Result<Verdict, ProviderError> {
        let messages = vec![
            ApiMessage::text("system", EVALUATOR_PROMPT),
            ApiMessage::text("user", Self::evaluator_user_prompt(&request)),
        ];
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
            "stream": false,
        });

        let reply = self.chat(body).await?;
        parse_verdict(reply.content.as_deref().unwrap_or_default())
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn responding_to(mut self, call_id: &str) -> Self {
        self.tool_call_id = Some(call_id.into());
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}
