//! Configuration loading, validation, and management for Orion.
//!
//! Loads configuration from `~/.orion/config.toml` with environment
//! variable overrides. Validated once at startup, then passed by reference
//! into every component constructor.

use orion_core::PrunePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.orion/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Completion API used by the worker and the evaluator
    #[serde(default)]
    pub model: ModelConfig,

    /// Worker/evaluator loop limits
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Tool response cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Failed-request queue and drainer
    #[serde(default)]
    pub queue: QueueConfig,

    /// Conversation store
    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

fn default_true() -> bool {
    true
}

// --- model ---

#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider name; also the rate-limit key
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Base URL of an OpenAI-compatible `/chat/completions` endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_worker_model")]
    pub worker_model: String,

    #[serde(default = "default_worker_model")]
    pub evaluator_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-call timeout; expiry is a transient provider error
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

fn default_provider() -> String {
    "groq".into()
}
fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".into()
}
fn default_worker_model() -> String {
    "llama-3.3-70b-versatile".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_call_timeout() -> u64 {
    60
}

impl ModelConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            api_key: None,
            worker_model: default_worker_model(),
            evaluator_model: default_worker_model(),
            temperature: default_temperature(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("worker_model", &self.worker_model)
            .field("evaluator_model", &self.evaluator_model)
            .field("temperature", &self.temperature)
            .field("call_timeout_secs", &self.call_timeout_secs)
            .finish()
    }
}

// --- orchestrator ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Attempts per model or tool call before the request is handed to the queue
    #[serde(default = "default_step_attempts")]
    pub step_attempts: u32,

    #[serde(default = "default_step_retry_delay")]
    pub step_retry_delay_ms: u64,

    /// Wall-clock limit for one worker, tool, or evaluator step
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    /// Prior messages used to seed a new turn
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    #[serde(default = "default_success_criteria")]
    pub default_success_criteria: String,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_step_attempts() -> u32 {
    2
}
fn default_step_retry_delay() -> u64 {
    2_000
}
fn default_step_timeout() -> u64 {
    180
}
fn default_history_limit() -> usize {
    20
}
fn default_success_criteria() -> String {
    "The answer should be clear and accurate".into()
}

impl OrchestratorConfig {
    pub fn step_retry_delay(&self) -> Duration {
        Duration::from_millis(self.step_retry_delay_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            step_attempts: default_step_attempts(),
            step_retry_delay_ms: default_step_retry_delay(),
            step_timeout_secs: default_step_timeout(),
            history_limit: default_history_limit(),
            default_success_criteria: default_success_criteria(),
        }
    }
}

// --- rate limit ---

/// What the orchestrator does when the rate limiter says no.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialPolicy {
    /// Wait until the window resets, then try again.
    #[default]
    Block,
    /// Treat the denial as a transient provider failure.
    FailFast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,

    #[serde(default = "default_window")]
    pub window_secs: u64,

    /// Minimum spacing between two calls to the same provider (0 = off)
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,

    #[serde(default)]
    pub on_denied: DenialPolicy,
}

fn default_requests_per_window() -> u32 {
    30
}
fn default_window() -> u64 {
    60
}
fn default_min_interval() -> u64 {
    2_000
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: default_requests_per_window(),
            window_secs: default_window(),
            min_interval_ms: default_min_interval(),
            on_denied: DenialPolicy::default(),
        }
    }
}

// --- cache ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

fn default_cache_ttl() -> u64 {
    300
}
fn default_cache_entries() -> usize {
    1024
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_entries(),
        }
    }
}

// --- queue ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Drainer retries before an entry is marked terminal
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    #[serde(default = "default_drain_interval")]
    pub drain_interval_secs: u64,

    /// Terminal entries older than this are purged by maintenance
    #[serde(default = "default_terminal_retention")]
    pub terminal_retention_days: u32,
}

fn default_max_attempts() -> u32 {
    2
}
fn default_retry_delay() -> u64 {
    300
}
fn default_drain_interval() -> u64 {
    60
}
fn default_terminal_retention() -> u32 {
    7
}

impl QueueConfig {
    pub fn retry_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retry_delay_secs as i64)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn terminal_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.terminal_retention_days))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay(),
            drain_interval_secs: default_drain_interval(),
            terminal_retention_days: default_terminal_retention(),
        }
    }
}

// --- memory ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// SQLite file; defaults to `~/.orion/orion.sqlite`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,

    /// 0 disables age-based pruning
    #[serde(default = "default_prune_days")]
    pub prune_after_days: u32,

    /// 0 disables size-based pruning
    #[serde(default = "default_max_messages")]
    pub max_messages_per_session: usize,

    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,
}

fn default_prune_days() -> u32 {
    30
}
fn default_max_messages() -> usize {
    500
}
fn default_prune_interval() -> u64 {
    3_600
}

impl MemoryConfig {
    pub fn database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => PathBuf::from(path),
            None => AppConfig::config_dir().join("orion.sqlite"),
        }
    }

    pub fn prune_policy(&self) -> PrunePolicy {
        PrunePolicy {
            max_age: (self.prune_after_days > 0)
                .then(|| chrono::Duration::days(i64::from(self.prune_after_days))),
            max_messages_per_session: (self.max_messages_per_session > 0)
                .then_some(self.max_messages_per_session),
        }
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            prune_after_days: default_prune_days(),
            max_messages_per_session: default_max_messages(),
            prune_interval_secs: default_prune_interval(),
        }
    }
}

// --- notifications ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Channels that receive every terminal outcome in addition to the origin
    #[serde(default)]
    pub broadcast: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<TelegramConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,
}

impl NotificationsConfig {
    /// Whether a notification channel with this name is configured.
    pub fn is_configured(&self, name: &str) -> bool {
        match name {
            "console" => true,
            "telegram" => self.telegram.is_some(),
            "webhook" => self.webhook.is_some(),
            _ => false,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token from @BotFather
    #[serde(default)]
    pub bot_token: String,

    /// Chat that receives broadcast notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,

    #[serde(default = "default_telegram_api")]
    pub api_url: String,
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".into()
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"[REDACTED]")
            .field("chat_id", &self.chat_id)
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Receives a JSON POST per notification
    pub url: String,
}

// --- logging ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.orion/config.toml).
    ///
    /// Environment variables override the file:
    /// - `ORION_API_KEY`, then `GROQ_API_KEY`, then `OPENAI_API_KEY`
    /// - `ORION_BASE_URL`, `ORION_WORKER_MODEL`, `ORION_EVALUATOR_MODEL`
    /// - `ORION_DATABASE`
    /// - `ORION_TELEGRAM_TOKEN` / `TELEGRAM_BOT_TOKEN`, `ORION_TELEGRAM_CHAT_ID`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(None)
    }

    /// Load from an explicit path if given, else the default location.
    pub fn load_with(path: Option<&Path>) -> Result<Self, ConfigError> {
        let default_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(path.unwrap_or(&default_path))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in `load`).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.model.api_key.is_none() {
            self.model.api_key = lookup("ORION_API_KEY")
                .or_else(|| lookup("GROQ_API_KEY"))
                .or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(url) = lookup("ORION_BASE_URL") {
            self.model.base_url = url;
        }
        if let Some(model) = lookup("ORION_WORKER_MODEL") {
            self.model.worker_model = model;
        }
        if let Some(model) = lookup("ORION_EVALUATOR_MODEL") {
            self.model.evaluator_model = model;
        }
        if let Some(path) = lookup("ORION_DATABASE") {
            self.memory.database_path = Some(path);
        }

        let token = lookup("ORION_TELEGRAM_TOKEN").or_else(|| lookup("TELEGRAM_BOT_TOKEN"));
        if let Some(token) = token {
            let telegram = self.notifications.telegram.get_or_insert_with(|| TelegramConfig {
                bot_token: String::new(),
                chat_id: None,
                api_url: default_telegram_api(),
            });
            telegram.bot_token = token;
        }
        if let (Some(chat_id), Some(telegram)) = (
            lookup("ORION_TELEGRAM_CHAT_ID"),
            self.notifications.telegram.as_mut(),
        ) {
            telegram.chat_id = Some(chat_id);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".orion")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.temperature < 0.0 || self.model.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.model.call_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "model.call_timeout_secs must be > 0".into(),
            ));
        }
        if self.orchestrator.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_iterations must be > 0".into(),
            ));
        }
        if self.orchestrator.step_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.step_attempts must be > 0".into(),
            ));
        }
        if self.orchestrator.step_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.step_timeout_secs must be > 0".into(),
            ));
        }
        if self.rate_limit.requests_per_window == 0 || self.rate_limit.window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.requests_per_window and rate_limit.window_secs must be > 0".into(),
            ));
        }
        if self.queue.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "queue.max_attempts must be > 0".into(),
            ));
        }
        if self.queue.drain_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "queue.drain_interval_secs must be > 0".into(),
            ));
        }
        if let Some(name) = self
            .notifications
            .broadcast
            .iter()
            .find(|name| !self.notifications.is_configured(name))
        {
            return Err(ConfigError::ValidationError(format!(
                "broadcast channel '{name}' has no configuration"
            )));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.model.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
