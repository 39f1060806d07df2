//! Error types for the Orion domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum, and every error can report
//! whether the request that hit it is worth retrying later.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether a failed request should be queued for a later retry or surfaced
/// to the caller immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Recoverable,
    Unrecoverable,
}

impl FailureClass {
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::Recoverable)
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recoverable => write!(f, "recoverable"),
            Self::Unrecoverable => write!(f, "unrecoverable"),
        }
    }
}

/// The top-level error type for all Orion operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Provider(e) => e.failure_class(),
            Self::Tool(e) => e.failure_class(),
            Self::Store(_) | Self::Serialization(_) | Self::Internal(_) => {
                FailureClass::Unrecoverable
            }
            Self::Channel(_) => FailureClass::Recoverable,
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the external completion API (worker and evaluator calls).
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Provider server error: {message} (status: {status_code})")]
    Server { status_code: u16, message: String },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Request rejected: {message} (status: {status_code})")]
    BadRequest { status_code: u16, message: String },

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Classify a non-success HTTP status from a completion endpoint.
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status_code {
            401 | 403 => Self::Authentication(message),
            408 => Self::Timeout(message),
            429 => Self::RateLimited {
                retry_after_ms: 5_000,
            },
            500..=599 => Self::Server {
                status_code,
                message,
            },
            _ => Self::BadRequest {
                status_code,
                message,
            },
        }
    }

    /// Timeouts, 5xx, network drops and rate limiting are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Network(_) | Self::RateLimited { .. } | Self::Server { .. }
        )
    }

    pub fn failure_class(&self) -> FailureClass {
        if self.is_transient() {
            FailureClass::Recoverable
        } else {
            FailureClass::Unrecoverable
        }
    }
}

/// Failures raised at the tool boundary.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool_name}: {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    #[error("Tool execution failed: {tool_name}: {reason}")]
    Execution {
        tool_name: String,
        reason: String,
        class: FailureClass,
    },

    #[error("Tool timed out: {tool_name} after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },
}

impl ToolError {
    /// An execution failure the tool itself declares permanent.
    pub fn unrecoverable(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Execution {
            tool_name: tool_name.into(),
            reason: reason.into(),
            class: FailureClass::Unrecoverable,
        }
    }

    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::UnknownTool(_) | Self::InvalidArguments { .. } => FailureClass::Unrecoverable,
            Self::Execution { class, .. } => *class,
            Self::Timeout { .. } => FailureClass::Recoverable,
        }
    }
}

/// Failures of the durable stores (conversation log, request queue, delivery log).
///
/// Always unrecoverable: a store that cannot be written threatens the
/// durability guarantees every other component relies on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Failures of an outbound notification channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed to {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::Server {
            status_code: 503,
            message: "Service unavailable".into(),
        });
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("Service unavailable"));
    }

    #[test]
    fn status_classification() {
        assert!(ProviderError::from_status(429, "slow down").is_transient());
        assert!(ProviderError::from_status(502, "bad gateway").is_transient());
        assert!(ProviderError::from_status(408, "timeout").is_transient());
        assert!(!ProviderError::from_status(401, "no key").is_transient());
        assert!(!ProviderError::from_status(400, "bad json").is_transient());
        assert!(matches!(
            ProviderError::from_status(403, "nope"),
            ProviderError::Authentication(_)
        ));
    }

    #[test]
    fn tool_errors_carry_their_class() {
        assert_eq!(
            ToolError::UnknownTool("nope".into()).failure_class(),
            FailureClass::Unrecoverable
        );
        assert_eq!(
            ToolError::Timeout {
                tool_name: "calculator".into(),
                timeout_ms: 10
            }
            .failure_class(),
            FailureClass::Recoverable
        );
        assert_eq!(
            ToolError::unrecoverable("calculator", "division by zero").failure_class(),
            FailureClass::Unrecoverable
        );
    }

    #[test]
    fn persistence_errors_are_unrecoverable() {
        let err = Error::from(StoreError::Storage("disk full".into()));
        assert_eq!(err.failure_class(), FailureClass::Unrecoverable);
        assert!(err.to_string().contains("disk full"));
    }
}
