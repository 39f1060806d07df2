//! Message and Session domain types.
//!
//! A session is one conversation thread (one per channel + user). Its
//! messages are append-only and ordered by the sequence number the
//! conversation store assigns on append.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::ToolInvocation;

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    /// The session used for a given user on a given channel.
    pub fn for_user(channel: &str, user: &str) -> Self {
        Self(format!("{channel}:{user}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The end user
    User,
    /// The assistant (answers and evaluator feedback)
    Assistant,
    /// Output of a tool invocation
    ToolResult,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::ToolResult => "tool_result",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool_result" => Some(Self::ToolResult),
            _ => None,
        }
    }
}

/// A single turn in a session. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Position within the session, assigned by the store on append (0 = unsaved).
    #[serde(default)]
    pub seq: u64,

    /// Who produced this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// The invocation this message reports on (tool results only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolInvocation>,

    /// The request that produced this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            seq: 0,
            role,
            content: content.into(),
            tool_call: None,
            request_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a tool result message carrying the invocation it answers.
    pub fn tool_result(invocation: ToolInvocation, content: impl Into<String>) -> Self {
        Self {
            tool_call: Some(invocation),
            ..Self::new(Role::ToolResult, content)
        }
    }

    /// Tag this message with the request that produced it.
    pub fn for_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Listing entry for a stored session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub message_count: u64,
    pub last_activity: DateTime<Utc>,
}
