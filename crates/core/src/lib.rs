//! # Orion Core
//!
//! Domain types, traits, and error definitions for the Orion assistant's
//! orchestration core. This crate has no framework dependencies; it defines
//! the model that every other crate implements against.
//!
//! Every collaborator (model, tool, notification channel, durable store) is a
//! trait here. Implementations live in their own crates, which keeps the
//! orchestrator testable with scripted stand-ins.

pub mod error;
pub mod message;
pub mod model;
pub mod tool;
pub mod channel;
pub mod request;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use error::{Error, FailureClass, Result};
pub use message::{Message, Role, SessionId, SessionSummary};
pub use model::{Action, EvaluationRequest, Evaluator, Model, Verdict, WorkerTurn};
pub use tool::{Tool, ToolArguments, ToolDescriptor, ToolInvocation};
pub use channel::NotificationChannel;
pub use request::{
    FailureKind, FinalResult, QueuedRequest, RunFailure, RunOutcome, Submission, UserRequest,
};
pub use store::{ConversationStats, ConversationStore, DeliveryLog, PrunePolicy, QueueFilter, QueueStats, RequestQueue};
