//! Completion API plumbing for Orion.
//!
//! - [`RateLimiter`] gates every worker and evaluator call per provider.
//! - [`OpenAiCompatModel`] implements both the `Model` and `Evaluator`
//!   traits from `orion-core` against any OpenAI-compatible endpoint.

pub mod openai_compat;
pub mod rate_limit;

pub use openai_compat::OpenAiCompatModel;
pub use rate_limit::{Permit, RateLimitState, RateLimiter};
