//! The request orchestrator — the heart of Orion.
//!
//! Each request follows a **Worker → Tool → Evaluator** cycle:
//!
//! 1. **Receive** a request and append it to its session
//! 2. **Worker step**: the model proposes a tool call or a candidate answer
//! 3. **Tool step**: run the tool (or reuse a cached result), record it, loop to 2
//! 4. **Evaluator step**: an independent pass accepts the candidate or sends
//!    feedback back to the worker
//!
//! The loop ends on acceptance, on a failure, or when the iteration budget
//! runs out. Recoverable failures are handed to the retry queue.

pub mod orchestrator;
pub mod session_lock;

#[cfg(test)]
mod test_helpers;

pub use orchestrator::Orchestrator;
pub use session_lock::{SessionGuard, SessionLocks};
