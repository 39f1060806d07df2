//! Per-session serialization.
//!
//! Runs for the same session queue up behind one async mutex; runs for
//! different sessions never contend. Idle entries are dropped on the next
//! `lock` call, so the map only holds sessions that are running or waiting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use orion_core::message::SessionId;
use tokio::sync::OwnedMutexGuard;

/// Held for the duration of one run; dropping it releases the session.
pub type SessionGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `session`.
    pub async fn lock(&self, session: &SessionId) -> SessionGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Only the map holds an idle lock; anyone running or waiting holds a clone.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(session.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Sessions currently running or waiting.
    pub fn active(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.values().filter(|l| Arc::strong_count(l) > 1).count()
    }
}
