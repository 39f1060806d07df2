//! Fixed-window rate limiter for completion API calls.
//!
//! Each provider gets its own counter. A call is allowed while the current
//! window's count is below the quota (and, if configured, the minimum
//! spacing since the previous call has passed). Every attempt takes the
//! lock exactly once, so concurrent sessions can never overshoot the quota.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use orion_config::RateLimitConfig;
use tokio::time::Instant;
use tracing::debug;

/// Answer to a single acquire attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    Allowed,
    /// Try again after this long.
    Denied { retry_after: Duration },
}

impl Permit {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Per-provider counter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    /// Calls admitted in the current window
    pub count: u32,
    pub window_start: Instant,
    pub last_call: Option<Instant>,
}

/// Shared limiter for all sessions. Memory-resident; a restart starts fresh windows.
pub struct RateLimiter {
    quota: u32,
    window: Duration,
    min_interval: Duration,
    state: Mutex<HashMap<String, RateLimitState>>,
}

impl RateLimiter {
    /// `quota` calls per `window`; a zero quota is treated as one.
    pub fn new(quota: u32, window: Duration) -> Self {
        Self {
            quota: quota.max(1),
            window,
            min_interval: Duration::ZERO,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_window, config.window())
            .with_min_interval(config.min_interval())
    }

    /// Require at least this much time between two calls to one provider.
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn quota(&self) -> u32 {
        self.quota
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Try to take one call slot for `provider` without waiting.
    pub fn try_acquire(&self, provider: &str) -> Permit {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let entry = state.entry(provider.to_string()).or_insert(RateLimitState {
            count: 0,
            window_start: now,
            last_call: None,
        });

        let elapsed = now.duration_since(entry.window_start);
        if elapsed >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        if entry.count >= self.quota {
            let retry_after = self.window.saturating_sub(now.duration_since(entry.window_start));
            return Permit::Denied { retry_after };
        }

        if let Some(last) = entry.last_call {
            let since = now.duration_since(last);
            if since < self.min_interval {
                return Permit::Denied {
                    retry_after: self.min_interval - since,
                };
            }
        }

        entry.count += 1;
        entry.last_call = Some(now);
        Permit::Allowed
    }

    /// Wait until a slot for `provider` is free, then take it.
    pub async fn acquire(&self, provider: &str) {
        loop {
            match self.try_acquire(provider) {
                Permit::Allowed => return,
                Permit::Denied { retry_after } => {
                    debug!(
                        provider = %provider,
                        wait_ms = retry_after.as_millis() as u64,
                        "Rate limit reached, waiting"
                    );
                    // A zero wait would spin; the window edge is inclusive anyway.
                    tokio::time::sleep(retry_after.max(Duration::from_millis(1))).await;
                }
            }
        }
    }

    /// Current counter for a provider, if it has been used.
    pub fn state(&self, provider: &str) -> Option<RateLimitState> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.get(provider).copied()
    }
}
