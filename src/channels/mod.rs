pub mod telegram;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::bus::OutboundMessage;

// ---------------------------------------------------------------------------
// Retry policy & state
// ---------------------------------------------------------------------------

/// Exponential-backoff configuration for transient transport errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    /// Delay for the *n*-th retry attempt (0-indexed):
    /// `min(initial_delay * backoff_factor^attempt, max_delay)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(attempt as i32);
        Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as f64) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
        }
    }
}

/// Current retry progress for one channel connection.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempts: u32,
    pub in_cooldown: bool,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transient failure. Returns `true` while the caller should
    /// keep retrying; once attempts reach the policy limit the state
    /// enters cooldown and this returns `false`.
    pub fn record_failure(&mut self, policy: &RetryPolicy, error: &str) -> bool {
        self.attempts += 1;
        if self.attempts >= policy.max_retries {
            self.in_cooldown = true;
            warn!(error, attempts = self.attempts, "retries exhausted, entering cooldown");
            false
        } else {
            warn!(error, attempts = self.attempts, "transient failure, will retry");
            true
        }
    }

    /// Clear the state after a successful reconnect.
    pub fn reset(&mut self) {
        if self.attempts > 0 {
            info!(attempts = self.attempts, "retry state reset after recovery");
        }
        self.attempts = 0;
        self.in_cooldown = false;
    }

    pub fn next_delay(&self, policy: &RetryPolicy) -> Duration {
        policy.delay_for_attempt(self.attempts)
    }
}

// ---------------------------------------------------------------------------
// Channel trait
// ---------------------------------------------------------------------------

/// A messaging transport. The engine only relies on `send`; everything
/// else is connection lifecycle.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;
    async fn start(&mut self) -> Result<()>;
    async fn stop(&mut self) -> Result<()>;
    async fn send(&self, msg: &OutboundMessage) -> Result<()>;

    /// Check if a sender is in the allow-list. Empty list = allow all.
    fn is_allowed(&self, sender_id: &str, allow_list: &[String]) -> bool {
        allow_list.is_empty() || allow_list.iter().any(|a| a == sender_id)
    }
}
