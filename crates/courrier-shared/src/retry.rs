//! Exponential backoff with jitter.
//!
//! Used wherever a transient failure is absorbed inside a component:
//! subscription reconnects, gateway token acquisition, push dispatch.

use std::time::Duration;

use rand::Rng;

/// Retry schedule: `base * 2^attempt`, capped at `max`, plus uniform random
/// jitter up to half the capped delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Cap applied before jitter.
    pub max: Duration,
    /// Attempts after which the operation is abandoned.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub const fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
        }
    }

    /// Delay to sleep before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        let capped = self.base.saturating_mul(factor).min(self.max);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 2);
        capped + Duration::from_millis(jitter_ms)
    }

    /// Whether `attempt` retries have exhausted the budget.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), 5)
    }
}
