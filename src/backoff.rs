//! Exponential backoff policy for reconnect scheduling.

use std::time::Duration;

/// Delay schedule for reconnect attempts.
///
/// The n-th consecutive failure (counting from zero) waits
/// `min(base_delay * 2^n, max_delay)` before the next attempt. After
/// `max_attempts` consecutive failures the orchestrator stops retrying
/// until a manual reconnect resets the counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling applied to the doubled delay.
    pub max_delay: Duration,
    /// Consecutive failures tolerated before giving up.
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Default delay before the first retry (1 second).
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

    /// Default delay ceiling (30 seconds).
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

    /// Default attempt budget.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

    /// Create a policy with explicit parameters.
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// Delay to wait after the given zero-based failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether the given consecutive-failure count has used up the budget.
    pub fn exhausted(&self, consecutive_failures: u32) -> bool {
        consecutive_failures >= self.max_attempts
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Self::DEFAULT_BASE_DELAY,
            max_delay: Self::DEFAULT_MAX_DELAY,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
