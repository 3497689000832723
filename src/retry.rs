//! Bounded retry schedule for transient upload failures.
//!
//! Expressed as an explicit policy (attempt count in, delay out) so the bound
//! and the backoff curve are testable independently of the pipeline.

use std::time::Duration;

/// Exponential backoff capped at `max_delay`, bounded at `max_attempts`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Whether another attempt may be made after `attempts_so_far` failures.
    #[must_use]
    pub fn allows(&self, attempts_so_far: u32) -> bool {
        attempts_so_far < self.max_attempts
    }

    /// Delay to wait before attempt number `attempt` (1-based). The first
    /// attempt is immediate; each later attempt doubles the previous delay.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(16);
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }
}
