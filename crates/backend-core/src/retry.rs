use std::time::Duration;

/// How the delay grows between consecutive attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// `base * 2^attempt`
    Exponential,
    /// `base * (attempt + 1)`
    Linear,
}

/// Bounded backoff policy shared by the reissue exchange and chat reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_attempts: u32,
    growth: Growth,
}

impl RetryPolicy {
    /// Doubling delay from `base_delay_ms`, capped at `max_delay_ms`.
    pub fn exponential(base_delay_ms: u64, max_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            max_attempts,
            growth: Growth::Exponential,
        }
    }

    /// Delay grows by `step_ms` per attempt, uncapped.
    pub fn linear(step_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms: step_ms,
            max_delay_ms: u64::MAX,
            max_attempts,
            growth: Growth::Linear,
        }
    }

    /// Chat reconnection: `min(1000 * 2^attempt, 10000)` ms, five attempts.
    pub fn reconnect() -> Self {
        Self::exponential(1_000, 10_000, 5)
    }

    /// Reissue exchange: two extra attempts after 1s and 2s.
    pub fn reissue() -> Self {
        Self::linear(1_000, 2)
    }

    /// Same delays, different attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before the first retry, in milliseconds.
    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    /// Upper bound for any single delay, in milliseconds.
    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    /// Number of retries allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt is allowed after `attempt` earlier retries.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Wait before the retry that follows `attempt` earlier ones.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let calculated = match self.growth {
            Growth::Exponential => {
                let multiplier = 1_u64 << attempt.min(20);
                self.base_delay_ms.saturating_mul(multiplier)
            }
            Growth::Linear => self
                .base_delay_ms
                .saturating_mul(u64::from(attempt).saturating_add(1)),
        };
        Duration::from_millis(calculated.min(self.max_delay_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::reconnect()
    }
}
