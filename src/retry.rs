//! Bounded-backoff retry policy applied uniformly to every stage.

use std::time::Duration;

use crate::config::RetrySection;
use crate::error::FailureKind;

/// Decides whether a failed stage attempt should be retried and after what
/// delay. Attempt 1 is the first try, not a retry; with the default
/// configuration a stage gets at most 3 attempts with delays of 1s then 2s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    pub fn from_config(section: &RetrySection) -> Self {
        Self::new(section.max_attempts, section.base_delay_ms)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait before re-running a stage whose attempt number
    /// `attempt` just failed with `kind`, or `None` when the stage is
    /// exhausted. Only transient failures are retried; backoff doubles
    /// per attempt (base * 2^(attempt-1)).
    pub fn next_delay(&self, attempt: u32, kind: FailureKind) -> Option<Duration> {
        if kind != FailureKind::Transient {
            return None;
        }
        if attempt >= self.max_attempts {
            return None;
        }
        Some(self.base_delay * 2u32.pow(attempt.saturating_sub(1)))
    }
}
