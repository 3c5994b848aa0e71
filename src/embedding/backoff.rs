//! Bounded exponential-backoff retry policy.
//!
//! Reifies the retry loop as a small state machine: an attempt counter,
//! a delay function (`base^attempt` seconds), and a terminal state once
//! the budget is spent. The embedding service drives it; nothing here
//! sleeps or performs I/O, so the schedule is testable in isolation.

use std::time::Duration;

/// Ceiling on a single backoff delay.
const MAX_BACKOFF_SECS: u64 = 64;

#[derive(Debug)]
pub struct RetryPolicy {
    max_retries: u32,
    base_secs: u64,
    attempt: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_secs: u64) -> Self {
        Self {
            max_retries,
            base_secs,
            attempt: 0,
        }
    }

    /// Request another attempt.
    ///
    /// Returns the delay to sleep before retrying, or `None` once the
    /// retry budget is exhausted (the caller must fail terminally).
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        self.attempt += 1;
        let secs = self
            .base_secs
            .checked_pow(self.attempt)
            .unwrap_or(MAX_BACKOFF_SECS)
            .min(MAX_BACKOFF_SECS);
        Some(Duration::from_secs(secs))
    }

    /// Attempts granted so far (not counting the initial try).
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
