//! Progressive retry backoff.
//!
//! Delays come from a fixed table rather than a computed exponential curve:
//! attempts past the end of the table reuse its last entry. The schedule
//! also owns the retry budget, so the processor asks one place both "may
//! this attempt be retried" and "after how long".

use std::time::Duration;

/// Delay table indexed by attempt number (1-based).
const BACKOFF_TABLE: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

/// Default maximum number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Retry budget and backoff timing for failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    max_retries: u32,
}

impl RetrySchedule {
    /// Creates a schedule allowing `max_retries` retries per envelope.
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Maximum number of retries after the initial attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether an attempt numbered `attempt` may still be retried.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// Delay before re-queueing after the failure of attempt `attempt`.
    ///
    /// Attempts beyond the table length clamp to the last entry.
    pub fn delay(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1).min(BACKOFF_TABLE.len() as u32 - 1);
        BACKOFF_TABLE[index as usize]
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}
