//! Retry/backoff decisions for failed executions.
//!
//! A failure always increments the attempt count. Once the incremented count
//! reaches `max_retries` the job is dead-lettered; otherwise it goes back to
//! `pending` with `next_run_at = now + backoff_base^attempts` seconds.
//!
//! Powers follow integer semantics (`0^0 == 1`). The exponent is the count
//! *after* the increment, so it is never zero in practice: a base of `0`
//! retries immediately and a base of `1` always waits one second.
//!
//! Delays are not capped. The one exception to strictly growing delays is a
//! schedule past [`LATEST_RUN_AT`], which is clamped to that instant.

use crate::job::JobState;
use chrono::{DateTime, Duration, Utc};

/// Unix seconds of `9999-12-31T23:59:59Z`, the last instant the job store's
/// four-digit-year timestamps can represent.
pub const LATEST_RUN_AT: i64 = 253_402_300_799;

/// [`LATEST_RUN_AT`] as a timestamp.
pub fn latest_run_at() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(LATEST_RUN_AT, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Outcome of applying the retry policy to one failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Make the job claimable again at `next_run_at`.
    Retry {
        attempts: u32,
        next_run_at: DateTime<Utc>,
    },
    /// Retries are exhausted; move the job to the dead-letter queue.
    Dead { attempts: u32 },
}

impl RetryDecision {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Retry { attempts, .. } | Self::Dead { attempts } => *attempts,
        }
    }

    pub fn state(&self) -> JobState {
        match self {
            Self::Retry { .. } => JobState::Pending,
            Self::Dead { .. } => JobState::Dead,
        }
    }

    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Retry { next_run_at, .. } => Some(*next_run_at),
            Self::Dead { .. } => None,
        }
    }
}

/// Exponential backoff with a configurable base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff_base: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { backoff_base: 2 }
    }
}

impl RetryPolicy {
    pub fn new(backoff_base: u32) -> Self {
        Self { backoff_base }
    }

    /// Delay in seconds before the job may run again after its
    /// `attempts`-th failure. Saturates at `u64::MAX`.
    pub fn backoff_secs(&self, attempts: u32) -> u64 {
        u64::from(self.backoff_base).saturating_pow(attempts)
    }

    /// Decide what happens to a job that failed while carrying `attempts`
    /// previous failures.
    pub fn on_failure(&self, attempts: u32, max_retries: u32, now: DateTime<Utc>) -> RetryDecision {
        let attempts = attempts.saturating_add(1);
        if attempts >= max_retries {
            return RetryDecision::Dead { attempts };
        }

        let latest = latest_run_at();
        let next_run_at = i64::try_from(self.backoff_secs(attempts))
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|delay| now.checked_add_signed(delay))
            .map_or(latest, |at| at.min(latest));
        RetryDecision::Retry {
            attempts,
            next_run_at,
        }
    }
}
