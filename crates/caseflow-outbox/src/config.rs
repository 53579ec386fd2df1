//! Poller configuration and retry policy.

use caseflow::{FailureDisposition, FailureKind};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default time between drain cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);

/// Default number of events drawn per cycle.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Upper bound on any backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Configuration for [`crate::OutboxPoller`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainConfig {
    pub interval: Duration,
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl DrainConfig {
    /// Zero is raised to one millisecond.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Zero is raised to one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Exponential backoff between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

/// Decides whether a failed event is retried, and when.
///
/// The default retries forever and makes the event eligible again on the
/// very next cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after which a retryable failure is dead-lettered.
    pub max_attempts: Option<u32>,
    pub backoff: Option<Backoff>,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            backoff: None,
        }
    }

    /// Both bounds are clamped to [`MAX_BACKOFF`].
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        let base = base.min(MAX_BACKOFF);
        self.backoff = Some(Backoff {
            base,
            max: max.max(base).min(MAX_BACKOFF),
        });
        self
    }

    /// Delay before the next attempt after `attempts` failed ones.
    ///
    /// `base * 2^(attempts - 1)`, capped at the configured maximum.
    pub fn backoff_delay(&self, attempts: u32) -> Option<Duration> {
        let backoff = self.backoff?;
        let factor = 1u32
            .checked_shl(attempts.saturating_sub(1))
            .unwrap_or(u32::MAX);
        Some(backoff.base.saturating_mul(factor).min(backoff.max))
    }

    /// Disposition for an event that has now failed `attempts` times.
    pub fn disposition(
        &self,
        kind: FailureKind,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> FailureDisposition {
        if kind == FailureKind::NonRetryable {
            return FailureDisposition::DeadLetter;
        }
        if self.max_attempts.is_some_and(|max| attempts >= max) {
            return FailureDisposition::DeadLetter;
        }

        let not_before = self
            .backoff_delay(attempts)
            .and_then(|delay| chrono::Duration::from_std(delay).ok())
            .and_then(|delay| now.checked_add_signed(delay));
        FailureDisposition::Retry { not_before }
    }
}
