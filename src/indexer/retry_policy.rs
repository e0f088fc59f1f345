//! Retry policy for parked poison records.
//!
//! Implements exponential backoff keyed on the ledger's retry count and the
//! time of the last failure.

use crate::config::RetrySettings;
use crate::task_store::PoisonRecord;
use chrono::{DateTime, Utc};

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Records that failed more often than this stay parked for an operator.
    pub max_retries: u32,
    /// Wait after the first failure, in seconds.
    pub initial_backoff_secs: u64,
    /// Cap for exponential growth, in seconds.
    pub max_backoff_secs: u64,
    /// Multiplier applied to backoff after each failure.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_backoff_secs: settings.initial_backoff_secs,
            max_backoff_secs: settings.max_backoff_secs,
            backoff_multiplier: settings.backoff_multiplier,
        }
    }

    /// Backoff after `retry_count` failures:
    /// `initial_backoff * multiplier^(retry_count - 1)`, capped at `max_backoff_secs`.
    pub fn backoff_secs(&self, retry_count: u32) -> u64 {
        let exponent = retry_count.saturating_sub(1).min(i32::MAX as u32) as i32;
        let backoff = self.initial_backoff_secs as f64 * self.backoff_multiplier.powi(exponent);
        backoff.min(self.max_backoff_secs as f64) as u64
    }

    /// Whether a record with this many failures should be attempted again.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count <= self.max_retries
    }

    /// Whether the backoff since the record's last failure has elapsed.
    pub fn is_due(&self, record: &PoisonRecord, now: DateTime<Utc>) -> bool {
        let elapsed = (now - record.last_error_time).num_seconds();
        let backoff = i64::try_from(self.backoff_secs(record.retry_count)).unwrap_or(i64::MAX);
        elapsed >= backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetrySettings::default())
    }
}
