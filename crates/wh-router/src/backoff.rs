//! Retry backoff and abort policy for uploads.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::UploadJobConfig;

const MULTIPLIER: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub min_retry_attempts: i64,
    pub retry_time_window: Duration,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl From<&UploadJobConfig> for RetryPolicy {
    fn from(config: &UploadJobConfig) -> Self {
        Self {
            min_retry_attempts: config.min_retry_attempts,
            retry_time_window: config.retry_time_window,
            min_backoff: config.min_upload_backoff,
            max_backoff: config.max_upload_backoff,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given attempt, replaying an exponential generator
    /// (no jitter) `attempt` times. Zero attempts means no delay.
    pub fn duration_before_next_attempt(&self, attempt: i64) -> Duration {
        let mut current = self.min_backoff;
        let mut delay = Duration::ZERO;
        for _ in 0..attempt.max(0) {
            delay = current;
            if current >= self.max_backoff / MULTIPLIER {
                current = self.max_backoff;
            } else {
                current *= MULTIPLIER;
            }
            if delay == self.max_backoff {
                break;
            }
        }
        delay
    }

    /// Both thresholds must be crossed. A missing first attempt never aborts.
    pub fn is_aborted(
        &self,
        attempts: i64,
        first_attempt_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(started) = first_attempt_at else {
            return false;
        };
        if started.timestamp() == 0 {
            return false;
        }
        let elapsed = (now - started).to_std().unwrap_or(Duration::ZERO);
        attempts > self.min_retry_attempts && elapsed > self.retry_time_window
    }
}
