//! Retry budget and backoff shared by the download and upload workers.

use std::time::Duration;

/// Attempts a file gets before it is marked as failed for good.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Delay before re-running a task after a transfer or upload failure.
pub const DEFAULT_FAILURE_DELAY: Duration = Duration::from_secs(60);

/// Delay before re-checking a file that was still being written.
pub const DEFAULT_UNSTABLE_DELAY: Duration = Duration::from_secs(30);

/// Upper bound on any computed delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30 * 60);

/// Tunable parameters for task retries.
///
/// With the default multiplier of `1.0` the delay is fixed. Values above
/// `1.0` grow the delay exponentially with the attempt number, clamped to
/// [`RetryPolicy::max_delay`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first run included.
    pub max_attempts: u32,
    /// Base delay after a failed transfer or upload.
    pub failure_delay: Duration,
    /// Base delay after a failed stability check.
    pub unstable_delay: Duration,
    /// Factor by which the delay grows after each attempt.
    pub multiplier: f64,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            failure_delay: DEFAULT_FAILURE_DELAY,
            unstable_delay: DEFAULT_UNSTABLE_DELAY,
            multiplier: 1.0,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Whether the failure of 0-based `attempt` still leaves room for
    /// another run.
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts
    }

    /// Delay before the run following a failed `attempt`.
    pub fn failure_delay(&self, attempt: u32) -> Duration {
        self.scaled(self.failure_delay, attempt)
    }

    /// Delay before the run following an unstable `attempt`.
    pub fn unstable_delay(&self, attempt: u32) -> Duration {
        self.scaled(self.unstable_delay, attempt)
    }

    fn scaled(&self, base: Duration, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let ms = (base.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(ms as u64)
    }
}
