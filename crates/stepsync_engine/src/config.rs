//! Configuration for the sync coordinator.

use rand::Rng;
use std::time::Duration;

/// Configuration for a cumulative sync coordinator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Owner of the cumulative record. Passed explicitly rather than read
    /// from a process-wide authentication session.
    pub user_id: String,
    /// Sensor counter value the first session starts from.
    pub initial_session_start: u64,
    /// Optional limit on a single store write.
    pub write_timeout: Option<Duration>,
    /// Retry configuration for `update_with_retry`.
    pub retry: RetryConfig,
    /// Number of published events kept for polling.
    pub feed_history: usize,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            initial_session_start: 0,
            write_timeout: None,
            retry: RetryConfig::default(),
            feed_history: 1024,
        }
    }

    /// Sets the sensor counter value the first session starts from.
    pub fn with_session_start(mut self, steps: u64) -> Self {
        self.initial_session_start = steps;
        self
    }

    /// Sets the write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the feed history size.
    pub fn with_feed_history(mut self, events: usize) -> Self {
        self.feed_history = events;
        self
    }
}

/// How `update_with_retry` re-flushes after a retryable write failure.
///
/// The sample is validated and submitted once; each retry is a `flush` of
/// whatever is pending at that point, so a retry may carry a newer sample
/// than the one the call started with. Fatal store errors end the loop at
/// once.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Write attempts per call, the initial submit included. `1` disables
    /// retries.
    pub max_attempts: u32,
    /// Sleep before the first flush retry.
    pub initial_delay: Duration,
    /// Upper bound for the sleep before any retry, jitter excluded.
    pub max_delay: Duration,
    /// Factor applied to the sleep after every retry.
    pub backoff_multiplier: f64,
    /// Adds up to a quarter of the sleep at random, so devices that lost the
    /// store at the same moment do not retry in lockstep.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Retries up to `max_attempts - 1` times, starting at 250ms and doubling
    /// up to 30s.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// A single write attempt; `update_with_retry` behaves like
    /// `update_cumulative_data`.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the sleep before the first retry.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Caps the sleep between retries.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor between consecutive retries.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables randomized sleeps.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Sleep before the `retry`-th flush of one `update_with_retry` call.
    ///
    /// `retry` counts from 1; 0 is the initial submit, which never waits.
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let Some(exponent) = retry.checked_sub(1) else {
            return Duration::ZERO;
        };
        let growth = self.backoff_multiplier.powi(exponent.min(i32::MAX as u32) as i32);
        let secs = (self.initial_delay.as_secs_f64() * growth).min(self.max_delay.as_secs_f64());

        let jitter = if self.add_jitter {
            secs * 0.25 * rand::thread_rng().gen::<f64>()
        } else {
            0.0
        };
        Duration::from_secs_f64(secs + jitter)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(4)
    }
}
