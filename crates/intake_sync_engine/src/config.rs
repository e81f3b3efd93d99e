//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Device ID (unique per client install), used in logs.
    pub device_id: String,
    /// Retry configuration for transient failures.
    pub retry: RetryConfig,
    /// Upper bound on a single delivery attempt.
    pub request_timeout: Duration,
    /// Window within which connectivity flaps collapse into one edge.
    pub connectivity_debounce: Duration,
    /// Dead journal records tolerated before the journal is rewritten.
    pub compaction_threshold: usize,
    /// Whether the background driver flushes as soon as something is queued.
    pub flush_on_enqueue: bool,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
            connectivity_debounce: Duration::from_millis(500),
            compaction_threshold: 256,
            flush_on_enqueue: true,
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the connectivity debounce window.
    pub fn with_connectivity_debounce(mut self, window: Duration) -> Self {
        self.connectivity_debounce = window;
        self
    }

    /// Sets the compaction threshold.
    pub fn with_compaction_threshold(mut self, threshold: usize) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    /// Sets whether enqueue wakes the driver.
    pub fn with_flush_on_enqueue(mut self, enabled: bool) -> Self {
        self.flush_on_enqueue = enabled;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("local")
    }
}

/// How randomness is applied to retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// Uniformly random delay between zero and the computed ceiling.
    Full,
    /// Always wait the full ceiling.
    None,
}

/// Configuration for retry behavior.
///
/// Transient failures are retried without limit; only the spacing between
/// attempts is configured here.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay ceiling after the first failure.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Jitter mode.
    pub jitter: Jitter,
}

impl RetryConfig {
    /// Creates the default policy: 1s base, 30s cap, doubling, full jitter.
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: Jitter::Full,
        }
    }

    /// Creates a policy that retries immediately.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: Jitter::None,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the jitter mode.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Upper bound of the delay after `attempt` failures.
    pub fn ceiling_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else if capped > 0.0 {
            self.max_delay
        } else {
            Duration::ZERO
        }
    }

    /// Calculates the delay after `attempt` failures (0 means none yet).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling_for_attempt(attempt);
        match self.jitter {
            Jitter::None => ceiling,
            Jitter::Full if ceiling.is_zero() => ceiling,
            Jitter::Full => {
                let secs = rand::thread_rng().gen_range(0.0..=ceiling.as_secs_f64());
                Duration::from_secs_f64(secs)
            }
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}
