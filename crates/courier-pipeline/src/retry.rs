//! Exponential backoff with jitter for asynchronous operations.
//!
//! Each call site picks a profile. Publishing gets more attempts than
//! handling, and the initial broker connection gets the most.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier_core::rng::{RandomSource, ThreadRandom};
use tracing::{error, warn};

/// Upper bound of the random jitter, as a share of the computed delay.
pub const JITTER_RATIO: f64 = 0.3;

/// Backoff parameters for one call site.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Cap on the computed delay, before jitter.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Whether to add up to [`JITTER_RATIO`] of random extra delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(10_000),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Profile for emitting events onto the broker.
    #[must_use]
    pub fn publish() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(2_000),
            ..Self::default()
        }
    }

    /// Profile for subscriber-side handler invocation.
    #[must_use]
    pub fn handling() -> Self {
        Self::default()
    }

    /// Profile for establishing the broker connection at startup.
    #[must_use]
    pub fn connect() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(5_000),
            ..Self::default()
        }
    }

    /// A single attempt with no waiting.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based),
    /// without jitter: `min(initial * factor^(attempt-1), max)`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let seconds = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !seconds.is_finite() || seconds >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(seconds.max(0.0))
    }
}

/// Runs fallible async operations until they succeed or a profile's attempts
/// run out.
#[derive(Clone)]
pub struct RetryExecutor {
    rng: Arc<Mutex<dyn RandomSource>>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(ThreadRandom)
    }
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor").finish_non_exhaustive()
    }
}

impl RetryExecutor {
    /// Creates an executor drawing jitter from `rng`.
    pub fn new(rng: impl RandomSource + 'static) -> Self {
        Self {
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    /// Invokes `operation` until it returns `Ok` or `config.max_attempts`
    /// attempts have failed.
    ///
    /// Logs a warning before each retry and an error on final failure.
    ///
    /// # Errors
    ///
    /// Returns the error from the last attempt once every attempt has failed.
    pub async fn with_retry<T, E, F, Fut>(
        &self,
        operation: &str,
        config: &RetryConfig,
        mut attempt_fn: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= max_attempts => {
                    error!(
                        operation,
                        attempts = attempt,
                        error = %err,
                        "operation failed after final retry attempt"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.delay_for(config, attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Backoff delay for `attempt`, with jitter applied when enabled.
    #[must_use]
    pub fn delay_for(&self, config: &RetryConfig, attempt: u32) -> Duration {
        let delay = config.backoff_delay(attempt);
        if !config.jitter {
            return delay;
        }
        delay + delay.mul_f64(JITTER_RATIO * self.jitter_fraction())
    }

    fn jitter_fraction(&self) -> f64 {
        let fraction = match self.rng.lock() {
            Ok(mut rng) => rng.next_f64(),
            Err(poisoned) => poisoned.into_inner().next_f64(),
        };
        fraction.clamp(0.0, 1.0)
    }
}
