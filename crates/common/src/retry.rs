//! Retry utilities.
//!
//! This module provides utilities for retrying operations with exponential backoff,
//! bounded either by a number of attempts, a total elapsed-time budget, or both.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 means no retries)
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 for doubling)
    pub backoff_multiplier: f64,

    /// Jitter applied to each delay, as a fraction of the delay (0.0 disables it)
    pub randomization_factor: f64,

    /// Total time budget across all attempts, measured from the first attempt
    pub max_elapsed_time: Option<Duration>,
}

impl RetryConfig {
    /// Create a configuration that keeps retrying until `budget` has elapsed.
    ///
    /// Starts at 500ms, grows by 1.5x with 50% jitter and never waits longer than
    /// 60s between attempts. Used to wait for services whose startup latency is
    /// unknown.
    pub fn connect_budget(budget: Duration) -> Self {
        Self {
            max_attempts: u32::MAX,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 1.5,
            randomization_factor: 0.5,
            max_elapsed_time: Some(budget),
        }
    }

    /// Set the jitter factor. Values are clamped to `0.0..=1.0`.
    pub fn with_randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor.clamp(0.0, 1.0);
        self
    }
}

/// Exponential backoff calculator.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: RetryConfig,
    current_attempt: u32,
    started_at: Instant,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff calculator.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            current_attempt: 0,
            started_at: Instant::now(),
        }
    }

    /// Calculate the un-jittered delay for the current attempt.
    pub fn delay(&self) -> Duration {
        if self.current_attempt == 0 {
            return Duration::from_millis(0);
        }

        let delay_ms = self.config.initial_delay.as_millis() as f64
            * self.config.backoff_multiplier.powi((self.current_attempt - 1) as i32);

        let delay = Duration::from_millis(delay_ms.min(u64::MAX as f64) as u64);
        delay.min(self.config.max_delay)
    }

    /// Calculate the delay for the current attempt with jitter applied.
    pub fn jittered_delay(&self) -> Duration {
        let delay = self.delay();
        let factor = self.config.randomization_factor;
        if factor <= 0.0 || delay.is_zero() {
            return delay;
        }

        let scale = rand::thread_rng().gen_range((1.0 - factor)..=(1.0 + factor));
        delay.mul_f64(scale)
    }

    /// Move to the next attempt.
    pub fn next_attempt(&mut self) {
        self.current_attempt = self.current_attempt.saturating_add(1);
    }

    /// Number of failed attempts recorded so far.
    pub fn attempt(&self) -> u32 {
        self.current_attempt
    }

    /// Time since the backoff was created.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Check if there are more attempts remaining.
    pub fn has_attempts_remaining(&self) -> bool {
        if self.current_attempt > self.config.max_attempts {
            return false;
        }

        match self.config.max_elapsed_time {
            Some(budget) => self.elapsed() < budget,
            None => true,
        }
    }

    /// Record a failure and return how long to wait before the next attempt.
    ///
    /// Returns `None` once the attempt limit is reached or the next wait would
    /// overrun the elapsed-time budget.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        self.next_attempt();

        if !self.has_attempts_remaining() {
            return None;
        }

        let delay = self.jittered_delay();
        if let Some(budget) = self.config.max_elapsed_time {
            if self.elapsed() + delay > budget {
                return None;
            }
        }

        Some(delay)
    }
}

/// Retry an async operation with exponential backoff while `should_retry`
/// accepts the error.
///
/// The first error the predicate rejects is returned immediately; otherwise the
/// last error is returned once the backoff is exhausted.
///
/// # Examples
///
/// ```no_run
/// use storage_fixture_common::retry::{retry_with_predicate, RetryConfig};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let config = RetryConfig::connect_budget(Duration::from_secs(60));
///
///     let result = retry_with_predicate(
///         config,
///         || async {
///             Err::<(), _>(std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout"))
///         },
///         |err| err.kind() == std::io::ErrorKind::TimedOut
///     ).await;
/// }
/// ```
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    config: RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut backoff = ExponentialBackoff::new(config);

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if !should_retry(&error) {
                    tracing::debug!(error = %error, "Not retrying operation after error");
                    return Err(error);
                }

                let Some(delay) = backoff.next_backoff() else {
                    return Err(error);
                };

                tracing::debug!(
                    attempt = backoff.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying operation after retryable error"
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn doubling(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
        }
    }

    fn refused() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused")
    }

    #[test]
    fn test_connect_budget_config() {
        let config = RetryConfig::connect_budget(Duration::from_secs(60));
        assert_eq!(config.max_elapsed_time, Some(Duration::from_secs(60)));
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.backoff_multiplier, 1.5);
        assert_eq!(config.randomization_factor, 0.5);
        assert_eq!(config.max_attempts, u32::MAX);
    }

    #[test]
    fn test_randomization_factor_is_clamped() {
        let config = doubling(3).with_randomization_factor(4.0);
        assert_eq!(config.randomization_factor, 1.0);
    }

    #[tokio::test]
    async fn test_exponential_backoff() {
        let mut backoff = ExponentialBackoff::new(doubling(3));

        // First attempt has no delay
        assert_eq!(backoff.delay(), Duration::from_millis(0));
        assert!(backoff.has_attempts_remaining());

        backoff.next_attempt();
        assert_eq!(backoff.delay(), Duration::from_millis(100));
        assert!(backoff.has_attempts_remaining());

        backoff.next_attempt();
        assert_eq!(backoff.delay(), Duration::from_millis(200));
        assert!(backoff.has_attempts_remaining());

        backoff.next_attempt();
        assert_eq!(backoff.delay(), Duration::from_millis(400));
        assert!(backoff.has_attempts_remaining());

        // No more attempts
        backoff.next_attempt();
        assert!(!backoff.has_attempts_remaining());
    }

    #[tokio::test]
    async fn test_exponential_backoff_max_delay() {
        let mut backoff = ExponentialBackoff::new(doubling(10));

        for _ in 0..10 {
            backoff.next_attempt();
        }

        assert_eq!(backoff.delay(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_backoff_stops_at_elapsed_budget() {
        let config = RetryConfig::connect_budget(Duration::from_secs(5))
            .with_randomization_factor(0.0);
        let mut backoff = ExponentialBackoff::new(config);

        let mut waited = Vec::new();
        while let Some(delay) = backoff.next_backoff() {
            waited.push(delay);
            sleep(delay).await;
        }

        assert_eq!(
            waited,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(750),
                Duration::from_millis(1125),
                Duration::from_millis(1687),
            ]
        );
        assert!(backoff.elapsed() <= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_eventual_success() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_predicate(
            doubling(3),
            || {
                let counter = counter_clone.clone();
                async move {
                    let count = counter.fetch_add(1, Ordering::SeqCst);
                    if count < 2 {
                        Err(refused())
                    } else {
                        Ok(42)
                    }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_predicate(
            doubling(2),
            || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(refused())
                }
            },
            |_| true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3); // Initial + 2 retries
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_budget() {
        let config = RetryConfig::connect_budget(Duration::from_secs(5))
            .with_randomization_factor(0.0);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let started = Instant::now();

        let result = retry_with_predicate(
            config,
            || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(refused())
                }
            },
            |err| err.kind() == std::io::ErrorKind::ConnectionRefused,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(started.elapsed() <= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_stops_on_rejected_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_predicate(
            RetryConfig::connect_budget(Duration::from_secs(60)),
            || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        "access denied",
                    ))
                }
            },
            |err| err.kind() == std::io::ErrorKind::ConnectionRefused,
        )
        .await;

        // Should not retry because predicate returns false
        assert_eq!(
            result.unwrap_err().kind(),
            std::io::ErrorKind::PermissionDenied
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #[test]
        fn jittered_delay_stays_within_factor(attempts in 1u32..12, factor in 0.0f64..=1.0) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            let _guard = rt.enter();

            let config = RetryConfig::connect_budget(Duration::from_secs(60))
                .with_randomization_factor(factor);
            let mut backoff = ExponentialBackoff::new(config);
            for _ in 0..attempts {
                backoff.next_attempt();
            }

            let base = backoff.delay().as_secs_f64();
            let jittered = backoff.jittered_delay().as_secs_f64();
            prop_assert!(jittered >= base * (1.0 - factor) - 1e-6);
            prop_assert!(jittered <= base * (1.0 + factor) + 1e-6);
        }
    }
}
