//! Sample Retry Policy
//!
//! Bounded retry for price samples with a fixed backoff (two retries,
//! 500 ms apart by default). Retrying stops as soon as the owning monitor
//! is cancelled: no further sleep or attempt happens after that point.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Configuration for sample retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::fixed(2, Duration::from_millis(500))
    }
}

impl RetryConfig {
    /// Fixed backoff with `max_retries` retries spaced by `delay`.
    #[must_use]
    pub const fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }
}

/// Stateful retry schedule for one operation.
#[derive(Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
    retries: u32,
}

impl RetryPolicy {
    /// Create a fresh schedule.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config, retries: 0 }
    }

    /// Delay before the next retry, or `None` once retries are exhausted.
    #[must_use]
    pub const fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.config.max_retries {
            return None;
        }
        self.retries += 1;
        Some(self.config.delay)
    }

    /// Retries used so far.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.retries
    }
}

/// Run `operation` until it succeeds, the retries in `config` run out, or
/// `cancel` fires.
///
/// An attempt already running when `cancel` fires is awaited, but nothing
/// is started afterwards.
///
/// # Errors
///
/// Returns the error of the last attempt made.
pub async fn retry<T, E, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut policy = RetryPolicy::new(*config);

    loop {
        let e = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if cancel.is_cancelled() {
            return Err(e);
        }
        let Some(delay) = policy.next_delay() else {
            return Err(e);
        };

        tracing::debug!(
            attempt = policy.retries(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %e,
            "Retrying after failure"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(e),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn default_is_fixed_two_retries() {
        let config = RetryConfig::default();
        assert_eq!(config, RetryConfig::fixed(2, Duration::from_millis(500)));

        let mut policy = RetryPolicy::new(config);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.retries(), 2);
    }

    #[test]
    fn zero_retries_never_waits() {
        let mut policy = RetryPolicy::new(RetryConfig::fixed(0, Duration::from_millis(10)));
        assert_eq!(policy.next_delay(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_after_failures() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let started = tokio::time::Instant::now();

        let result: Result<&str, String> = retry(
            &RetryConfig::default(),
            &CancellationToken::new(),
            move || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("not yet".to_string())
                } else {
                    Ok("1.00")
                }
            },
        )
        .await;

        assert_eq!(result, Ok("1.00"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_with_last_error() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let result: Result<(), String> = retry(
            &RetryConfig::default(),
            &CancellationToken::new(),
            move || async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                Err(format!("failure {n}"))
            },
        )
        .await;

        assert_eq!(result, Err("failure 2".to_string()));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_attempts() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.cancel();
        });

        let started = tokio::time::Instant::now();
        let result: Result<(), String> = retry(
            &RetryConfig::fixed(5, Duration::from_millis(300)),
            &cancel,
            move || async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                Err(format!("failure {n}"))
            },
        )
        .await;

        assert_eq!(result, Err("failure 0".to_string()));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn already_cancelled_makes_one_attempt() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), String> = retry(
            &RetryConfig::fixed(3, Duration::from_secs(60)),
            &cancel,
            move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
