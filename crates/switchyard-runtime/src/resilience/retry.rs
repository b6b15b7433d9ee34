//! Bounded retry with exponential backoff and jitter.
//!
//! A failure is retried only if its [`ErrorKind`](switchyard_core::ErrorKind)
//! is in the configured retryable set. That check comes before the attempt
//! count, so a validation or auth failure ends the loop at any attempt and is
//! returned unchanged.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use switchyard_core::{RandomSource, ResilienceError, RetryConfig, SecureBackoff};

/// Cumulative retry counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStats {
    /// Calls to `execute`
    pub calls: u64,

    /// Sleeps scheduled between attempts
    pub retries: u64,

    /// Calls that succeeded after at least one retry
    pub recoveries: u64,

    /// Calls that ran out of attempts
    pub exhausted: u64,
}

#[derive(Debug, Default)]
struct RetryCounters {
    calls: AtomicU64,
    retries: AtomicU64,
    recoveries: AtomicU64,
    exhausted: AtomicU64,
}

/// Retry loop around a re-callable async operation.
#[derive(Debug)]
pub struct RetryPolicy {
    name: String,
    config: RetryConfig,
    backoff: SecureBackoff,
    counters: RetryCounters,
}

impl RetryPolicy {
    /// Retry policy with jitter from the OS generator.
    pub fn new(name: impl Into<String>, config: RetryConfig) -> Self {
        let backoff = SecureBackoff::from_config(&config);
        Self::with_backoff(name, config, backoff)
    }

    /// Retry policy drawing jitter from `random`.
    pub fn with_random(
        name: impl Into<String>,
        config: RetryConfig,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        let backoff =
            SecureBackoff::with_random(config.exponential_base(), config.jitter_enabled(), random);
        Self::with_backoff(name, config, backoff)
    }

    fn with_backoff(name: impl Into<String>, config: RetryConfig, backoff: SecureBackoff) -> Self {
        Self {
            name: name.into(),
            config,
            backoff,
            counters: RetryCounters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `f`, retrying retryable failures up to `max_retries` times.
    ///
    /// Returns the first success, the first non-retryable error as-is, or
    /// [`ResilienceError::RetryExhausted`] carrying the last error.
    pub async fn execute<T, E, F, Fut>(&self, mut f: F) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ResilienceError>,
    {
        self.counters.calls.fetch_add(1, Ordering::Relaxed);
        let max_retries = self.config.max_retries();
        let mut attempt: u32 = 0;

        loop {
            let err: ResilienceError = match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        self.counters.recoveries.fetch_add(1, Ordering::Relaxed);
                        tracing::info!(policy = %self.name, attempts = attempt + 1, "Recovered after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err.into(),
            };

            let retryable = err
                .backend_kind()
                .map(|kind| self.config.is_retryable(kind))
                .unwrap_or(false);
            if !retryable {
                tracing::debug!(policy = %self.name, attempt, error = %err, "Non-retryable failure");
                return Err(err);
            }

            if attempt >= max_retries {
                self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                let attempts = max_retries.saturating_add(1);
                tracing::warn!(policy = %self.name, attempts, error = %err, "Retries exhausted");
                return Err(ResilienceError::RetryExhausted {
                    attempts,
                    last: Box::new(err),
                });
            }

            let delay = self
                .backoff
                .delay(self.config.base_delay(), attempt, self.config.max_delay());
            self.counters.retries.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                policy = %self.name,
                attempt = attempt + 1,
                delay = ?delay,
                error = %err,
                "Retrying after backoff"
            );

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    pub fn stats(&self) -> RetryStats {
        RetryStats {
            calls: self.counters.calls.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            recoveries: self.counters.recoveries.load(Ordering::Relaxed),
            exhausted: self.counters.exhausted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use switchyard_core::{BackendError, ErrorKind, FixedRandom};
    use tokio::time::Instant;

    fn policy(max_retries: u32) -> RetryPolicy {
        let config = RetryConfig::builder()
            .max_retries(max_retries)
            .base_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(30))
            .jitter(false)
            .build()
            .unwrap();
        RetryPolicy::new("llm", config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_calls_max_plus_one() {
        let policy = policy(3);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BackendError::network("reset by peer"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(ResilienceError::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert_eq!(last.backend_kind(), Some(ErrorKind::Network));
            }
            other => panic!("Expected RetryExhausted, got {other:?}"),
        }
        assert_eq!(policy.stats().exhausted, 1);
        assert_eq!(policy.stats().retries, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_returns_original_once() {
        let policy = policy(3);
        let calls = AtomicU32::new(0);
        let original = BackendError::validation("prompt too long");

        let result: Result<(), _> = policy
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(original.clone())
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result {
            Err(ResilienceError::Backend(err)) => assert_eq!(err, original),
            other => panic!("Expected Backend error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_short_circuits_mid_loop() {
        let policy = policy(5);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .execute(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(BackendError::timeout("slow"))
                } else {
                    Err(BackendError::authentication("bad key"))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            result.unwrap_err().backend_kind(),
            Some(ErrorKind::Authentication)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_with_exponential_delays() {
        let policy = policy(3);
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = policy
            .execute(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(BackendError::unavailable("503"))
                } else {
                    Ok("answer")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "answer");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // slept 1s then 2s
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(policy.stats().recoveries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jittered_delays_follow_random_source() {
        let config = RetryConfig::builder()
            .max_retries(2)
            .base_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(30))
            .jitter(true)
            .build()
            .unwrap();
        // 0.0 lands on the bottom of every jitter window
        let policy = RetryPolicy::with_random("llm", config, Arc::new(FixedRandom::new(0.0)));
        let start = Instant::now();
        let attempts_at = parking_lot::Mutex::new(Vec::new());

        let result: Result<(), _> = policy
            .execute(|| async {
                attempts_at.lock().push(start.elapsed());
                Err(BackendError::network("down"))
            })
            .await;

        assert!(matches!(
            result,
            Err(ResilienceError::RetryExhausted { attempts: 3, .. })
        ));
        assert_eq!(
            *attempts_at.lock(),
            vec![
                Duration::ZERO,
                Duration::from_millis(750),
                Duration::from_millis(2250),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_is_single_attempt() {
        let policy = policy(0);
        let result: Result<(), _> = policy
            .execute(|| async { Err(BackendError::network("down")) })
            .await;
        assert!(matches!(
            result,
            Err(ResilienceError::RetryExhausted { attempts: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_sleep_stops_retrying() {
        let policy = policy(3);
        let calls = AtomicU32::new(0);

        let outcome = tokio::time::timeout(
            Duration::from_millis(1500),
            policy.execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(BackendError::network("down"))
            }),
        )
        .await;

        assert!(outcome.is_err());
        // attempt at t=0, retry at t=1s, then cancelled while sleeping 2s
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_retryable_set() {
        let config = RetryConfig::builder()
            .max_retries(2)
            .jitter(false)
            .retryable_kinds([ErrorKind::RateLimited])
            .build()
            .unwrap();
        let policy = RetryPolicy::new("mcp", config);
        let calls = AtomicU32::new(0);

        let _ = policy
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(BackendError::network("down"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
