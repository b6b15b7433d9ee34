//! Circuit breaker to prevent cascade failures.
//!
//! When a backend fails repeatedly the circuit opens and subsequent calls are
//! rejected immediately with [`ResilienceError::CircuitOpen`] until the
//! recovery timeout has passed. The next call after that is a probe: while it
//! is in flight the breaker is half-open and lets nothing else through.
//!
//! ```text
//! Closed   → Open:     failure_count >= failure_threshold
//! Open     → HalfOpen: now - last_failure > recovery_timeout (on next call)
//! HalfOpen → Open:     any failure
//! HalfOpen → Closed:   success_count >= success_threshold
//! ```
//!
//! Every transition starts a new generation. A call only reports back to the
//! generation that admitted it, so a slow call let through while closed
//! cannot close or reopen the circuit around a later probe.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use switchyard_core::{CircuitBreakerConfig, ResilienceError};

/// State of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,

    /// Calls are rejected without running
    Open,

    /// Probing whether the backend recovered
    HalfOpen,
}

/// Health summary of one breaker, for readiness probes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitHealth {
    pub healthy: bool,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,

    /// Seconds until an open circuit admits a probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_reset_secs: Option<f64>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
    generation: u64,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            probe_in_flight: false,
            generation: 0,
        }
    }
}

/// Circuit breaker guarding a single operation.
///
/// One instance per protected operation; share it behind an `Arc`.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `f` unless the circuit is open.
    ///
    /// Any error from `f` is counted and returned as
    /// [`ResilienceError::ExecutionFailed`]. Dropping the returned future
    /// before it completes counts as neither success nor failure.
    pub async fn execute<T, E, F, Fut>(&self, f: F) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ResilienceError>,
    {
        let permit = self.acquire()?;

        match f().await {
            Ok(value) => {
                permit.succeeded();
                Ok(value)
            }
            Err(err) => {
                permit.failed();
                Err(ResilienceError::ExecutionFailed {
                    operation: self.name.clone(),
                    source: Box::new(err.into()),
                })
            }
        }
    }

    /// Decide whether a call may run, moving Open to HalfOpen when due.
    fn acquire(&self) -> Result<CallPermit<'_>, ResilienceError> {
        let mut inner = self.inner.lock();

        let state = inner.state;
        match state {
            CircuitState::Closed => Ok(CallPermit::new(self, false, inner.generation)),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                let timeout = self.config.recovery_timeout();

                if elapsed > timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen, "recovery_timeout_elapsed");
                    inner.success_count = 0;
                    inner.probe_in_flight = true;
                    Ok(CallPermit::new(self, true, inner.generation))
                } else {
                    Err(ResilienceError::CircuitOpen {
                        operation: self.name.clone(),
                        retry_after: timeout.saturating_sub(elapsed),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(ResilienceError::CircuitOpen {
                        operation: self.name.clone(),
                        retry_after: Duration::ZERO,
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(CallPermit::new(self, true, inner.generation))
                }
            }
        }
    }

    fn record_success(&self, probe: bool, generation: u64) {
        let mut inner = self.inner.lock();
        if self.is_stale(&inner, generation) {
            return;
        }
        if probe {
            inner.probe_in_flight = false;
        }

        let state = inner.state;
        match state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold() {
                    self.transition(&mut inner, CircuitState::Closed, "recovery_confirmed");
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            // nothing is admitted while open
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, probe: bool, generation: u64) {
        let mut inner = self.inner.lock();
        if self.is_stale(&inner, generation) {
            return;
        }
        if probe {
            inner.probe_in_flight = false;
        }

        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        let state = inner.state;
        match state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold() {
                    self.transition(&mut inner, CircuitState::Open, "failure_threshold_reached");
                }
            }
            CircuitState::HalfOpen => {
                inner.success_count = 0;
                self.transition(&mut inner, CircuitState::Open, "probe_failed");
            }
            CircuitState::Open => {}
        }
    }

    fn release_probe(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.probe_in_flight = false;
        }
    }

    fn is_stale(&self, inner: &BreakerState, generation: u64) -> bool {
        let stale = inner.generation != generation;
        if stale {
            tracing::debug!(
                breaker = %self.name,
                state = ?inner.state,
                "Ignoring outcome of a call admitted before the last transition"
            );
        }
        stale
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState, cause: &'static str) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.generation = inner.generation.wrapping_add(1);

        if to == CircuitState::Open {
            tracing::warn!(
                breaker = %self.name,
                from = ?from,
                to = ?to,
                cause,
                failures = inner.failure_count,
                "Circuit opened"
            );
        } else {
            tracing::info!(breaker = %self.name, from = ?from, to = ?to, cause, "Circuit state changed");
        }
    }

    /// Current state, without applying a pending recovery transition.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.inner.lock().success_count
    }

    /// Time left before an open circuit admits a probe.
    pub fn time_to_reset(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        self.time_to_reset_locked(&inner)
    }

    fn time_to_reset_locked(&self, inner: &BreakerState) -> Option<Duration> {
        match (inner.state, inner.last_failure) {
            (CircuitState::Open, Some(at)) => {
                Some(self.config.recovery_timeout().saturating_sub(at.elapsed()))
            }
            _ => None,
        }
    }

    pub fn health_status(&self) -> CircuitHealth {
        let inner = self.inner.lock();
        CircuitHealth {
            healthy: inner.state != CircuitState::Open,
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            time_to_reset_secs: self
                .time_to_reset_locked(&inner)
                .map(|d| d.as_secs_f64()),
        }
    }

    /// Open the circuit now, as if the threshold had just been reached.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        inner.success_count = 0;
        inner.probe_in_flight = false;
        self.transition(&mut inner, CircuitState::Open, "forced_open");
    }

    /// Close the circuit now and clear all counters.
    pub fn force_close(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
        self.transition(&mut inner, CircuitState::Closed, "forced_close");
    }

    /// Return to the initial state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed, "reset");
        }
        // calls admitted before the reset must not count against the fresh state
        let generation = inner.generation.wrapping_add(1);
        *inner = BreakerState::closed();
        inner.generation = generation;
    }
}

/// Admission ticket for one call.
///
/// Dropped without an outcome (the caller's future was cancelled), it only
/// frees the half-open probe slot.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    generation: u64,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool, generation: u64) -> Self {
        Self {
            breaker,
            probe,
            generation,
            settled: false,
        }
    }

    fn succeeded(mut self) {
        self.settled = true;
        self.breaker.record_success(self.probe, self.generation);
    }

    fn failed(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.probe, self.generation);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            tracing::debug!(breaker = %self.breaker.name, "Probe call cancelled");
            self.breaker.release_probe(self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use switchyard_core::BackendError;

    fn breaker(failure_threshold: u32, success_threshold: u32, recovery_secs: u64) -> CircuitBreaker {
        let config = CircuitBreakerConfig::new(
            failure_threshold,
            success_threshold,
            Duration::from_secs(recovery_secs),
        )
        .unwrap();
        CircuitBreaker::new("llm", config)
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), ResilienceError> {
        cb.execute(|| async { Err::<(), _>(BackendError::network("connection refused")) })
            .await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<u32, ResilienceError> {
        cb.execute(|| async { Ok::<_, BackendError>(7) }).await
    }

    /// Spawn a call that holds its permit until released.
    fn spawn_held(
        cb: &Arc<CircuitBreaker>,
        outcome: Result<(), BackendError>,
    ) -> (
        tokio::sync::oneshot::Sender<()>,
        tokio::task::JoinHandle<Result<(), ResilienceError>>,
    ) {
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let cb = cb.clone();
        let handle = tokio::spawn(async move {
            cb.execute(|| async move {
                let _ = release_rx.await;
                outcome
            })
            .await
        });
        (release_tx, handle)
    }

    #[tokio::test]
    async fn test_circuit_starts_closed() {
        let cb = breaker(3, 1, 60);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(succeed(&cb).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_circuit_opens_at_threshold_not_before() {
        let cb = breaker(3, 1, 60);

        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 2);

        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_failure_is_wrapped_as_execution_failed() {
        let cb = breaker(3, 1, 60);
        let err = fail(&cb).await.unwrap_err();
        match err {
            ResilienceError::ExecutionFailed { operation, source } => {
                assert_eq!(operation, "llm");
                assert_eq!(source.backend_kind(), Some(switchyard_core::ErrorKind::Network));
            }
            other => panic!("Expected ExecutionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let cb = breaker(3, 1, 60);

        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();

        // Success should reset
        succeed(&cb).await.unwrap();
        assert_eq!(cb.failure_count(), 0);

        // Need 3 more failures to open
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_rejects_without_calling() {
        let cb = breaker(1, 1, 60);
        fail(&cb).await.unwrap_err();

        let calls = AtomicU32::new(0);
        for _ in 0..5 {
            let result = cb
                .execute(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BackendError>(())
                })
                .await;
            assert!(result.unwrap_err().is_circuit_open());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // exactly at the timeout the circuit is still open
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(succeed(&cb).await.unwrap_err().is_circuit_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_scenario() {
        let cb = breaker(3, 2, 60);

        for _ in 0..3 {
            fail(&cb).await.unwrap_err();
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let err = succeed(&cb).await.unwrap_err();
        match err {
            ResilienceError::CircuitOpen { retry_after, .. } => {
                assert_eq!(retry_after, Duration::from_secs(60));
            }
            other => panic!("Expected CircuitOpen, got {other:?}"),
        }

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(succeed(&cb).await.unwrap(), 7);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.success_count(), 1);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(2, 2, 30);
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();

        tokio::time::advance(Duration::from_secs(31)).await;
        fail(&cb).await.unwrap_err();

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.success_count(), 0);
        assert!(succeed(&cb).await.unwrap_err().is_circuit_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_count_zero_after_closing() {
        let cb = breaker(1, 3, 10);

        fail(&cb).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(11)).await;
        for _ in 0..3 {
            succeed(&cb).await.unwrap();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.success_count(), 0);

        // a second recovery must start counting from zero again
        fail(&cb).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(11)).await;
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.success_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_in_half_open() {
        let cb = Arc::new(breaker(1, 1, 5));
        fail(&cb).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(6)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = {
            let cb = cb.clone();
            tokio::spawn(async move {
                cb.execute(|| async move {
                    let _ = release_rx.await;
                    Ok::<_, BackendError>(())
                })
                .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // second caller is turned away while the probe is in flight
        assert!(succeed(&cb).await.unwrap_err().is_circuit_open());

        release_tx.send(()).unwrap();
        probe.await.unwrap().unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_closed_success_does_not_close_during_probe() {
        let cb = Arc::new(breaker(1, 1, 5));
        let (release_slow, slow) = spawn_held(&cb, Ok(()));
        tokio::task::yield_now().await;

        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(6)).await;

        let (release_probe, probe) = spawn_held(&cb, Err(BackendError::network("still down")));
        tokio::task::yield_now().await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // the caller still gets its value, the breaker ignores it
        release_slow.send(()).unwrap();
        slow.await.unwrap().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.success_count(), 0);
        assert!(succeed(&cb).await.unwrap_err().is_circuit_open());

        release_probe.send(()).unwrap();
        probe.await.unwrap().unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_closed_failure_does_not_reopen_during_probe() {
        let cb = Arc::new(breaker(1, 1, 5));
        let (release_slow, slow) = spawn_held(&cb, Err(BackendError::network("reset")));
        tokio::task::yield_now().await;

        fail(&cb).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(6)).await;

        let (release_probe, probe) = spawn_held(&cb, Ok(()));
        tokio::task::yield_now().await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        release_slow.send(()).unwrap();
        assert!(matches!(
            slow.await.unwrap(),
            Err(ResilienceError::ExecutionFailed { .. })
        ));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.failure_count(), 1);

        release_probe.send(()).unwrap();
        probe.await.unwrap().unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_releases_slot_without_counting() {
        let cb = breaker(1, 1, 5);
        fail(&cb).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(6)).await;

        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            cb.execute(|| std::future::pending::<Result<(), BackendError>>()),
        )
        .await;
        assert!(cancelled.is_err());

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.failure_count(), 1);
        assert_eq!(cb.success_count(), 0);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_and_reset_hooks() {
        let cb = breaker(3, 1, 60);

        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.time_to_reset().is_some());
        assert!(succeed(&cb).await.unwrap_err().is_circuit_open());

        cb.force_close();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.time_to_reset(), None);

        fail(&cb).await.unwrap_err();
        cb.reset();
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_status() {
        let cb = breaker(1, 1, 60);
        let health = cb.health_status();
        assert!(health.healthy);
        assert_eq!(health.state, CircuitState::Closed);

        fail(&cb).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(20)).await;

        let health = cb.health_status();
        assert!(!health.healthy);
        assert_eq!(health.state, CircuitState::Open);
        assert_eq!(health.failure_count, 1);
        assert_eq!(health.time_to_reset_secs, Some(40.0));
    }
}
