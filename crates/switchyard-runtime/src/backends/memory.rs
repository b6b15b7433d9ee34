//! In-process backend with a settable state.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use switchyard_core::{ConnectionState, HealthReport};

use super::BackendClient;

/// Backend whose health is whatever it was last told.
///
/// Used for tests and the CLI simulator.
#[derive(Debug)]
pub struct InMemoryBackend {
    name: String,
    state: AtomicU8,
    latency_ms: AtomicU64,
    checks: AtomicU64,
}

impl InMemoryBackend {
    /// A connected backend with zero latency.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(ConnectionState::Connected as u8),
            latency_ms: AtomicU64::new(0),
            checks: AtomicU64::new(0),
        }
    }

    pub fn with_state(self, state: ConnectionState) -> Self {
        self.set_state(state);
        self
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn set_latency_ms(&self, latency_ms: u64) {
        self.latency_ms.store(latency_ms, Ordering::Relaxed);
    }

    /// Number of health checks served.
    pub fn checks(&self) -> u64 {
        self.checks.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BackendClient for InMemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn connection_state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::Acquire))
    }

    async fn health_check(&self) -> HealthReport {
        self.checks.fetch_add(1, Ordering::Relaxed);
        let latency_ms = self.latency_ms.load(Ordering::Relaxed);

        match self.connection_state() {
            ConnectionState::Connected => HealthReport::healthy(latency_ms),
            state => HealthReport::unhealthy(state, latency_ms, format!("{} is {:?}", self.name, state)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_report_follows_state() {
        let backend = InMemoryBackend::new("llm");
        backend.set_latency_ms(12);

        let report = backend.health_check().await;
        assert!(report.healthy);
        assert_eq!(report.latency_ms, 12);

        backend.set_state(ConnectionState::Failed);
        let report = backend.health_check().await;
        assert!(!report.healthy);
        assert_eq!(report.state, ConnectionState::Failed);
        assert!(report.detail.is_some());
        assert_eq!(backend.checks(), 2);
    }
}
