//! HTTP backend probed through `GET {base_url}/health`.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use switchyard_core::{BackendError, ConnectionState, HealthReport};

use super::BackendClient;

/// Remote backend reachable over HTTP.
///
/// Starts out `Disconnected` until the first successful probe.
pub struct HttpBackend {
    name: String,
    base_url: String,
    client: reqwest::Client,
    state: AtomicU8,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpBackend {
    /// Create a backend whose probes give up after `probe_timeout`.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        probe_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(probe_timeout)
            .build()
            .map_err(|e| BackendError::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }
}

#[async_trait]
impl BackendClient for HttpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn connection_state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::Acquire))
    }

    async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let response = self.client.get(self.health_url()).send().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let report = match response {
            Ok(response) if response.status().is_success() => HealthReport::healthy(latency_ms),
            Ok(response) => {
                tracing::warn!(backend = %self.name, status = %response.status(), "Health check failed: non-success status");
                HealthReport::unhealthy(
                    ConnectionState::Failed,
                    latency_ms,
                    format!("status {}", response.status()),
                )
            }
            Err(e) => {
                tracing::warn!(backend = %self.name, error = %e, "Health check failed: connection error");
                HealthReport::unhealthy(ConnectionState::Disconnected, latency_ms, e.to_string())
            }
        };

        self.state.store(report.state as u8, Ordering::Release);
        report
    }
}
