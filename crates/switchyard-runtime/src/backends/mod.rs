//! Backend client abstraction.
//!
//! Routing never talks to a backend directly. It reads the state cached in a
//! [`BackendHandle`], which the [`HealthMonitor`](crate::HealthMonitor)
//! refreshes in the background.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use switchyard_core::{ConnectionState, HealthReport};

#[cfg(feature = "http")]
mod http;
mod memory;

#[cfg(feature = "http")]
pub use http::HttpBackend;
pub use memory::InMemoryBackend;

/// A backend that requests can be routed to.
///
/// Implementations own their connection; the router only needs to know
/// whether it is usable.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Name used in logs and health reports.
    fn name(&self) -> &str;

    /// State as the client currently knows it, without any I/O.
    fn connection_state(&self) -> ConnectionState;

    /// Probe the backend.
    async fn health_check(&self) -> HealthReport;
}

/// A client plus its last-known health.
pub struct BackendHandle {
    client: Arc<dyn BackendClient>,
    state: AtomicU8,
    last_report: RwLock<Option<HealthReport>>,
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("name", &self.client.name())
            .field("state", &self.cached_state())
            .finish()
    }
}

impl BackendHandle {
    /// Wrap a client, seeding the cache from its current state.
    pub fn new(client: Arc<dyn BackendClient>) -> Self {
        let state = client.connection_state();
        Self {
            client,
            state: AtomicU8::new(state as u8),
            last_report: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.client.name()
    }

    pub fn client(&self) -> &Arc<dyn BackendClient> {
        &self.client
    }

    /// Cached state; never blocks on I/O.
    pub fn cached_state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.cached_state().is_healthy()
    }

    pub fn last_report(&self) -> Option<HealthReport> {
        self.last_report.read().clone()
    }

    /// Override the cached state, e.g. after an out-of-band failure signal.
    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Probe the client and update the cache.
    pub async fn refresh(&self) -> HealthReport {
        let report = self.client.health_check().await;
        let previous = ConnectionState::from(self.state.swap(report.state as u8, Ordering::AcqRel));

        if previous != report.state {
            if report.state.is_healthy() {
                tracing::info!(backend = %self.name(), from = ?previous, to = ?report.state, "Backend recovered");
            } else {
                tracing::warn!(
                    backend = %self.name(),
                    from = ?previous,
                    to = ?report.state,
                    detail = report.detail.as_deref().unwrap_or(""),
                    "Backend became unhealthy"
                );
            }
        }

        *self.last_report.write() = Some(report.clone());
        report
    }
}
