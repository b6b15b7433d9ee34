//! Background health checking.
//!
//! # Responsibilities
//! - Periodically probe every backend
//! - Update each handle's cached state so routing never waits on I/O

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use switchyard_core::HealthReport;

use crate::backends::BackendHandle;

pub struct HealthMonitor {
    backends: Vec<Arc<BackendHandle>>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(backends: Vec<Arc<BackendHandle>>, interval: Duration) -> Self {
        Self { backends, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Probe every backend once, concurrently.
    pub async fn refresh_all(&self) -> Vec<HealthReport> {
        futures::future::join_all(self.backends.iter().map(|b| b.refresh())).await
    }

    /// Probe on every tick until `shutdown` fires. The first tick is
    /// immediate.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval = ?self.interval,
            backends = self.backends.len(),
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reports = self.refresh_all().await;
                    let healthy = reports.iter().filter(|r| r.healthy).count();
                    tracing::debug!(healthy, total = reports.len(), "Health check round finished");
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryBackend;
    use switchyard_core::ConnectionState;

    #[tokio::test(start_paused = true)]
    async fn test_monitor_refreshes_until_shutdown() {
        let llm = Arc::new(InMemoryBackend::new("llm"));
        let mcp = Arc::new(InMemoryBackend::new("mcp"));
        let llm_handle = Arc::new(BackendHandle::new(llm.clone()));
        let mcp_handle = Arc::new(BackendHandle::new(mcp.clone()));

        let monitor = HealthMonitor::new(
            vec![llm_handle.clone(), mcp_handle.clone()],
            Duration::from_secs(30),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(monitor.run(shutdown_rx));

        tokio::task::yield_now().await;
        assert_eq!(llm.checks(), 1);

        llm.set_state(ConnectionState::Failed);
        assert!(llm_handle.is_healthy());

        time::sleep(Duration::from_secs(31)).await;
        assert!(!llm_handle.is_healthy());
        assert!(mcp_handle.is_healthy());
        assert_eq!(mcp.checks(), 2);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();

        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(mcp.checks(), 2);
    }

    #[tokio::test]
    async fn test_refresh_all_reports_each_backend() {
        let down = Arc::new(InMemoryBackend::new("mcp").with_state(ConnectionState::Disconnected));
        let monitor = HealthMonitor::new(
            vec![
                Arc::new(BackendHandle::new(Arc::new(InMemoryBackend::new("llm")))),
                Arc::new(BackendHandle::new(down)),
            ],
            Duration::from_secs(30),
        );

        let reports = monitor.refresh_all().await;
        assert_eq!(reports.len(), 2);
        assert!(reports[0].healthy);
        assert!(!reports[1].healthy);
    }
}
