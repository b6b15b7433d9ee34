//! # switchyard-runtime
//!
//! Async protection and routing for calls between two backends.
//!
//! This crate provides:
//! - [`CircuitBreaker`], [`RetryPolicy`] and [`TimeoutPolicy`], composed by
//!   [`ResilienceChain`] in the order breaker → retry → timeout
//! - [`BackendHandle`]s caching backend health, refreshed by a
//!   [`HealthMonitor`]
//! - [`TrafficRouter`] choosing a backend per request from cached health and
//!   an optional traffic split
//! - [`Dispatcher`] running a request through the chosen backend's chain with
//!   the other backend as fallback
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use switchyard_core::SwitchyardConfig;
//! use switchyard_runtime::{InMemoryBackend, Switchyard};
//!
//! let config = SwitchyardConfig::from_yaml_file("switchyard.yaml")?;
//! let yard = Switchyard::start(
//!     &config,
//!     Arc::new(InMemoryBackend::new("llm")),
//!     Arc::new(InMemoryBackend::new("mcp")),
//! )?;
//!
//! let answer = yard
//!     .dispatcher()
//!     .dispatch("req-42", "chat", |target| async move { call_backend(target).await })
//!     .await?;
//! println!("served by {}", answer.decision.service);
//!
//! yard.shutdown().await?;
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use switchyard_core::{
    ConnectionState, HealthReport, MetricsSnapshot, RoutingMetrics, ServiceTarget,
    SwitchyardConfig, ValidationError,
};

pub mod backends;
pub mod dispatcher;
pub mod health;
pub mod resilience;
pub mod router;

pub use backends::{BackendClient, BackendHandle, InMemoryBackend};
#[cfg(feature = "http")]
pub use backends::HttpBackend;
pub use dispatcher::{Dispatched, Dispatcher};
pub use health::HealthMonitor;
pub use resilience::{
    ChainHealth, CircuitBreaker, CircuitHealth, CircuitState, NoFallback, ResilienceChain,
    ResilienceStrategy, RetryPolicy, RetryStats, Strategy, StrategyHealth, TimeoutPolicy,
    TimeoutStats,
};
pub use router::TrafficRouter;

/// Errors from the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("health monitor task failed: {0}")]
    Monitor(#[from] tokio::task::JoinError),
}

/// Cached status of one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendStatus {
    pub target: ServiceTarget,
    pub name: String,
    pub state: ConnectionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_report: Option<HealthReport>,
}

/// Everything a readiness endpoint would want to show.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub backends: Vec<BackendStatus>,
    pub chains: Vec<ChainHealth>,
    pub metrics: MetricsSnapshot,
}

/// A running dispatcher plus its background health monitor.
pub struct Switchyard {
    dispatcher: Arc<Dispatcher>,
    shutdown: broadcast::Sender<()>,
    monitor: JoinHandle<()>,
}

impl Switchyard {
    /// Wire both backends into a dispatcher and start health checking.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: &SwitchyardConfig,
        primary: Arc<dyn BackendClient>,
        secondary: Arc<dyn BackendClient>,
    ) -> Result<Self, RuntimeError> {
        let primary = Arc::new(BackendHandle::new(primary));
        let secondary = Arc::new(BackendHandle::new(secondary));
        let metrics = Arc::new(RoutingMetrics::new());

        let dispatcher =
            Dispatcher::from_config(config, primary.clone(), secondary.clone(), metrics)?;

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let monitor = HealthMonitor::new(vec![primary, secondary], config.router.health_check_interval);
        let monitor = tokio::spawn(monitor.run(shutdown_rx));

        Ok(Self {
            dispatcher: Arc::new(dispatcher),
            shutdown,
            monitor,
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn router(&self) -> &Arc<TrafficRouter> {
        self.dispatcher.router()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.router().metrics().snapshot()
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        let targets = [ServiceTarget::Primary, ServiceTarget::Secondary];
        let backends = targets
            .iter()
            .map(|&target| {
                let handle = self.router().handle(target);
                BackendStatus {
                    target,
                    name: handle.name().to_string(),
                    state: handle.cached_state(),
                    last_report: handle.last_report(),
                }
            })
            .collect();
        let chains = targets
            .iter()
            .map(|&target| self.dispatcher.chain(target).health_status())
            .collect();

        HealthSnapshot {
            backends,
            chains,
            metrics: self.metrics(),
        }
    }

    /// Stop the health monitor and wait for it to exit.
    pub async fn shutdown(self) -> Result<(), RuntimeError> {
        // no receiver means the monitor already exited
        let _ = self.shutdown.send(());
        self.monitor.await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use switchyard_core::{BackendError, RouterConfig};

    #[tokio::test(start_paused = true)]
    async fn test_switchyard_routes_and_reports() {
        let config = SwitchyardConfig::default();
        let llm = Arc::new(InMemoryBackend::new("llm"));
        let mcp = Arc::new(InMemoryBackend::new("mcp"));
        let yard = Switchyard::start(&config, llm.clone(), mcp).unwrap();

        let served = yard
            .dispatcher()
            .dispatch("req-1", "chat", |target| async move {
                Ok::<_, BackendError>(target)
            })
            .await
            .unwrap();
        assert_eq!(served.value, ServiceTarget::Primary);

        llm.set_state(ConnectionState::Disconnected);
        tokio::time::sleep(Duration::from_secs(31)).await;

        let snapshot = yard.health_snapshot();
        assert_eq!(snapshot.backends[0].name, "llm");
        assert_eq!(snapshot.backends[0].state, ConnectionState::Disconnected);
        assert_eq!(snapshot.backends[1].state, ConnectionState::Connected);
        assert_eq!(snapshot.chains.len(), 2);
        assert_eq!(snapshot.metrics.success_count, 1);

        let served = yard
            .dispatcher()
            .dispatch("req-2", "chat", |target| async move {
                Ok::<_, BackendError>(target)
            })
            .await
            .unwrap();
        assert_eq!(served.value, ServiceTarget::Secondary);

        yard.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_router_config_is_rejected() {
        let config = SwitchyardConfig {
            router: RouterConfig {
                primary_traffic_percentage: 150.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = Switchyard::start(
            &config,
            Arc::new(InMemoryBackend::new("llm")),
            Arc::new(InMemoryBackend::new("mcp")),
        );
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }

    #[test]
    fn test_snapshot_serializes() {
        let status = BackendStatus {
            target: ServiceTarget::Secondary,
            name: "mcp".to_string(),
            state: ConnectionState::Failed,
            last_report: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["target"], "secondary");
        assert_eq!(json["state"], "failed");
        assert!(json.get("last_report").is_none());
    }
}
