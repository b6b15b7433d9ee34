//! # switchyard-core
//!
//! Deterministic building blocks for protecting and routing calls between
//! two backends (an LLM router and an MCP orchestrator, say).
//!
//! This crate answers the questions that need no I/O:
//! - How long should the next retry wait?
//! - Which bucket does this request fall into?
//! - Is this configuration usable?
//! - How has traffic been split so far?
//!
//! The async machinery (circuit breaker, retry loop, router) lives in
//! `switchyard-runtime`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use switchyard_core::{SecureBackoff, SwitchyardConfig};
//!
//! let config = SwitchyardConfig::from_yaml_file("switchyard.yaml")?;
//! let backoff = SecureBackoff::from_config(&config.retry);
//!
//! for delay in backoff.schedule(config.retry.base_delay(), config.retry.max_delay(), 4) {
//!     println!("{:?}", delay);
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod health;
pub mod random;
pub mod routing;

// Re-export main types at crate root
pub use backoff::SecureBackoff;
pub use config::{
    CircuitBreakerConfig, ConfigError, RetryConfig, RetryConfigBuilder, RouterConfig,
    SwitchyardConfig, TimeoutConfig,
};
pub use error::{BackendError, ErrorKind, ResilienceError, ValidationError};
pub use health::{ConnectionState, HealthReport};
pub use random::{FixedRandom, OsRandom, RandomSource};
pub use routing::{
    MetricsSnapshot, RequestSelector, RoutingDecision, RoutingMetrics, RoutingReason,
    RoutingStrategy, ServiceTarget,
};

/// Check a traffic percentage before it reaches a router.
pub fn validate_percentage(percentage: f64) -> Result<f64, ValidationError> {
    if (0.0..=100.0).contains(&percentage) {
        Ok(percentage)
    } else {
        Err(ValidationError::OutOfRange {
            field: "primary_traffic_percentage",
            value: percentage,
            min: 0.0,
            max: 100.0,
        })
    }
}
