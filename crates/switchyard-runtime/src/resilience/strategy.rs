//! The strategies a [`ResilienceChain`](super::ResilienceChain) is built from.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

use switchyard_core::ResilienceError;

use super::circuit_breaker::{CircuitBreaker, CircuitHealth};
use super::retry::{RetryPolicy, RetryStats};
use super::timeout::{TimeoutPolicy, TimeoutStats};

/// Common reporting surface of every strategy.
pub trait ResilienceStrategy {
    /// Key under which the strategy reports health.
    fn kind(&self) -> &'static str;

    fn health_status(&self) -> StrategyHealth;
}

/// Health entry for one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyHealth {
    CircuitBreaker(CircuitHealth),

    /// Retry never blocks traffic, so it always reports healthy
    Retry {
        healthy: bool,
        max_retries: u32,
        stats: RetryStats,
    },

    Timeout {
        healthy: bool,
        per_attempt_ms: u64,
        stats: TimeoutStats,
    },
}

impl StrategyHealth {
    pub fn healthy(&self) -> bool {
        match self {
            StrategyHealth::CircuitBreaker(health) => health.healthy,
            StrategyHealth::Retry { healthy, .. } | StrategyHealth::Timeout { healthy, .. } => {
                *healthy
            }
        }
    }
}

impl ResilienceStrategy for CircuitBreaker {
    fn kind(&self) -> &'static str {
        "circuit_breaker"
    }

    fn health_status(&self) -> StrategyHealth {
        StrategyHealth::CircuitBreaker(CircuitBreaker::health_status(self))
    }
}

impl ResilienceStrategy for RetryPolicy {
    fn kind(&self) -> &'static str {
        "retry"
    }

    fn health_status(&self) -> StrategyHealth {
        StrategyHealth::Retry {
            healthy: true,
            max_retries: self.config().max_retries(),
            stats: self.stats(),
        }
    }
}

impl ResilienceStrategy for TimeoutPolicy {
    fn kind(&self) -> &'static str {
        "timeout"
    }

    fn health_status(&self) -> StrategyHealth {
        StrategyHealth::Timeout {
            healthy: true,
            per_attempt_ms: self.per_attempt().as_millis() as u64,
            stats: self.stats(),
        }
    }
}

/// One layer of a chain.
#[derive(Debug)]
pub enum Strategy {
    CircuitBreaker(Arc<CircuitBreaker>),
    Retry(RetryPolicy),
    Timeout(TimeoutPolicy),
}

impl Strategy {
    /// Run `f` through this layer.
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        match self {
            Strategy::CircuitBreaker(breaker) => breaker.execute(f).await,
            Strategy::Retry(policy) => policy.execute(f).await,
            Strategy::Timeout(policy) => policy.execute(f).await,
        }
    }
}

impl ResilienceStrategy for Strategy {
    fn kind(&self) -> &'static str {
        match self {
            Strategy::CircuitBreaker(breaker) => breaker.as_ref().kind(),
            Strategy::Retry(policy) => policy.kind(),
            Strategy::Timeout(policy) => policy.kind(),
        }
    }

    fn health_status(&self) -> StrategyHealth {
        match self {
            Strategy::CircuitBreaker(breaker) => ResilienceStrategy::health_status(breaker.as_ref()),
            Strategy::Retry(policy) => policy.health_status(),
            Strategy::Timeout(policy) => policy.health_status(),
        }
    }
}
