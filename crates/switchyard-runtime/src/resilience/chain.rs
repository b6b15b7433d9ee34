//! Composed protection around a backend call.
//!
//! Layers always run in the same order:
//!
//! ```text
//! circuit breaker → retry → timeout → call
//! ```
//!
//! The breaker sees one outcome per request, after retries are spent, so
//! transient blips that retry absorbs never trip it. A fallback runs only
//! when the whole chain fails, and runs bare: it is already the degraded
//! path and must not be retried.

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::{Future, Ready};
use std::sync::Arc;

use switchyard_core::{
    BackendError, CircuitBreakerConfig, ResilienceError, SwitchyardConfig,
};

use super::circuit_breaker::CircuitBreaker;
use super::retry::RetryPolicy;
use super::strategy::{ResilienceStrategy, Strategy, StrategyHealth};
use super::timeout::TimeoutPolicy;

/// Fallback type for calls that have none: `None::<NoFallback<T>>`.
pub type NoFallback<T> = fn() -> Ready<Result<T, BackendError>>;

/// Aggregated health of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainHealth {
    pub name: String,

    /// True when every strategy is healthy
    pub healthy: bool,

    /// Per-strategy entries keyed by strategy kind
    pub strategies: BTreeMap<String, StrategyHealth>,
}

/// Circuit breaker + retry (+ optional timeout) around one operation.
#[derive(Debug)]
pub struct ResilienceChain {
    name: String,
    strategies: Vec<Strategy>,
}

impl ResilienceChain {
    pub fn builder(name: impl Into<String>) -> ResilienceChainBuilder {
        ResilienceChainBuilder {
            name: name.into(),
            circuit_breaker: None,
            retry: None,
            timeout: None,
        }
    }

    /// Chain with every strategy the config describes.
    pub fn from_config(name: impl Into<String>, config: &SwitchyardConfig) -> Self {
        let name = name.into();
        let mut builder = Self::builder(name.clone())
            .circuit_breaker(Arc::new(CircuitBreaker::new(
                name.clone(),
                config.circuit_breaker.clone(),
            )))
            .retry(RetryPolicy::new(name.clone(), config.retry.clone()));
        if let Some(timeout) = &config.timeout {
            builder = builder.timeout(TimeoutPolicy::new(name, timeout));
        }
        builder.build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.strategies.iter().find_map(|s| match s {
            Strategy::CircuitBreaker(breaker) => Some(breaker),
            _ => None,
        })
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.strategies.iter().find_map(|s| match s {
            Strategy::Retry(policy) => Some(policy),
            _ => None,
        })
    }

    /// Run `primary` through every layer, without a fallback.
    pub async fn execute<T, E, F, Fut>(&self, primary: F) -> Result<T, ResilienceError>
    where
        T: Send,
        E: Into<ResilienceError> + Send,
        F: Fn() -> Fut + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        run_layers(&self.strategies, &primary).await
    }

    /// Run `primary` through the chain, then `fallback` if the chain fails.
    ///
    /// Without a fallback, or when the fallback fails too, the result is
    /// [`ResilienceError::BothPathsFailed`] carrying both causes.
    pub async fn execute_with_protection<T, E, F, Fut, FE, G, GFut>(
        &self,
        primary: F,
        fallback: Option<G>,
    ) -> Result<T, ResilienceError>
    where
        T: Send,
        E: Into<ResilienceError> + Send,
        F: Fn() -> Fut + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
        FE: Into<ResilienceError>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, FE>>,
    {
        let primary_err = match self.execute(primary).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let Some(fallback) = fallback else {
            tracing::warn!(chain = %self.name, error = %primary_err, "Primary failed with no fallback");
            return Err(ResilienceError::BothPathsFailed {
                primary: Box::new(primary_err),
                fallback: None,
            });
        };

        tracing::warn!(chain = %self.name, error = %primary_err, "Primary failed, invoking fallback");
        match fallback().await {
            Ok(value) => Ok(value),
            Err(err) => {
                let fallback_err: ResilienceError = err.into();
                tracing::error!(
                    chain = %self.name,
                    primary = %primary_err,
                    fallback = %fallback_err,
                    "Primary and fallback both failed"
                );
                Err(ResilienceError::BothPathsFailed {
                    primary: Box::new(primary_err),
                    fallback: Some(Box::new(fallback_err)),
                })
            }
        }
    }

    /// Like [`execute_with_protection`](Self::execute_with_protection), but
    /// abandons everything as soon as `cancel` resolves.
    ///
    /// A cancelled call leaves breaker counters untouched.
    pub async fn execute_with_protection_until<T, E, F, Fut, FE, G, GFut, C>(
        &self,
        primary: F,
        fallback: Option<G>,
        cancel: C,
    ) -> Result<T, ResilienceError>
    where
        T: Send,
        E: Into<ResilienceError> + Send,
        F: Fn() -> Fut + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
        FE: Into<ResilienceError>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, FE>>,
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                tracing::info!(chain = %self.name, "Call cancelled by caller");
                Err(ResilienceError::Cancelled)
            }
            result = self.execute_with_protection(primary, fallback) => result,
        }
    }

    pub fn health_status(&self) -> ChainHealth {
        let strategies: BTreeMap<String, StrategyHealth> = self
            .strategies
            .iter()
            .map(|s| (s.kind().to_string(), s.health_status()))
            .collect();

        ChainHealth {
            name: self.name.clone(),
            healthy: strategies.values().all(StrategyHealth::healthy),
            strategies,
        }
    }
}

fn run_layers<'a, T, E, F, Fut>(
    layers: &'a [Strategy],
    op: &'a F,
) -> BoxFuture<'a, Result<T, ResilienceError>>
where
    T: Send + 'a,
    E: Into<ResilienceError> + Send + 'a,
    F: Fn() -> Fut + Sync,
    Fut: Future<Output = Result<T, E>> + Send + 'a,
{
    match layers.split_first() {
        None => async move { op().await.map_err(Into::into) }.boxed(),
        Some((head, rest)) => async move { head.execute(move || run_layers(rest, op)).await }.boxed(),
    }
}

/// Builder for [`ResilienceChain`]; layer order is fixed regardless of
/// the order methods are called in.
pub struct ResilienceChainBuilder {
    name: String,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    retry: Option<RetryPolicy>,
    timeout: Option<TimeoutPolicy>,
}

impl ResilienceChainBuilder {
    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    /// Shorthand for a fresh breaker named after the chain.
    pub fn circuit_breaker_config(self, config: CircuitBreakerConfig) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(self.name.clone(), config));
        self.circuit_breaker(breaker)
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn timeout(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout = Some(policy);
        self
    }

    pub fn build(self) -> ResilienceChain {
        let mut strategies = Vec::with_capacity(3);
        if let Some(breaker) = self.circuit_breaker {
            strategies.push(Strategy::CircuitBreaker(breaker));
        }
        if let Some(retry) = self.retry {
            strategies.push(Strategy::Retry(retry));
        }
        if let Some(timeout) = self.timeout {
            strategies.push(Strategy::Timeout(timeout));
        }

        ResilienceChain {
            name: self.name,
            strategies,
        }
    }
}
