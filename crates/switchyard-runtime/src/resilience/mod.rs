//! Resilience patterns for switchyard-runtime.
//!
//! This module provides:
//! - Circuit breaker to prevent cascade failures
//! - Retry with exponential backoff and secure jitter
//! - Per-attempt timeouts
//! - A chain composing them, with an optional fallback

mod chain;
mod circuit_breaker;
mod retry;
mod strategy;
mod timeout;

pub use chain::{ChainHealth, NoFallback, ResilienceChain, ResilienceChainBuilder};
pub use circuit_breaker::{CircuitBreaker, CircuitHealth, CircuitState};
pub use retry::{RetryPolicy, RetryStats};
pub use strategy::{ResilienceStrategy, Strategy, StrategyHealth};
pub use timeout::{TimeoutPolicy, TimeoutStats};
