//! Per-attempt deadline.
//!
//! An attempt that outlives its deadline is dropped and reported as a
//! `Timeout` backend error, which the default retry set treats as transient.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use switchyard_core::{BackendError, ResilienceError, TimeoutConfig};

/// Timeout counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutStats {
    pub calls: u64,
    pub timeouts: u64,
}

#[derive(Debug)]
pub struct TimeoutPolicy {
    name: String,
    per_attempt: Duration,
    calls: AtomicU64,
    timeouts: AtomicU64,
}

impl TimeoutPolicy {
    pub fn new(name: impl Into<String>, config: &TimeoutConfig) -> Self {
        Self {
            name: name.into(),
            per_attempt: config.per_attempt,
            calls: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn per_attempt(&self) -> Duration {
        self.per_attempt
    }

    pub async fn execute<T, E, F, Fut>(&self, f: F) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ResilienceError>,
    {
        self.calls.fetch_add(1, Ordering::Relaxed);

        match tokio::time::timeout(self.per_attempt, f()).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(policy = %self.name, timeout = ?self.per_attempt, "Attempt timed out");
                Err(BackendError::timeout(format!(
                    "'{}' did not finish within {:?}",
                    self.name, self.per_attempt
                ))
                .into())
            }
        }
    }

    pub fn stats(&self) -> TimeoutStats {
        TimeoutStats {
            calls: self.calls.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}
