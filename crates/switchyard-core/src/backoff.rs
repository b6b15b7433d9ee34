//! Exponential backoff with secure jitter.
//!
//! `delay = min(base * exponential_base^attempt, max)`, then, when jitter is
//! on, a uniform draw from `[0.75 * delay, 1.25 * delay)`.

use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::random::{OsRandom, RandomSource};

/// Attempts above this are treated as this, keeping `powi` finite.
pub const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Lower bound of the jitter window, as a fraction of the capped delay.
pub const JITTER_LOW: f64 = 0.75;

/// Upper bound (exclusive) of the jitter window.
pub const JITTER_HIGH: f64 = 1.25;

/// Delay calculator for retry loops.
#[derive(Clone)]
pub struct SecureBackoff {
    exponential_base: f64,
    jitter_enabled: bool,
    random: Arc<dyn RandomSource>,
}

impl std::fmt::Debug for SecureBackoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureBackoff")
            .field("exponential_base", &self.exponential_base)
            .field("jitter_enabled", &self.jitter_enabled)
            .finish()
    }
}

impl SecureBackoff {
    /// Backoff drawing jitter from the OS generator.
    pub fn new(exponential_base: f64, jitter_enabled: bool) -> Self {
        Self::with_random(exponential_base, jitter_enabled, Arc::new(OsRandom))
    }

    /// Backoff with a caller-supplied random source.
    pub fn with_random(
        exponential_base: f64,
        jitter_enabled: bool,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            exponential_base,
            jitter_enabled,
            random,
        }
    }

    /// Backoff matching a retry configuration.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.exponential_base(), config.jitter_enabled())
    }

    pub fn jitter_enabled(&self) -> bool {
        self.jitter_enabled
    }

    /// Delay in seconds before retry number `attempt + 1`.
    pub fn delay_secs(&self, base_delay: f64, attempt: u32, max_delay: f64) -> f64 {
        let exponent = attempt.min(MAX_BACKOFF_EXPONENT) as i32;
        let raw = base_delay * self.exponential_base.powi(exponent);
        let capped = raw.min(max_delay).max(0.0);

        if self.jitter_enabled {
            self.random
                .uniform_float(capped * JITTER_LOW, capped * JITTER_HIGH)
        } else {
            capped
        }
    }

    /// Same as [`delay_secs`](Self::delay_secs) on `Duration`s.
    pub fn delay(&self, base_delay: Duration, attempt: u32, max_delay: Duration) -> Duration {
        let secs = self.delay_secs(base_delay.as_secs_f64(), attempt, max_delay.as_secs_f64());
        Duration::try_from_secs_f64(secs).unwrap_or(max_delay)
    }

    /// The first `attempts` delays, for display and planning.
    pub fn schedule(&self, base_delay: Duration, max_delay: Duration, attempts: u32) -> Vec<Duration> {
        (0..attempts)
            .map(|attempt| self.delay(base_delay, attempt, max_delay))
            .collect()
    }
}
