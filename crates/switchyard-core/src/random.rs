//! Secure randomness for jitter and hash seeds.
//!
//! Jitter exists to desynchronize many clients, so it is drawn from the
//! operating system CSPRNG rather than a seeded, replayable generator.

use rand::rngs::OsRng;
use rand::{Rng, RngCore};

/// Source of uniformly distributed random values.
pub trait RandomSource: Send + Sync {
    /// Uniform float in `[low, high)`. Returns `low` when the range is empty.
    fn uniform_float(&self, low: f64, high: f64) -> f64;

    /// Uniform integer in `[low, high)`. Returns `low` when the range is empty.
    fn uniform_u64(&self, low: u64, high: u64) -> u64;

    /// Fill `dest` with random bytes.
    fn fill_bytes(&self, dest: &mut [u8]);
}

/// Randomness from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn uniform_float(&self, low: f64, high: f64) -> f64 {
        if !(high > low) {
            return low;
        }
        OsRng.gen_range(low..high)
    }

    fn uniform_u64(&self, low: u64, high: u64) -> u64 {
        if high <= low {
            return low;
        }
        OsRng.gen_range(low..high)
    }

    fn fill_bytes(&self, dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }
}

/// Always returns the same point of every range.
///
/// `fraction` is where in `[low, high)` the value lands: 0.0 yields `low`,
/// 0.5 the midpoint. Useful where a test needs exact delays.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom {
    fraction: f64,
}

impl FixedRandom {
    pub fn new(fraction: f64) -> Self {
        Self {
            fraction: fraction.clamp(0.0, 1.0),
        }
    }
}

impl RandomSource for FixedRandom {
    fn uniform_float(&self, low: f64, high: f64) -> f64 {
        if !(high > low) {
            return low;
        }
        let value = low + (high - low) * self.fraction;
        // keep the half-open contract when fraction == 1.0
        if value >= high {
            high - (high - low) * f64::EPSILON
        } else {
            value
        }
    }

    fn uniform_u64(&self, low: u64, high: u64) -> u64 {
        if high <= low {
            return low;
        }
        let span = (high - low) as f64;
        let offset = ((span * self.fraction) as u64).min(high - low - 1);
        low + offset
    }

    fn fill_bytes(&self, dest: &mut [u8]) {
        let byte = (self.fraction * 255.0) as u8;
        dest.fill(byte);
    }
}
