//! Typed configuration and loading from YAML/JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::duration_str;
use super::schema::validate_config_schema;
use crate::error::{ErrorKind, ValidationError};
use crate::routing::RoutingStrategy;

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Config does not match schema: {}", .0.join("; "))]
    SchemaError(Vec<String>),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Circuit breaker configuration.
///
/// Built through [`CircuitBreakerConfig::new`] or deserialized and then
/// checked with [`CircuitBreakerConfig::validate`]. Read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening circuit
    failure_threshold: u32,

    /// Successes in half-open needed to close circuit
    success_threshold: u32,

    /// Time before attempting recovery
    #[serde(with = "duration_str")]
    recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(
        failure_threshold: u32,
        success_threshold: u32,
        recovery_timeout: Duration,
    ) -> Result<Self, ValidationError> {
        let config = Self {
            failure_threshold,
            success_threshold,
            recovery_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn success_threshold(&self) -> u32 {
        self.success_threshold
    }

    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.failure_threshold == 0 {
            return Err(ValidationError::NotPositive {
                field: "circuit_breaker.failure_threshold",
            });
        }
        if self.success_threshold == 0 {
            return Err(ValidationError::NotPositive {
                field: "circuit_breaker.success_threshold",
            });
        }
        if self.recovery_timeout.is_zero() {
            return Err(ValidationError::NotPositive {
                field: "circuit_breaker.recovery_timeout",
            });
        }
        Ok(())
    }
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Additional attempts after the first one
    max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "duration_str")]
    base_delay: Duration,

    /// Upper bound on any single delay (before jitter)
    #[serde(with = "duration_str")]
    max_delay: Duration,

    /// Growth factor per attempt
    exponential_base: f64,

    /// Spread delays by ±25%
    jitter_enabled: bool,

    /// Error kinds worth another attempt
    retryable_kinds: BTreeSet<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter_enabled: true,
            retryable_kinds: ErrorKind::ALL
                .iter()
                .copied()
                .filter(|k| k.is_transient())
                .collect(),
        }
    }
}

impl RetryConfig {
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder {
            config: RetryConfig::default(),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn exponential_base(&self) -> f64 {
        self.exponential_base
    }

    pub fn jitter_enabled(&self) -> bool {
        self.jitter_enabled
    }

    pub fn retryable_kinds(&self) -> &BTreeSet<ErrorKind> {
        &self.retryable_kinds
    }

    /// Whether a failure of this kind should be retried.
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable_kinds.contains(&kind)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.base_delay.is_zero() {
            return Err(ValidationError::NotPositive {
                field: "retry.base_delay",
            });
        }
        if self.max_delay.is_zero() {
            return Err(ValidationError::NotPositive {
                field: "retry.max_delay",
            });
        }
        if self.max_delay < self.base_delay {
            return Err(ValidationError::Invalid(format!(
                "retry.max_delay ({:?}) is shorter than retry.base_delay ({:?})",
                self.max_delay, self.base_delay
            )));
        }
        if !self.exponential_base.is_finite() || self.exponential_base <= 1.0 {
            return Err(ValidationError::Invalid(format!(
                "retry.exponential_base must be a finite number > 1, got {}",
                self.exponential_base
            )));
        }
        Ok(())
    }
}

/// Builder for [`RetryConfig`]; `build` validates.
#[derive(Debug, Clone)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn exponential_base(mut self, base: f64) -> Self {
        self.config.exponential_base = base;
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.config.jitter_enabled = enabled;
        self
    }

    /// Replace the retryable set.
    pub fn retryable_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.config.retryable_kinds = kinds.into_iter().collect();
        self
    }

    pub fn build(self) -> Result<RetryConfig, ValidationError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Per-attempt deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(with = "duration_str")]
    pub per_attempt: Duration,
}

impl TimeoutConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.per_attempt.is_zero() {
            return Err(ValidationError::NotPositive {
                field: "timeout.per_attempt",
            });
        }
        Ok(())
    }
}

/// Traffic router configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Which backend is preferred
    pub strategy: RoutingStrategy,

    /// Split traffic by request hash
    pub gradual_rollout_enabled: bool,

    /// Share of traffic sent to primary when splitting (0-100)
    pub primary_traffic_percentage: f64,

    /// Pins the request selector across restarts when set
    pub hash_seed: Option<u64>,

    /// How often backend health is refreshed
    #[serde(with = "duration_str")]
    pub health_check_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::PrimaryPreferred,
            gradual_rollout_enabled: false,
            primary_traffic_percentage: 100.0,
            hash_seed: None,
            health_check_interval: Duration::from_secs(30),
        }
    }
}

impl RouterConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let pct = self.primary_traffic_percentage;
        if !(0.0..=100.0).contains(&pct) {
            return Err(ValidationError::OutOfRange {
                field: "router.primary_traffic_percentage",
                value: pct,
                min: 0.0,
                max: 100.0,
            });
        }
        if self.health_check_interval.is_zero() {
            return Err(ValidationError::NotPositive {
                field: "router.health_check_interval",
            });
        }
        Ok(())
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchyardConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub timeout: Option<TimeoutConfig>,
    pub router: RouterConfig,
}

impl SwitchyardConfig {
    /// Parse a config from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a config from JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a config from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Pick the parser from the file extension (`.json`, otherwise YAML).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_yaml_file(path),
        }
    }

    fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        // YAML documents that are empty parse to null
        let value = if value.is_null() {
            serde_json::json!({})
        } else {
            value
        };

        validate_config_schema(&value).map_err(|errors| {
            tracing::debug!(errors = errors.len(), "Config failed schema validation");
            ConfigError::SchemaError(errors)
        })?;
        let config: SwitchyardConfig = serde_json::from_value(value)?;
        config.validate()?;
        tracing::debug!(
            strategy = ?config.router.strategy,
            max_retries = config.retry.max_retries(),
            failure_threshold = config.circuit_breaker.failure_threshold(),
            "Config loaded"
        );
        Ok(config)
    }

    /// Semantic validation of every section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.circuit_breaker.validate()?;
        self.retry.validate()?;
        if let Some(timeout) = &self.timeout {
            timeout.validate()?;
        }
        self.router.validate()?;
        Ok(())
    }
}
