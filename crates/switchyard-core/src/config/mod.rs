//! Configuration parsing and validation.
//!
//! Configs are YAML or JSON documents validated against an embedded JSON
//! Schema first and semantic rules second. Durations are human-readable
//! strings such as `"30s"` or `"250ms"`.

mod schema;
mod settings;

pub use schema::validate_config_schema;
pub use settings::{
    CircuitBreakerConfig, ConfigError, RetryConfig, RetryConfigBuilder, RouterConfig,
    SwitchyardConfig, TimeoutConfig,
};

/// Serde adapter for `Duration` as a humantime string.
pub(crate) mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}
