//! JSON Schema validation for configuration documents.
//!
//! Structural checks (types, ranges, unknown keys) happen here, before serde
//! sees the document, so a typo in a key is reported instead of silently
//! falling back to a default.

use std::sync::OnceLock;
use thiserror::Error;

/// Embedded config schema (loaded at compile time).
const CONFIG_SCHEMA_JSON: &str = include_str!("../../schema/config.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema loading.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("embedded config.schema.json is unusable: {0}")]
    LoadError(String),
}

fn compile_schema() -> Result<jsonschema::Validator, String> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA_JSON).map_err(|e| format!("not valid JSON ({e})"))?;
    jsonschema::options()
        .build(&schema)
        .map_err(|e| format!("does not compile ({e})"))
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    COMPILED_SCHEMA
        .get_or_init(compile_schema)
        .as_ref()
        .map_err(|e| SchemaError::LoadError(e.clone()))
}

/// Validate a configuration document against the schema.
///
/// Returns every violation found, each formatted as `"<message> at <path>"`.
pub fn validate_config_schema(config_json: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(config_json)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_schema_compiles() {
        assert!(get_validator().is_ok());
        let err = SchemaError::LoadError("not valid JSON (eof)".to_string());
        assert_eq!(
            err.to_string(),
            "embedded config.schema.json is unusable: not valid JSON (eof)"
        );
    }

    #[test]
    fn test_empty_document_passes() {
        assert!(validate_config_schema(&serde_json::json!({})).is_ok());
    }

    #[test]
    fn test_full_document_passes() {
        let value = serde_json::json!({
            "circuit_breaker": {
                "failure_threshold": 3,
                "success_threshold": 2,
                "recovery_timeout": "60s"
            },
            "retry": {
                "max_retries": 3,
                "base_delay": "1s",
                "max_delay": "30s",
                "exponential_base": 2.0,
                "jitter_enabled": true,
                "retryable_kinds": ["network", "timeout"]
            },
            "timeout": { "per_attempt": "10s" },
            "router": {
                "strategy": "primary_preferred",
                "gradual_rollout_enabled": true,
                "primary_traffic_percentage": 25,
                "hash_seed": 42,
                "health_check_interval": "1m 30s"
            }
        });
        assert!(validate_config_schema(&value).is_ok());
    }

    #[test]
    fn test_unknown_key_fails() {
        let value = serde_json::json!({
            "circuit_breaker": { "failure_treshold": 3 }
        });
        let errors = validate_config_schema(&value).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_percentage_out_of_range_fails() {
        let value = serde_json::json!({
            "router": { "primary_traffic_percentage": 150 }
        });
        let errors = validate_config_schema(&value).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("primary_traffic_percentage")));
    }

    #[test]
    fn test_bad_duration_fails() {
        let value = serde_json::json!({
            "retry": { "base_delay": 5 }
        });
        assert!(validate_config_schema(&value).is_err());
    }
}
