//! Subcommand implementations.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use switchyard_core::{
    validate_percentage, BackendError, ConfigError, ConnectionState, RetryConfig, SecureBackoff,
    ServiceTarget, SwitchyardConfig,
};
use switchyard_runtime::{HealthSnapshot, InMemoryBackend, Switchyard};

use crate::Format;

/// Load and check a config file.
pub fn validate(path: &Path) -> Result<()> {
    let config = load(path)?;

    println!("{} is valid", path.display());
    println!(
        "  circuit_breaker: {} failures to open, {} successes to close, {} recovery",
        config.circuit_breaker.failure_threshold(),
        config.circuit_breaker.success_threshold(),
        humantime::format_duration(config.circuit_breaker.recovery_timeout()),
    );
    println!(
        "  retry: up to {} retries, {} base, {} cap",
        config.retry.max_retries(),
        humantime::format_duration(config.retry.base_delay()),
        humantime::format_duration(config.retry.max_delay()),
    );
    if let Some(timeout) = &config.timeout {
        println!(
            "  timeout: {} per attempt",
            humantime::format_duration(timeout.per_attempt)
        );
    }
    println!(
        "  router: {:?}, rollout {}, {}% primary",
        config.router.strategy,
        if config.router.gradual_rollout_enabled { "on" } else { "off" },
        config.router.primary_traffic_percentage,
    );
    Ok(())
}

fn load(path: &Path) -> Result<SwitchyardConfig> {
    match SwitchyardConfig::from_file(path) {
        Ok(config) => Ok(config),
        Err(ConfigError::SchemaError(errors)) => {
            for error in &errors {
                eprintln!("  - {error}");
            }
            bail!(
                "{} failed schema validation ({} errors)",
                path.display(),
                errors.len()
            )
        }
        Err(e) => Err(e).with_context(|| format!("failed to load {}", path.display())),
    }
}

pub struct SimulateOptions {
    pub config: Option<PathBuf>,
    pub requests: u32,
    pub percentage: Option<f64>,
    pub primary_down: bool,
    pub secondary_down: bool,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub requests: u32,
    pub failures: u32,
    pub health: HealthSnapshot,
}

/// Route synthetic requests and print the resulting metrics as JSON.
pub async fn simulate(options: SimulateOptions) -> Result<()> {
    let report = run_simulation(&options).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_simulation(options: &SimulateOptions) -> Result<SimulationReport> {
    let mut config = match &options.config {
        Some(path) => load(path)?,
        None => SwitchyardConfig::default(),
    };
    if let Some(percentage) = options.percentage {
        config.router.gradual_rollout_enabled = true;
        config.router.primary_traffic_percentage = validate_percentage(percentage)?;
    }
    // backoff sleeps would only add wall-clock time to a simulation
    config.retry = RetryConfig::builder().max_retries(0).build()?;

    let state = |down: bool| {
        if down {
            ConnectionState::Failed
        } else {
            ConnectionState::Connected
        }
    };
    let primary = Arc::new(InMemoryBackend::new("primary").with_state(state(options.primary_down)));
    let secondary =
        Arc::new(InMemoryBackend::new("secondary").with_state(state(options.secondary_down)));

    let yard = Switchyard::start(&config, primary, secondary)?;

    let mut failures = 0;
    for i in 0..options.requests {
        let request_id = format!("sim-{i}");
        let result = yard
            .dispatcher()
            .dispatch(&request_id, "simulate", |target| async move {
                let down = match target {
                    ServiceTarget::Primary => options.primary_down,
                    ServiceTarget::Secondary => options.secondary_down,
                };
                if down {
                    Err(BackendError::unavailable(format!("{target} is down")))
                } else {
                    Ok(target)
                }
            })
            .await;

        if let Err(e) = result {
            failures += 1;
            tracing::debug!(request_id = %request_id, error = %e, "Simulated request failed");
        }
    }

    let health = yard.health_snapshot();
    yard.shutdown().await?;

    Ok(SimulationReport {
        requests: options.requests,
        failures,
        health,
    })
}

/// Print the delay before each retry.
pub fn backoff(
    base: Duration,
    max: Duration,
    attempts: u32,
    exponential_base: f64,
    jitter: bool,
) -> Result<()> {
    let config = RetryConfig::builder()
        .max_retries(attempts)
        .base_delay(base)
        .max_delay(max)
        .exponential_base(exponential_base)
        .jitter(jitter)
        .build()?;
    let backoff = SecureBackoff::from_config(&config);

    for (i, delay) in backoff.schedule(base, max, attempts).iter().enumerate() {
        println!("retry {:>2}: {:.3}s", i + 1, delay.as_secs_f64());
    }
    Ok(())
}

pub fn print_default_config(format: Format) -> Result<()> {
    println!("{}", render_default_config(format)?);
    Ok(())
}

fn render_default_config(format: Format) -> Result<String> {
    let config = SwitchyardConfig::default();
    let rendered = match format {
        Format::Yaml => serde_yaml::to_string(&config)?,
        Format::Json => serde_json::to_string_pretty(&config)?,
    };
    Ok(rendered)
}
