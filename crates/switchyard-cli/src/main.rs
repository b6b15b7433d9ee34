//! switchyard CLI
//!
//! Inspect configurations, rehearse traffic splits, and print backoff
//! schedules without touching a real backend.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

/// Circuit breaking, retry, and traffic routing between two backends
#[derive(Parser)]
#[command(name = "switchyard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a configuration file against the schema and value rules
    Validate {
        /// Config file (.yaml, .yml or .json)
        path: PathBuf,
    },

    /// Route synthetic requests through in-memory backends
    Simulate {
        /// Config file; defaults apply when omitted
        #[arg(short, long, env = "SWITCHYARD_CONFIG")]
        config: Option<PathBuf>,

        /// Number of requests to route
        #[arg(short = 'n', long, default_value_t = 1000)]
        requests: u32,

        /// Enable gradual rollout with this primary percentage (0-100)
        #[arg(short, long)]
        percentage: Option<f64>,

        /// Mark the primary backend as failed
        #[arg(long)]
        primary_down: bool,

        /// Mark the secondary backend as failed
        #[arg(long)]
        secondary_down: bool,
    },

    /// Print the retry delay schedule
    Backoff {
        /// Base delay, e.g. "1s" or "250ms"
        #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
        base: std::time::Duration,

        /// Delay cap
        #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
        max: std::time::Duration,

        /// Number of retries to show
        #[arg(short, long, default_value_t = 5)]
        attempts: u32,

        /// Growth factor per attempt
        #[arg(long, default_value_t = 2.0)]
        exponential_base: f64,

        /// Disable jitter
        #[arg(long)]
        no_jitter: bool,
    },

    /// Print the default configuration
    Config {
        #[arg(short, long, value_enum, default_value_t = Format::Yaml)]
        format: Format,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Yaml,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Validate { path } => commands::validate(&path),
        Commands::Simulate {
            config,
            requests,
            percentage,
            primary_down,
            secondary_down,
        } => {
            let options = commands::SimulateOptions {
                config,
                requests,
                percentage,
                primary_down,
                secondary_down,
            };
            commands::simulate(options).await
        }
        Commands::Backoff {
            base,
            max,
            attempts,
            exponential_base,
            no_jitter,
        } => commands::backoff(base, max, attempts, exponential_base, !no_jitter),
        Commands::Config { format } => commands::print_default_config(format),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
