//! metro - route traffic to anything that speaks the Graphite Carbon
//! plaintext protocol
//!
//! # Usage
//!
//! ```bash
//! # Run the relay
//! metro run
//! metro run --config /etc/metro.toml
//!
//! # Validate a config file and print the route table
//! metro check --config /etc/metro.toml
//! ```

mod cmd;

use anyhow::Result;
use clap::{Parser, Subcommand};
use metro_config::{Config, LogFormat};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Routing relay for the Graphite/Carbon plaintext metrics protocol
#[derive(Parser, Debug)]
#[command(name = "metro")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (error if specified but not found)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay (daemon mode)
    Run(cmd::serve::ServeArgs),

    /// Validate configuration and print the route table
    Check(cmd::check::CheckArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Run(mut args)) => {
            if args.config.is_none() {
                args.config = cli.config;
            }
            let (level, format) = resolve_logging(cli.log_level.as_deref(), args.config.as_deref());
            init_logging(&level, format)?;
            cmd::serve::run(args).await
        }
        Some(Command::Check(mut args)) => {
            if args.config.is_none() {
                args.config = cli.config;
            }
            // Check prints to stdout; no logging needed.
            cmd::check::run(args).await
        }
        // No subcommand = run the relay with defaults.
        None => {
            let (level, format) = resolve_logging(cli.log_level.as_deref(), cli.config.as_deref());
            init_logging(&level, format)?;
            cmd::serve::run(cmd::serve::ServeArgs { config: cli.config }).await
        }
    }
}

/// Resolve log settings: CLI flag > config file > defaults
fn resolve_logging(
    cli_level: Option<&str>,
    config_path: Option<&std::path::Path>,
) -> (String, LogFormat) {
    let from_config = config_path
        .filter(|p| p.exists())
        .and_then(|p| Config::from_file(p).ok())
        .map(|c| (c.log.level.as_str().to_string(), c.log.format));

    match (cli_level, from_config) {
        (Some(level), Some((_, format))) => (level.to_string(), format),
        (Some(level), None) => (level.to_string(), LogFormat::default()),
        (None, Some(settings)) => settings,
        (None, None) => ("info".to_string(), LogFormat::default()),
    }
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Console => registry
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }

    Ok(())
}
