//! Check command - validate configuration
//!
//! Loads the config file, runs validation, and prints a summary of what
//! `metro run` would start. Exits non-zero on any problem, so it works as a
//! pre-deploy gate.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use metro_config::Config;

/// Check command arguments
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Path to configuration file (defaults to metro.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Run the check command
pub async fn run(args: CheckArgs) -> Result<()> {
    let path = args.config.unwrap_or_else(|| PathBuf::from("metro.toml"));
    let config = Config::from_file(&path)
        .with_context(|| format!("config check failed for {}", path.display()))?;

    println!("config ok: {}", path.display());
    println!("  listen_addr: {}", config.listen_addr);
    if config.admin_addr.is_empty() {
        println!("  admin_addr:  (disabled)");
    } else {
        println!("  admin_addr:  {}", config.admin_addr);
    }
    match &config.http_addr {
        Some(addr) => println!("  http_addr:   {addr}"),
        None => println!("  http_addr:   (disabled)"),
    }
    println!("  spool_dir:   {}", config.spool_dir);
    println!("  first_only:  {}", config.first_only);

    println!("  routes ({}):", config.routes.len());
    for route in &config.routes {
        let pattern = if route.pattern.is_empty() {
            "(all)"
        } else {
            route.pattern.as_str()
        };
        println!(
            "    {} {} -> {} spool={}",
            route.key, pattern, route.addr, route.spool
        );
    }

    Ok(())
}
