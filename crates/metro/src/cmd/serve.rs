//! Serve command - run the relay
//!
//! Wires the pieces together: routing table from config, ingress listener,
//! dispatcher, admin surfaces, telemetry reporter. Shutdown is coordinated
//! through one cancellation token; routes are stopped last so their spools
//! flush to disk.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Args;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use metro_admin::{serve_http, AdminServer};
use metro_config::Config;
use metro_ingress::{Dispatcher, Ingress, IngressConfig};
use metro_routing::{RelayOptions, RoutingTable};
use metro_spool::SpoolConfig;
use metro_telemetry::{ReporterConfig, StatsRegistry, StatsdReporter};

/// Serve command arguments
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to configuration file (defaults to metro.toml if present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Run the serve command
pub async fn run(args: ServeArgs) -> Result<()> {
    let config = load_config(args.config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen_addr,
        routes = config.routes.len(),
        first_only = config.first_only,
        "metro starting"
    );

    if let Err(e) = run_relay(config).await {
        error!(error = %e, "relay error");
        return Err(e);
    }

    info!("metro shutdown complete");
    Ok(())
}

/// Load configuration: explicit path must exist, otherwise well-known
/// locations, otherwise defaults
fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("config file not found: {}", path.display());
            }
            Config::from_file(&path).context("failed to load configuration")
        }
        None => {
            let default_paths = [PathBuf::from("metro.toml"), PathBuf::from("configs/metro.toml")];
            for path in &default_paths {
                if path.exists() {
                    info!(config = %path.display(), "using config file");
                    return Config::from_file(path).context("failed to load configuration");
                }
            }
            info!("no config file found, using defaults (listen on 0.0.0.0:2003, no routes)");
            Ok(Config::default())
        }
    }
}

/// Main relay run loop
async fn run_relay(config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let stats = Arc::new(StatsRegistry::new());

    // Routing table with the initial routes from config.
    let options = RelayOptions {
        input_capacity: config.tuning.route_queue_size,
        reconnect_period: config.tuning.reconnect_period(),
        spool: SpoolConfig::default(),
    };
    let table = Arc::new(RoutingTable::new(
        &config.spool_dir,
        options,
        Arc::clone(&stats),
    ));
    for route in &config.routes {
        table
            .add(&route.key, &route.pattern, &route.addr, route.spool)
            .await
            .with_context(|| format!("failed to start route '{}'", route.key))?;
    }
    info!(routes = table.len().await, "routing table started");

    // Ingress feeds the dispatcher over one channel.
    let (lines_tx, lines_rx) = mpsc::channel::<Bytes>(config.tuning.ingress_queue_size);

    let ingress = Ingress::new(
        IngressConfig {
            listen_addr: config.listen_addr.clone(),
            max_line_bytes: config.tuning.max_line_bytes,
        },
        Arc::clone(&stats),
        lines_tx,
    );
    let ingress_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = ingress.run(cancel.clone()).await {
                error!(error = %e, "ingress failed");
                cancel.cancel();
            }
        })
    };

    let dispatcher = Dispatcher::new(Arc::clone(&table), Arc::clone(&stats), config.first_only);
    let dispatcher_task = tokio::spawn(dispatcher.run(lines_rx, cancel.clone()));

    // Admin surfaces.
    if !config.admin_addr.is_empty() {
        let server = AdminServer::new(config.admin_addr.clone(), Arc::clone(&table));
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = server.run(cancel.clone()).await {
                error!(error = %e, "admin channel failed");
                cancel.cancel();
            }
        });
    }

    if let Some(http_addr) = config.http_addr.clone() {
        let table = Arc::clone(&table);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_http(&http_addr, table, cancel.clone()).await {
                error!(error = %e, "HTTP admin failed");
                cancel.cancel();
            }
        });
    }

    // Telemetry reporter; losing it is not fatal to delivery.
    let mut reporter_task = None;
    if config.telemetry.enabled {
        let reporter_config = ReporterConfig {
            addr: config.telemetry.addr.clone(),
            prefix: config.telemetry.prefix(),
            flush_interval: config.telemetry.flush_interval(),
        };
        match StatsdReporter::new(reporter_config, Arc::clone(&stats)).await {
            Ok(reporter) => {
                reporter_task = Some(tokio::spawn(reporter.run(cancel.clone())));
            }
            Err(e) => warn!(error = %e, "statsd reporter disabled"),
        }
    }

    wait_for_shutdown_signal(&cancel).await;

    // Stop accepting and dispatching, then stop the routes so every spool
    // gets its final sync.
    cancel.cancel();
    let _ = ingress_task.await;
    let _ = dispatcher_task.await;
    table.shutdown_all().await;
    if let Some(task) = reporter_task {
        let _ = task.await;
    }

    Ok(())
}

/// Block until SIGINT/SIGTERM or an internal failure cancels the token
async fn wait_for_shutdown_signal(cancel: &CancellationToken) {
    #[cfg(unix)]
    {
        let mut term = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                cancel.cancelled().await;
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => info!("SIGINT received, shutting down"),
            _ = term.recv() => info!("SIGTERM received, shutting down"),
            _ = cancel.cancelled() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = signal::ctrl_c() => info!("ctrl-c received, shutting down"),
            _ = cancel.cancelled() => {}
        }
    }
}
