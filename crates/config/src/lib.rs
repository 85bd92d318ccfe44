//! Metro configuration
//!
//! TOML-based configuration loading with sensible defaults. A minimal config
//! only needs a listen address and some routes; everything else has a
//! default that works.
//!
//! # Example
//!
//! ```toml
//! listen_addr = "0.0.0.0:2003"
//! admin_addr  = "127.0.0.1:2004"
//! spool_dir   = "spool"
//! first_only  = true
//!
//! [[routes]]
//! key = "prod"
//! pattern = "\\.prod\\."
//! addr = "10.0.0.1:2003"
//! spool = true
//!
//! [[routes]]
//! key = "catchall"
//! addr = "10.0.0.2:2003"
//! ```
//!
//! Routes are an array of tables so that the file order is the dispatch
//! order.

mod error;
mod logging;
mod routes;
mod telemetry;
mod tuning;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use routes::RouteConfig;
pub use telemetry::TelemetryConfig;
pub use tuning::TuningConfig;

use serde::Deserialize;

fn default_listen_addr() -> String {
    "0.0.0.0:2003".to_string()
}

fn default_admin_addr() -> String {
    "127.0.0.1:2004".to_string()
}

fn default_spool_dir() -> String {
    "spool".to_string()
}

/// Main configuration structure
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ingress listen address for the plaintext metrics protocol
    pub listen_addr: String,

    /// Textual admin channel listen address (empty = disabled)
    pub admin_addr: String,

    /// HTTP admin listen address (unset = disabled)
    pub http_addr: Option<String>,

    /// Directory under which spooled routes keep their queues
    pub spool_dir: String,

    /// Stop at the first matching route instead of fanning out
    pub first_only: bool,

    /// Logging configuration
    pub log: LogConfig,

    /// Statsd telemetry configuration
    pub telemetry: TelemetryConfig,

    /// Channel and framing tuning knobs
    pub tuning: TuningConfig,

    /// Initial route table, in dispatch order
    pub routes: Vec<RouteConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            admin_addr: default_admin_addr(),
            http_addr: None,
            spool_dir: default_spool_dir(),
            first_only: false,
            log: LogConfig::default(),
            telemetry: TelemetryConfig::default(),
            tuning: TuningConfig::default(),
            routes: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, contains invalid TOML,
    /// or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        contents.parse()
    }

    /// Validate cross-field constraints
    ///
    /// Checks route keys are non-empty and unique, patterns compile, and
    /// sink addresses have a host:port shape. Called automatically by
    /// [`Config::from_file`] and [`FromStr`].
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for route in &self.routes {
            if route.key.is_empty() {
                return Err(ConfigError::EmptyRouteKey);
            }
            if !seen.insert(route.key.as_str()) {
                return Err(ConfigError::duplicate_route_key(&route.key));
            }
            regex::Regex::new(&route.pattern).map_err(|e| ConfigError::InvalidPattern {
                key: route.key.clone(),
                source: e,
            })?;
            validate_host_port("routes.addr", &route.addr)?;
        }

        validate_host_port("listen_addr", &self.listen_addr)?;
        if !self.admin_addr.is_empty() {
            validate_host_port("admin_addr", &self.admin_addr)?;
        }
        if let Some(addr) = &self.http_addr {
            validate_host_port("http_addr", addr)?;
        }
        if self.telemetry.enabled {
            validate_host_port("telemetry.addr", &self.telemetry.addr)?;
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

/// Check that a value looks like host:port with a numeric port
///
/// Addresses are resolved lazily at dial time, so this only rejects shapes
/// that could never resolve.
fn validate_host_port(field: &'static str, value: &str) -> Result<()> {
    let bad = || ConfigError::InvalidAddr {
        field,
        value: value.to_string(),
    };

    let (host, port) = value.rsplit_once(':').ok_or_else(bad)?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(bad());
    }
    Ok(())
}
