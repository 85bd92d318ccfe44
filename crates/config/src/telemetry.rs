//! Statsd telemetry configuration

use std::time::Duration;

use serde::Deserialize;

fn default_addr() -> String {
    "127.0.0.1:8125".to_string()
}

fn default_instance() -> String {
    "default".to_string()
}

fn default_flush_interval_secs() -> u64 {
    10
}

/// Telemetry reporting configuration
///
/// # Example
///
/// ```toml
/// [telemetry]
/// enabled = true
/// addr = "127.0.0.1:8125"
/// instance = "relay1"
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Emit counters to statsd
    pub enabled: bool,

    /// Statsd daemon address (host:port)
    pub addr: String,

    /// Instance name embedded in the metric prefix
    pub instance: String,

    /// Seconds between counter flushes
    pub flush_interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_addr(),
            instance: default_instance(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

impl TelemetryConfig {
    /// Metric name prefix for this instance
    pub fn prefix(&self) -> String {
        format!("service=metro.instance={}.", self.instance)
    }

    /// Flush interval as a [`Duration`]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }
}
