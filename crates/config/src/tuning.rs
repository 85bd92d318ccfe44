//! Channel and framing tuning knobs
//!
//! Defaults match the behavior of the relay as deployed: a 4 KiB line
//! buffer, modest per-route queues, and a 60 second reconnect period.

use std::time::Duration;

use serde::Deserialize;

fn default_max_line_bytes() -> usize {
    4096
}

fn default_route_queue_size() -> usize {
    64
}

fn default_ingress_queue_size() -> usize {
    1024
}

fn default_reconnect_period_secs() -> u64 {
    60
}

/// Tuning configuration
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TuningConfig {
    /// Maximum ingress line length; longer lines are a framing error
    pub max_line_bytes: usize,

    /// Capacity of each route's input channel
    pub route_queue_size: usize,

    /// Capacity of the ingress-to-dispatcher channel
    pub ingress_queue_size: usize,

    /// Seconds between reconnect attempts while a sink is down
    pub reconnect_period_secs: u64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: default_max_line_bytes(),
            route_queue_size: default_route_queue_size(),
            ingress_queue_size: default_ingress_queue_size(),
            reconnect_period_secs: default_reconnect_period_secs(),
        }
    }
}

impl TuningConfig {
    /// Reconnect period as a [`Duration`]
    pub fn reconnect_period(&self) -> Duration {
        Duration::from_secs(self.reconnect_period_secs.max(1))
    }
}
