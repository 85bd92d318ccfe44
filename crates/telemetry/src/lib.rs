//! Metro telemetry
//!
//! Delivery counters and their export. Every route carries a set of atomic
//! counters that the relay increments on the hot path; a process-wide
//! [`StatsRegistry`] hands out and tracks those counters; the optional
//! [`StatsdReporter`] flushes counter deltas to a statsd daemon over UDP at a
//! fixed interval.
//!
//! Counter semantics follow the wire protocol's delivery outcomes:
//!
//! - `direction=in` - line accepted by the ingress listener
//! - `direction=out` - line written to a sink
//! - `direction=spool` - line enqueued to the route's disk spool
//! - `direction=drop` - line discarded while disconnected (no spool)
//! - `unit=Err` - write failure or truncation

mod counters;
mod registry;
mod reporter;
mod statsd;

pub use counters::{IngressCounters, IngressSnapshot, RouteCounters, RouteCounterSnapshot};
pub use registry::StatsRegistry;
pub use reporter::{ReporterConfig, StatsdReporter};
pub use statsd::StatsdClient;

use thiserror::Error;

/// Result type for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors that can occur while setting up telemetry export
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to bind the local UDP socket for statsd
    #[error("failed to bind statsd socket: {0}")]
    Bind(#[source] std::io::Error),

    /// Statsd target address did not resolve
    #[error("statsd address '{addr}' did not resolve")]
    BadAddr {
        /// The configured address
        addr: String,
    },
}
