//! Dispatcher task
//!
//! Single consumer of the ingress line channel. Each line is matched
//! against the routing table; unmatched lines are counted and logged. The
//! only place this task can block is a matched route's input channel, which
//! is the intended backpressure path from a slow route back to the ingress.

use std::sync::Arc;

use bytes::Bytes;
use metro_routing::RoutingTable;
use metro_telemetry::StatsRegistry;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The table-facing consumer of ingress lines
pub struct Dispatcher {
    table: Arc<RoutingTable>,
    stats: Arc<StatsRegistry>,
    first_only: bool,
}

impl Dispatcher {
    /// Create a dispatcher for `table`
    ///
    /// With `first_only`, a line goes only to the first matching route in
    /// table order; otherwise it fans out to every match.
    pub fn new(table: Arc<RoutingTable>, stats: Arc<StatsRegistry>, first_only: bool) -> Self {
        Self {
            table,
            stats,
            first_only,
        }
    }

    /// Consume lines until the channel closes or cancellation
    pub async fn run(self, mut lines_rx: mpsc::Receiver<Bytes>, cancel: CancellationToken) {
        tracing::info!(first_only = self.first_only, "dispatcher starting");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = lines_rx.recv() => match maybe {
                    Some(line) => {
                        if !self.table.dispatch(&line, self.first_only).await {
                            self.stats.ingress().record_unroutable();
                            tracing::debug!(
                                line = %String::from_utf8_lossy(&line).trim_end(),
                                "unrouteable"
                            );
                        }
                    }
                    None => break,
                },
            }
        }

        tracing::info!("dispatcher stopped");
    }
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod dispatcher_test;
