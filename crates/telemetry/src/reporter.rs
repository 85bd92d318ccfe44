//! Statsd reporter task
//!
//! Walks the [`StatsRegistry`] at a fixed interval and pushes counter deltas
//! to statsd. The atomics remain the authority; the reporter only ever reads
//! snapshots, so a slow or absent statsd daemon cannot stall delivery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::counters::{IngressSnapshot, RouteCounterSnapshot};
use crate::registry::StatsRegistry;
use crate::statsd::StatsdClient;

/// Reporter configuration
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Statsd daemon address (host:port)
    pub addr: String,

    /// Metric name prefix, e.g. `service=metro.instance=main.`
    pub prefix: String,

    /// Flush interval
    pub flush_interval: Duration,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8125".to_string(),
            prefix: "service=metro.".to_string(),
            flush_interval: Duration::from_secs(10),
        }
    }
}

/// Periodic counter flusher
pub struct StatsdReporter {
    config: ReporterConfig,
    registry: Arc<StatsRegistry>,
    client: StatsdClient,
    last_ingress: IngressSnapshot,
    last_routes: HashMap<String, RouteCounterSnapshot>,
}

impl StatsdReporter {
    /// Create a reporter; fails if the statsd address does not resolve
    pub async fn new(config: ReporterConfig, registry: Arc<StatsRegistry>) -> crate::Result<Self> {
        let client = StatsdClient::connect(&config.addr, config.prefix.clone()).await?;
        Ok(Self {
            config,
            registry,
            client,
            last_ingress: IngressSnapshot::default(),
            last_routes: HashMap::new(),
        })
    }

    /// Run until cancellation, flushing once more on the way out
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            addr = %self.config.addr,
            interval_secs = self.config.flush_interval.as_secs(),
            "statsd reporter starting"
        );

        let mut ticker = interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.flush().await;
                    break;
                }
                _ = ticker.tick() => {
                    self.flush().await;
                }
            }
        }

        tracing::info!("statsd reporter stopped");
    }

    /// Send the delta since the previous flush for every live counter
    async fn flush(&mut self) {
        let ingress = self.registry.ingress().snapshot();
        self.client
            .count(
                "target_type=count.unit=Metric.direction=in",
                ingress.lines_in.saturating_sub(self.last_ingress.lines_in),
            )
            .await;
        self.last_ingress = ingress;

        let routes = self.registry.routes();
        let mut seen = HashMap::with_capacity(routes.len());

        for (key, counters) in routes {
            let snap = counters.snapshot();
            let prev = self.last_routes.get(&key).copied().unwrap_or_default();

            self.client
                .count(
                    &format!("route={key}.target_type=count.unit=Metric.direction=out"),
                    snap.out.saturating_sub(prev.out),
                )
                .await;
            self.client
                .count(
                    &format!("route={key}.target_type=count.unit=Metric.direction=spool"),
                    snap.spooled.saturating_sub(prev.spooled),
                )
                .await;
            self.client
                .count(
                    &format!("route={key}.target_type=count.unit=Metric.direction=drop"),
                    snap.dropped.saturating_sub(prev.dropped),
                )
                .await;
            self.client
                .count(
                    &format!("route={key}.target_type=count.unit=Err"),
                    snap.errors.saturating_sub(prev.errors),
                )
                .await;

            seen.insert(key, snap);
        }

        // Deleted routes fall out of the baseline with their counters.
        self.last_routes = seen;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    async fn recv_all(socket: &UdpSocket, n: usize) -> Vec<String> {
        let mut out = Vec::with_capacity(n);
        let mut buf = [0u8; 512];
        for _ in 0..n {
            let (len, _) = socket.recv_from(&mut buf).await.unwrap();
            out.push(String::from_utf8_lossy(&buf[..len]).to_string());
        }
        out
    }

    #[tokio::test]
    async fn test_flush_sends_deltas() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = receiver.local_addr().unwrap().to_string();

        let registry = Arc::new(StatsRegistry::new());
        let counters = registry.register_route("prod");
        registry.ingress().record_in();
        counters.record_out();
        counters.record_out();

        let config = ReporterConfig {
            addr,
            prefix: String::new(),
            flush_interval: Duration::from_secs(60),
        };
        let mut reporter = StatsdReporter::new(config, Arc::clone(&registry))
            .await
            .unwrap();

        reporter.flush().await;
        let first = recv_all(&receiver, 2).await;
        assert!(first
            .iter()
            .any(|m| m == "target_type=count.unit=Metric.direction=in:1|c"));
        assert!(first
            .iter()
            .any(|m| m == "route=prod.target_type=count.unit=Metric.direction=out:2|c"));

        // Second flush only reports what changed since the first.
        counters.record_out();
        reporter.flush().await;
        let second = recv_all(&receiver, 1).await;
        assert_eq!(
            second[0],
            "route=prod.target_type=count.unit=Metric.direction=out:1|c"
        );
    }
}
