//! Minimal statsd counter client
//!
//! Fire-and-forget UDP datagrams in the classic `name:value|c` format. Send
//! failures are logged at debug and otherwise ignored; losing a counter
//! datagram must never affect delivery.

use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::{Result, TelemetryError};

/// UDP statsd client
#[derive(Debug)]
pub struct StatsdClient {
    socket: UdpSocket,
    target: SocketAddr,
    prefix: String,
}

impl StatsdClient {
    /// Create a client sending to `addr` with every metric name prefixed by
    /// `prefix` (pass an empty string for none).
    pub async fn connect(addr: &str, prefix: impl Into<String>) -> Result<Self> {
        let target = tokio::net::lookup_host(addr)
            .await
            .map_err(|_| TelemetryError::BadAddr {
                addr: addr.to_string(),
            })?
            .next()
            .ok_or_else(|| TelemetryError::BadAddr {
                addr: addr.to_string(),
            })?;

        let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await.map_err(TelemetryError::Bind)?;

        Ok(Self {
            socket,
            target,
            prefix: prefix.into(),
        })
    }

    /// Send a counter increment of `value` for `name`
    pub async fn count(&self, name: &str, value: u64) {
        if value == 0 {
            return;
        }
        let datagram = format!("{}{}:{}|c", self.prefix, name, value);
        if let Err(e) = self.socket.send_to(datagram.as_bytes(), self.target).await {
            tracing::debug!(error = %e, metric = %name, "statsd send failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_count_format() {
        // Bind a receiver so the datagram can be inspected on the wire.
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = receiver.local_addr().unwrap();

        let client = StatsdClient::connect(&addr.to_string(), "service=metro.")
            .await
            .unwrap();
        client.count("direction=in", 3).await;

        let mut buf = [0u8; 256];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"service=metro.direction=in:3|c");
    }

    #[tokio::test]
    async fn test_zero_is_suppressed() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = receiver.local_addr().unwrap();

        let client = StatsdClient::connect(&addr.to_string(), "").await.unwrap();
        client.count("direction=in", 0).await;
        client.count("direction=out", 1).await;

        let mut buf = [0u8; 256];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        // The zero-valued counter was never sent.
        assert_eq!(&buf[..n], b"direction=out:1|c");
    }

    #[tokio::test]
    async fn test_bad_addr() {
        let err = StatsdClient::connect("nope:notaport", "").await;
        assert!(err.is_err());
    }
}
