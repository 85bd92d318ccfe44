//! Outbound sink connection
//!
//! One-shot resolve + dial, then byte-level writes. The protocol is one-way:
//! there is no read side and no application-level keepalive. A failed or
//! truncated write poisons the connection; the relay closes it and dials a
//! fresh one.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpStream};

use crate::RelayError;

/// TCP keepalive probe time for outbound connections
const KEEPALIVE_TIME: Duration = Duration::from_secs(30);

/// An established connection to a downstream sink
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Connection {
    /// Resolve `addr` and dial the first address it yields
    ///
    /// # Errors
    ///
    /// [`RelayError::Resolve`] when resolution fails or yields nothing,
    /// [`RelayError::Dial`] when the TCP connect fails.
    pub async fn open(addr: &str) -> Result<Self, RelayError> {
        let target = lookup_host(addr)
            .await
            .map_err(|e| RelayError::Resolve {
                addr: addr.to_string(),
                message: e.to_string(),
            })?
            .next()
            .ok_or_else(|| RelayError::Resolve {
                addr: addr.to_string(),
                message: "no addresses".to_string(),
            })?;

        let stream = TcpStream::connect(target)
            .await
            .map_err(|e| RelayError::Dial {
                addr: addr.to_string(),
                source: e,
            })?;

        // Socket options are best effort; a sink that rejects them still works.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %target, error = %e, "failed to set TCP_NODELAY");
        }
        let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_TIME);
        if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
            tracing::debug!(peer = %target, error = %e, "failed to set TCP keepalive");
        }

        Ok(Self {
            stream,
            peer: target,
        })
    }

    /// The resolved address this connection is dialed to
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Write one line to the sink
    ///
    /// Issues a single write: a short count means the sink took part of the
    /// line and the stream can no longer be trusted, so it is reported as
    /// [`RelayError::TruncatedWrite`] and the caller must close.
    pub async fn write(&mut self, line: &[u8]) -> Result<(), RelayError> {
        let n = self.stream.write(line).await.map_err(RelayError::Write)?;
        if n < line.len() {
            return Err(RelayError::TruncatedWrite {
                wrote: n,
                expected: line.len(),
            });
        }
        Ok(())
    }

    /// Shut the stream down; errors are ignored (the peer may already be gone)
    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_and_write() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut conn = Connection::open(&addr).await.unwrap();
        conn.write(b"x.y.z 1 0\n").await.unwrap();

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 32];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"x.y.z 1 0\n");

        conn.close().await;
    }

    #[tokio::test]
    async fn test_dial_refused() {
        // Bind then drop to get a port nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = Connection::open(&addr).await.unwrap_err();
        assert!(matches!(err, RelayError::Dial { .. }));
    }

    #[tokio::test]
    async fn test_resolve_failure() {
        let err = Connection::open(":2003").await.unwrap_err();
        assert!(matches!(err, RelayError::Resolve { .. }));
    }
}
