//! TCP listener with newline framing
//!
//! Accepts connections and reads newline-delimited records with a bounded
//! line reader, handing each complete line (terminator included) to the
//! dispatch channel. A line that outgrows the buffer is a framing error:
//! the line is discarded and the connection dropped, since the rest of the
//! stream can no longer be framed reliably.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use metro_telemetry::StatsRegistry;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{IngressError, Result};

/// Ingress listener configuration
#[derive(Debug, Clone)]
pub struct IngressConfig {
    /// Bind address (host:port)
    pub listen_addr: String,

    /// Maximum line length; longer lines are a framing error
    pub max_line_bytes: usize,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:2003".to_string(),
            max_line_bytes: 4096,
        }
    }
}

/// The plaintext metrics listener
pub struct Ingress {
    config: IngressConfig,
    lines_tx: mpsc::Sender<Bytes>,
    stats: Arc<StatsRegistry>,
}

impl Ingress {
    /// Create a listener feeding `lines_tx`
    pub fn new(config: IngressConfig, stats: Arc<StatsRegistry>, lines_tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            config,
            lines_tx,
            stats,
        }
    }

    /// Bind the configured address and serve until cancellation
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|e| IngressError::Bind {
                address: self.config.listen_addr.clone(),
                source: e,
            })?;

        tracing::info!(address = %self.config.listen_addr, "ingress listening");
        self.run_on(listener, cancel).await
    }

    /// Serve on an already bound listener until cancellation
    pub async fn run_on(self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let handler = ConnectionHandler {
                            max_line_bytes: self.config.max_line_bytes,
                            lines_tx: self.lines_tx.clone(),
                            stats: Arc::clone(&self.stats),
                            peer_addr,
                        };
                        tokio::spawn(async move {
                            if let Err(e) = handler.handle(stream).await {
                                tracing::debug!(peer = %peer_addr, error = %e, "connection error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept error");
                    }
                },
            }
        }

        tracing::info!("ingress stopped");
        Ok(())
    }
}

/// Reads one client's lines until EOF or a framing error
struct ConnectionHandler {
    max_line_bytes: usize,
    lines_tx: mpsc::Sender<Bytes>,
    stats: Arc<StatsRegistry>,
    peer_addr: SocketAddr,
}

impl ConnectionHandler {
    async fn handle(self, stream: TcpStream) -> Result<()> {
        let mut reader = BufReader::with_capacity(self.max_line_bytes, stream);
        let mut line_buf = Vec::with_capacity(self.max_line_bytes);

        loop {
            match read_bounded_line(&mut reader, &mut line_buf, self.max_line_bytes).await? {
                ReadLineResult::Line(_) => {
                    // Forward verbatim; a final unterminated fragment gets
                    // its terminator restored.
                    if line_buf.last() != Some(&b'\n') {
                        line_buf.push(b'\n');
                    }
                    self.stats.ingress().record_in();
                    self.lines_tx
                        .send(Bytes::copy_from_slice(&line_buf))
                        .await
                        .map_err(|_| IngressError::ChannelClosed)?;
                }
                ReadLineResult::TooLong => {
                    // The framing is gone; drop the whole connection.
                    self.stats.ingress().record_framing_error();
                    tracing::debug!(
                        peer = %self.peer_addr,
                        max = self.max_line_bytes,
                        "line exceeds buffer, dropping connection"
                    );
                    break;
                }
                ReadLineResult::Eof => break,
            }
        }

        Ok(())
    }
}

/// Result of reading a bounded line
enum ReadLineResult {
    /// A line is in the buffer (byte count includes the newline when present)
    Line(usize),
    /// Line exceeded the limit and was consumed
    TooLong,
    /// End of stream
    Eof,
}

/// Read a line with bounded memory
///
/// Reads until newline or `max_size` bytes. When the limit is hit, the rest
/// of the oversized line is consumed and discarded so the caller sees a
/// clean `TooLong`.
async fn read_bounded_line<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_size: usize,
) -> io::Result<ReadLineResult> {
    buf.clear();

    let mut total_bytes = 0;
    let mut found_newline = false;
    let mut exceeded_limit = false;

    loop {
        let available = reader.fill_buf().await?;

        if available.is_empty() {
            if total_bytes == 0 {
                return Ok(ReadLineResult::Eof);
            }
            break;
        }

        let newline_pos = available.iter().position(|&b| b == b'\n');
        let (bytes_to_consume, done) = match newline_pos {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };

        let space_remaining = max_size.saturating_sub(buf.len());
        if !exceeded_limit && bytes_to_consume <= space_remaining {
            buf.extend_from_slice(&available[..bytes_to_consume]);
        } else if !exceeded_limit {
            exceeded_limit = true;
        }

        total_bytes += bytes_to_consume;
        reader.consume(bytes_to_consume);

        if done {
            found_newline = true;
            break;
        }
    }

    if exceeded_limit {
        if !found_newline {
            // Keep consuming until the oversized line ends.
            loop {
                let available = reader.fill_buf().await?;
                if available.is_empty() {
                    break;
                }
                if let Some(pos) = available.iter().position(|&b| b == b'\n') {
                    reader.consume(pos + 1);
                    break;
                }
                let len = available.len();
                reader.consume(len);
            }
        }
        return Ok(ReadLineResult::TooLong);
    }

    Ok(ReadLineResult::Line(total_bytes))
}

#[cfg(test)]
#[path = "tcp_test.rs"]
mod tcp_test;
