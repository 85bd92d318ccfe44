//! Textual admin channel
//!
//! A line-oriented TCP server in the spirit of a telnet console: one
//! command per line, responses terminated by a newline, tables rendered
//! with aligned columns.

use std::sync::Arc;

use metro_routing::RoutingTable;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::command::{Command, HELP};
use crate::{AdminError, Result};

/// The textual control channel server
pub struct AdminServer {
    addr: String,
    table: Arc<RoutingTable>,
}

impl AdminServer {
    /// Create a server for `table` listening on `addr`
    pub fn new(addr: impl Into<String>, table: Arc<RoutingTable>) -> Self {
        Self {
            addr: addr.into(),
            table,
        }
    }

    /// Bind and serve until cancellation
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|e| AdminError::Bind {
                address: self.addr.clone(),
                source: e,
            })?;

        tracing::info!(address = %self.addr, "admin channel listening");
        self.run_on(listener, cancel).await
    }

    /// Serve on an already bound listener until cancellation
    pub async fn run_on(self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let table = Arc::clone(&self.table);
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, table).await {
                                tracing::debug!(peer = %peer_addr, error = %e, "admin connection error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "admin accept error");
                    }
                },
            }
        }

        tracing::info!("admin channel stopped");
        Ok(())
    }
}

/// Serve one admin client until EOF or `quit`
async fn handle_client(stream: TcpStream, table: Arc<RoutingTable>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(message) => {
                write_half.write_all(message.as_bytes()).await?;
                write_half.write_all(b"\n").await?;
                write_half.write_all(HELP.as_bytes()).await?;
                continue;
            }
        };

        match command {
            Command::Quit => break,
            Command::Help => write_half.write_all(HELP.as_bytes()).await?,
            Command::RouteList => {
                let rendered = render_route_list(&table).await;
                write_half.write_all(rendered.as_bytes()).await?;
            }
            Command::RouteAdd {
                key,
                pattern,
                addr,
                spool,
            } => match table.add(&key, &pattern, &addr, spool).await {
                Ok(()) => write_half.write_all(b"added\n").await?,
                Err(e) => write_error(&mut write_half, &e).await?,
            },
            Command::RouteDel { key } => match table.remove(&key).await {
                Ok(()) => write_half.write_all(b"deleted\n").await?,
                Err(e) => write_error(&mut write_half, &e).await?,
            },
            Command::RoutePatt { key, pattern } => {
                match table.update(&key, None, Some(&pattern)).await {
                    Ok(()) => write_half.write_all(b"updated\n").await?,
                    Err(e) => write_error(&mut write_half, &e).await?,
                }
            }
        }
    }

    Ok(())
}

async fn write_error(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    error: &metro_routing::TableError,
) -> Result<()> {
    write_half
        .write_all(format!("error: {error}\n").as_bytes())
        .await?;
    Ok(())
}

/// Render the route table with columns sized to the widest entry
async fn render_route_list(table: &RoutingTable) -> String {
    let routes = table.snapshot().await;

    let mut key_width = 9;
    let mut pattern_width = 9;
    let mut addr_width = 9;
    for route in &routes {
        key_width = key_width.max(route.key.len());
        pattern_width = pattern_width.max(route.pattern.len());
        addr_width = addr_width.max(route.addr.len());
    }

    let mut out = format!(
        "{:>kw$} {:>pw$} {:>aw$} {:>8}\n",
        "key",
        "pattern",
        "addr",
        "spool",
        kw = key_width + 1,
        pw = pattern_width + 1,
        aw = addr_width + 1,
    );
    for route in &routes {
        out.push_str(&format!(
            "{:>kw$} {:>pw$} {:>aw$} {:>8}\n",
            route.key,
            route.pattern,
            route.addr,
            route.spool,
            kw = key_width + 1,
            pw = pattern_width + 1,
            aw = addr_width + 1,
        ));
    }
    out.push_str("--\n");
    out
}

#[cfg(test)]
#[path = "server_test.rs"]
mod server_test;
