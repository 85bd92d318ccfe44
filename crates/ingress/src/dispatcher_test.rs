//! Dispatcher tests
//!
//! The dispatcher is exercised against a real routing table. Spooled routes
//! make delivery deterministic: a line dispatched before the route's first
//! connect lands in the spool and drains once the sink is up.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metro_routing::{RelayOptions, RoutingTable};
use metro_spool::SpoolConfig;
use metro_telemetry::StatsRegistry;
use tempfile::tempdir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::*;

fn test_options() -> RelayOptions {
    RelayOptions {
        input_capacity: 16,
        reconnect_period: Duration::from_millis(100),
        spool: SpoolConfig {
            max_segment_bytes: 1024 * 1024,
            sync_every_records: 10,
            sync_interval: Duration::from_millis(50),
            put_queue_size: 8,
        },
    }
}

async fn start_sink() -> (String, mpsc::UnboundedReceiver<Bytes>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stream);
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    match reader.read_until(b'\n', &mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            let _ = tx.send(Bytes::copy_from_slice(&buf));
                        }
                    }
                }
            });
        }
    });

    (addr, rx)
}

#[tokio::test]
async fn test_matched_line_reaches_route() {
    let dir = tempdir().unwrap();
    let (addr, mut sink) = start_sink().await;

    let stats = Arc::new(StatsRegistry::new());
    let table = Arc::new(RoutingTable::new(
        dir.path(),
        test_options(),
        Arc::clone(&stats),
    ));
    // Spooled so the dispatched line survives the route's dial window.
    table.add("r", "", &addr, true).await.unwrap();

    let (lines_tx, lines_rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let dispatcher = Dispatcher::new(Arc::clone(&table), Arc::clone(&stats), false);
    tokio::spawn(dispatcher.run(lines_rx, cancel.clone()));

    lines_tx
        .send(Bytes::from_static(b"hello 1 0\n"))
        .await
        .unwrap();

    let line = timeout(Duration::from_secs(5), sink.recv())
        .await
        .expect("line never delivered")
        .unwrap();
    assert_eq!(line, Bytes::from_static(b"hello 1 0\n"));
    assert_eq!(stats.ingress().snapshot().unroutable, 0);

    cancel.cancel();
    table.shutdown_all().await;
}

#[tokio::test]
async fn test_unmatched_line_is_counted_unroutable() {
    let dir = tempdir().unwrap();
    let (addr, _sink) = start_sink().await;

    let stats = Arc::new(StatsRegistry::new());
    let table = Arc::new(RoutingTable::new(
        dir.path(),
        test_options(),
        Arc::clone(&stats),
    ));
    table.add("prod", r"\.prod\.", &addr, false).await.unwrap();

    let (lines_tx, lines_rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let dispatcher = Dispatcher::new(Arc::clone(&table), Arc::clone(&stats), true);
    tokio::spawn(dispatcher.run(lines_rx, cancel.clone()));

    lines_tx
        .send(Bytes::from_static(b"app.dev.count 1 0\n"))
        .await
        .unwrap();

    timeout(Duration::from_secs(5), async {
        while stats.ingress().snapshot().unroutable == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("unroutable counter never incremented");

    cancel.cancel();
    table.shutdown_all().await;
}

#[tokio::test]
async fn test_dispatcher_stops_when_channel_closes() {
    let dir = tempdir().unwrap();

    let stats = Arc::new(StatsRegistry::new());
    let table = Arc::new(RoutingTable::new(
        dir.path(),
        test_options(),
        Arc::clone(&stats),
    ));

    let (lines_tx, lines_rx) = mpsc::channel::<Bytes>(16);
    let dispatcher = Dispatcher::new(table, stats, false);
    let task = tokio::spawn(dispatcher.run(lines_rx, CancellationToken::new()));

    drop(lines_tx);
    timeout(Duration::from_secs(5), task)
        .await
        .expect("dispatcher never stopped")
        .unwrap();
}
