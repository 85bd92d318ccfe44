//! Ingress listener tests

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metro_telemetry::StatsRegistry;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::*;

struct Harness {
    addr: String,
    lines: mpsc::Receiver<Bytes>,
    stats: Arc<StatsRegistry>,
    cancel: CancellationToken,
}

async fn start_ingress(max_line_bytes: usize) -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let stats = Arc::new(StatsRegistry::new());
    let (lines_tx, lines_rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();

    let ingress = Ingress::new(
        IngressConfig {
            listen_addr: addr.clone(),
            max_line_bytes,
        },
        Arc::clone(&stats),
        lines_tx,
    );
    tokio::spawn(ingress.run_on(listener, cancel.clone()));

    Harness {
        addr,
        lines: lines_rx,
        stats,
        cancel,
    }
}

async fn next_line(harness: &mut Harness) -> Bytes {
    timeout(Duration::from_secs(5), harness.lines.recv())
        .await
        .expect("timed out waiting for ingress line")
        .expect("line channel closed")
}

#[tokio::test]
async fn test_lines_forwarded_verbatim() {
    let mut harness = start_ingress(4096).await;

    let mut client = TcpStream::connect(&harness.addr).await.unwrap();
    client.write_all(b"app.prod.count 1 0\nx 2 0\n").await.unwrap();

    assert_eq!(
        next_line(&mut harness).await,
        Bytes::from_static(b"app.prod.count 1 0\n")
    );
    assert_eq!(next_line(&mut harness).await, Bytes::from_static(b"x 2 0\n"));
    assert_eq!(harness.stats.ingress().snapshot().lines_in, 2);

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_crlf_kept_verbatim() {
    let mut harness = start_ingress(4096).await;

    let mut client = TcpStream::connect(&harness.addr).await.unwrap();
    client.write_all(b"x 1 0\r\n").await.unwrap();

    assert_eq!(next_line(&mut harness).await, Bytes::from_static(b"x 1 0\r\n"));

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_final_fragment_gets_terminator() {
    let mut harness = start_ingress(4096).await;

    let mut client = TcpStream::connect(&harness.addr).await.unwrap();
    client.write_all(b"no.newline 9 9").await.unwrap();
    client.shutdown().await.unwrap();

    assert_eq!(
        next_line(&mut harness).await,
        Bytes::from_static(b"no.newline 9 9\n")
    );

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_oversized_line_is_framing_error_and_drops_connection() {
    let mut harness = start_ingress(16).await;

    let mut client = TcpStream::connect(&harness.addr).await.unwrap();
    let long = vec![b'a'; 64];
    client.write_all(&long).await.unwrap();
    client.write_all(b"\nafter 1 0\n").await.unwrap();

    // The server closes the connection; the client eventually reads EOF.
    let mut buf = [0u8; 16];
    let n = timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("timed out waiting for server close")
        .unwrap();
    assert_eq!(n, 0);

    // Nothing was forwarded, including the line after the oversized one.
    assert!(harness.lines.try_recv().is_err());
    assert_eq!(harness.stats.ingress().snapshot().framing_errors, 1);
    assert_eq!(harness.stats.ingress().snapshot().lines_in, 0);

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_many_connections_interleave() {
    let mut harness = start_ingress(4096).await;

    for i in 0..4 {
        let mut client = TcpStream::connect(&harness.addr).await.unwrap();
        client
            .write_all(format!("conn.{i} 1 0\n").as_bytes())
            .await
            .unwrap();
    }

    let mut received = Vec::new();
    for _ in 0..4 {
        received.push(next_line(&mut harness).await);
    }
    received.sort();
    let expected: Vec<Bytes> = (0..4)
        .map(|i| Bytes::from(format!("conn.{i} 1 0\n")))
        .collect();
    assert_eq!(received, expected);

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_bind_error() {
    // Occupy a port, then try to bind it again.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let stats = Arc::new(StatsRegistry::new());
    let (lines_tx, _lines_rx) = mpsc::channel(8);
    let ingress = Ingress::new(
        IngressConfig {
            listen_addr: addr,
            max_line_bytes: 4096,
        },
        stats,
        lines_tx,
    );

    let err = ingress.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, IngressError::Bind { .. }));
}
