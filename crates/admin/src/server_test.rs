//! Textual admin channel tests
//!
//! A real server over loopback, driven the way an operator with netcat
//! would drive it.

use std::sync::Arc;
use std::time::Duration;

use metro_routing::{RelayOptions, RoutingTable};
use metro_spool::SpoolConfig;
use metro_telemetry::StatsRegistry;
use tempfile::{tempdir, TempDir};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{tcp::OwnedReadHalf, TcpListener, TcpStream};
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

struct Harness {
    table: Arc<RoutingTable>,
    reader: BufReader<OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
    cancel: CancellationToken,
    _dir: TempDir,
}

async fn start_admin() -> Harness {
    let dir = tempdir().unwrap();
    let table = Arc::new(RoutingTable::new(
        dir.path(),
        test_options(),
        Arc::new(StatsRegistry::new()),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let cancel = CancellationToken::new();

    let server = AdminServer::new(addr.clone(), Arc::clone(&table));
    tokio::spawn(server.run_on(listener, cancel.clone()));

    let stream = TcpStream::connect(&addr).await.unwrap();
    let (read_half, writer) = stream.into_split();

    Harness {
        table,
        reader: BufReader::new(read_half),
        writer,
        cancel,
        _dir: dir,
    }
}

impl Harness {
    async fn send(&mut self, command: &str) {
        self.writer
            .write_all(format!("{command}\n").as_bytes())
            .await
            .unwrap();
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("timed out reading admin response")
            .unwrap();
        line
    }

    /// Read lines until (and including) the `--` table terminator
    async fn read_table(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await;
            let done = line.trim_end() == "--";
            lines.push(line);
            if done {
                break;
            }
        }
        lines
    }
}

#[tokio::test]
async fn test_add_list_delete_cycle() {
    let mut harness = start_admin().await;

    harness.send("route add prod \\.prod\\. 127.0.0.9:2003 0").await;
    assert_eq!(harness.read_line().await, "added\n");

    harness.send("route list").await;
    let table = harness.read_table().await;
    assert!(table[0].contains("key"));
    assert!(table[0].contains("pattern"));
    assert!(table.iter().any(|l| l.contains("prod") && l.contains("127.0.0.9:2003")));

    harness.send("route del prod").await;
    assert_eq!(harness.read_line().await, "deleted\n");

    harness.send("route list").await;
    let table = harness.read_table().await;
    // Header plus terminator only.
    assert_eq!(table.len(), 2);

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_add_without_pattern_matches_all() {
    let mut harness = start_admin().await;

    harness.send("route add catchall 127.0.0.9:2003 0").await;
    assert_eq!(harness.read_line().await, "added\n");

    let snapshot = harness.table.snapshot().await;
    assert_eq!(snapshot[0].pattern, "");
    assert!(!snapshot[0].spool);

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_duplicate_add_reports_error() {
    let mut harness = start_admin().await;

    harness.send("route add r 127.0.0.9:2003 0").await;
    assert_eq!(harness.read_line().await, "added\n");

    harness.send("route add r 127.0.0.9:2003 0").await;
    let response = harness.read_line().await;
    assert!(response.starts_with("error:"));
    assert!(response.contains("already exists"));

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_patt_updates_pattern() {
    let mut harness = start_admin().await;

    harness.send("route add r 127.0.0.9:2003 0").await;
    assert_eq!(harness.read_line().await, "added\n");

    harness.send("route patt r ^foo").await;
    assert_eq!(harness.read_line().await, "updated\n");
    assert_eq!(harness.table.snapshot().await[0].pattern, "^foo");

    // Omitting the pattern resets to match-all.
    harness.send("route patt r").await;
    assert_eq!(harness.read_line().await, "updated\n");
    assert_eq!(harness.table.snapshot().await[0].pattern, "");

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_bad_pattern_reports_error_and_keeps_route() {
    let mut harness = start_admin().await;

    harness.send("route add r ^keep 127.0.0.9:2003 0").await;
    assert_eq!(harness.read_line().await, "added\n");

    harness.send("route patt r [").await;
    let response = harness.read_line().await;
    assert!(response.starts_with("error:"));

    assert_eq!(harness.table.snapshot().await[0].pattern, "^keep");

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_unknown_command_prints_help() {
    let mut harness = start_admin().await;

    harness.send("frobnicate").await;
    let first = harness.read_line().await;
    assert!(first.contains("unknown command"));

    // Help text follows; look for a known fragment.
    let mut saw_route_add = false;
    for _ in 0..10 {
        let line = harness.read_line().await;
        if line.contains("route add <key>") {
            saw_route_add = true;
            break;
        }
    }
    assert!(saw_route_add, "help text not shown after unknown command");

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_del_unknown_reports_error() {
    let mut harness = start_admin().await;

    harness.send("route del ghost").await;
    let response = harness.read_line().await;
    assert!(response.starts_with("error:"));
    assert!(response.contains("unknown route"));

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_quit_closes_connection() {
    let mut harness = start_admin().await;

    harness.send("quit").await;
    let mut line = String::new();
    let n = timeout(Duration::from_secs(5), harness.reader.read_line(&mut line))
        .await
        .expect("timed out waiting for close")
        .unwrap();
    assert_eq!(n, 0);

    harness.cancel.cancel();
}
