//! Per-route relay task
//!
//! Every route runs one relay task that owns its connection state and,
//! for spooled routes, the durable queue. The task multiplexes five inputs
//! in a single select: live lines, spool drain, connect notifications, the
//! periodic reconnect tick, and shutdown.
//!
//! # Connection lifecycle
//!
//! Connect attempts run as short-lived tasks bracketed by `AttemptBegan` /
//! `AttemptEnded` events so the relay can tell whether an attempt is already
//! in flight. The relay eagerly starts one attempt at boot; afterwards the
//! tick is the only liveness lever: every period, if disconnected and no
//! attempt is pending, it starts another.
//!
//! # Spool gating
//!
//! The spool read branch is enabled only while a connection is up. A
//! disconnected relay therefore never pulls from the queue, which keeps
//! spooled lines strictly pending until they can actually be written.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metro_spool::{Spool, SpoolConfig};
use metro_telemetry::RouteCounters;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval_at;
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::matcher::Matcher;
use crate::RelayError;

/// Relay tuning parameters
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Capacity of the route's input channel
    pub input_capacity: usize,

    /// Period between reconnect attempts while disconnected
    pub reconnect_period: Duration,

    /// Durable queue parameters for spooled routes
    pub spool: SpoolConfig,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            input_capacity: 64,
            reconnect_period: Duration::from_secs(60),
            spool: SpoolConfig::default(),
        }
    }
}

/// Connect attempt notifications flowing back to the relay task
enum ConnEvent {
    /// An attempt started (background or caller-driven)
    AttemptBegan,
    /// The same attempt finished, success or not
    AttemptEnded,
    /// Attempt outcome; `None` means "failed, stay disconnected"
    Connected(Option<Connection>),
}

/// State shared between the table, the relay task, and connect attempts
///
/// The matcher and address sit behind short `parking_lot` locks that are
/// never held across an await. The matcher is swapped as a whole
/// `Arc<Matcher>` so the pattern string and compiled regex stay coherent.
struct RouteShared {
    key: String,
    spool: bool,
    matcher: RwLock<Arc<Matcher>>,
    addr: RwLock<String>,
    counters: Arc<RouteCounters>,
}

impl RouteShared {
    fn addr(&self) -> String {
        self.addr.read().clone()
    }

    fn matcher(&self) -> Arc<Matcher> {
        Arc::clone(&self.matcher.read())
    }
}

/// Handle to a running route
///
/// Owned by the routing table. Submissions and updates go through here;
/// the relay task itself is reached only via channels and the cancellation
/// token.
#[derive(Debug)]
pub struct RouteHandle {
    shared: Arc<RouteShared>,
    input: mpsc::Sender<Bytes>,
    conn_events: mpsc::Sender<ConnEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for RouteShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteShared")
            .field("key", &self.key)
            .field("spool", &self.spool)
            .field("addr", &*self.addr.read())
            .finish()
    }
}

impl std::fmt::Debug for ConnEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AttemptBegan => write!(f, "AttemptBegan"),
            Self::AttemptEnded => write!(f, "AttemptEnded"),
            Self::Connected(c) => write!(f, "Connected({})", c.is_some()),
        }
    }
}

impl RouteHandle {
    /// Route key
    pub fn key(&self) -> &str {
        &self.shared.key
    }

    /// Current pattern string
    pub fn pattern(&self) -> String {
        self.shared.matcher().pattern().to_string()
    }

    /// Current sink address
    pub fn addr(&self) -> String {
        self.shared.addr()
    }

    /// Is this route spooling to disk?
    pub fn spool(&self) -> bool {
        self.shared.spool
    }

    /// This route's delivery counters
    pub fn counters(&self) -> Arc<RouteCounters> {
        Arc::clone(&self.shared.counters)
    }

    /// Does the route's pattern match this line?
    #[inline]
    pub fn matches(&self, line: &[u8]) -> bool {
        self.shared.matcher().is_match(line)
    }

    /// Enqueue a line for delivery
    ///
    /// Awaits channel capacity when the route is backed up; this is the
    /// backpressure coupling from a slow route to the dispatcher.
    pub async fn submit(&self, line: Bytes) -> Result<(), RelayError> {
        self.input.send(line).await.map_err(|_| RelayError::NotRunning)
    }

    /// Recompile the pattern, keeping the previous one on failure
    pub fn update_pattern(&self, pattern: &str) -> Result<(), RelayError> {
        let matcher = Arc::new(Matcher::new(pattern)?);
        *self.shared.matcher.write() = matcher;
        tracing::info!(route = %self.shared.key, pattern = %pattern, "pattern updated");
        Ok(())
    }

    /// Change the sink address and reconnect
    ///
    /// The dial runs inline so the caller observes the same errors a
    /// first-time connect would produce. The new address sticks even when
    /// the dial fails; the relay's tick keeps retrying it.
    pub async fn update_addr(&self, addr: impl Into<String>) -> Result<(), RelayError> {
        let addr = addr.into();
        *self.shared.addr.write() = addr.clone();
        tracing::info!(route = %self.shared.key, addr = %addr, "address updated, reconnecting");

        self.conn_events
            .send(ConnEvent::AttemptBegan)
            .await
            .map_err(|_| RelayError::NotRunning)?;

        let result = match Connection::open(&addr).await {
            Ok(conn) => self
                .conn_events
                .send(ConnEvent::Connected(Some(conn)))
                .await
                .map_err(|_| RelayError::NotRunning),
            Err(e) => {
                let _ = self.conn_events.send(ConnEvent::Connected(None)).await;
                Err(e)
            }
        };
        let _ = self.conn_events.send(ConnEvent::AttemptEnded).await;
        result
    }

    /// Request termination; the task exits asynchronously
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for the relay task to finish (connection closed, spool flushed)
    pub async fn stopped(self) {
        if self.task.await.is_err() {
            tracing::error!(route = %self.shared.key, "relay task panicked");
        }
    }
}

/// Create the shared state and spawn the relay task for one route
pub(crate) fn spawn(
    key: &str,
    matcher: Matcher,
    addr: &str,
    spool: Option<Spool>,
    counters: Arc<RouteCounters>,
    options: &RelayOptions,
) -> RouteHandle {
    let shared = Arc::new(RouteShared {
        key: key.to_string(),
        spool: spool.is_some(),
        matcher: RwLock::new(Arc::new(matcher)),
        addr: RwLock::new(addr.to_string()),
        counters,
    });

    let (input_tx, input_rx) = mpsc::channel(options.input_capacity);
    let (events_tx, events_rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();

    let task = RelayTask {
        shared: Arc::clone(&shared),
        spool,
        conn: None,
        pending_connects: 0,
        events_tx: events_tx.clone(),
    };
    let task = tokio::spawn(task.run(
        input_rx,
        events_rx,
        cancel.clone(),
        options.reconnect_period,
    ));

    RouteHandle {
        shared,
        input: input_tx,
        conn_events: events_tx,
        cancel,
        task,
    }
}

/// The relay state machine
struct RelayTask {
    shared: Arc<RouteShared>,
    spool: Option<Spool>,
    conn: Option<Connection>,
    pending_connects: u32,
    events_tx: mpsc::Sender<ConnEvent>,
}

impl RelayTask {
    async fn run(
        mut self,
        mut input: mpsc::Receiver<Bytes>,
        mut events: mpsc::Receiver<ConnEvent>,
        cancel: CancellationToken,
        reconnect_period: Duration,
    ) {
        tracing::debug!(
            route = %self.shared.key,
            addr = %self.shared.addr(),
            spool = self.spool.is_some(),
            "relay starting"
        );

        self.spawn_connect();

        let mut ticker = interval_at(
            tokio::time::Instant::now() + reconnect_period,
            reconnect_period,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            // Spool drain is gated on being connected; while disconnected the
            // queue is strictly pending.
            let unspool_ready = self.conn.is_some() && self.spool.is_some();

            tokio::select! {
                _ = cancel.cancelled() => break,

                Some(event) = events.recv() => self.handle_event(event).await,

                _ = ticker.tick() => {
                    if self.conn.is_none() && self.pending_connects == 0 {
                        self.spawn_connect();
                    }
                }

                drained = spool_recv(&mut self.spool), if unspool_ready => {
                    match drained {
                        Some(line) => self.process_packet(line).await,
                        None => {
                            tracing::error!(route = %self.shared.key, "spool read channel closed");
                            self.spool = None;
                        }
                    }
                }

                maybe = input.recv() => match maybe {
                    Some(line) => self.process_packet(line).await,
                    // Handle dropped without shutdown; treat the same way.
                    None => break,
                },
            }
        }

        if let Some(conn) = self.conn.take() {
            conn.close().await;
        }
        if let Some(spool) = self.spool.take() {
            spool.close().await;
        }
        tracing::debug!(route = %self.shared.key, "relay stopped");
    }

    async fn handle_event(&mut self, event: ConnEvent) {
        match event {
            ConnEvent::AttemptBegan => self.pending_connects += 1,
            ConnEvent::AttemptEnded => {
                self.pending_connects = self.pending_connects.saturating_sub(1);
            }
            ConnEvent::Connected(new_conn) => {
                // At most one connection per route: the old one is closed
                // before the replacement is installed.
                if let Some(old) = self.conn.take() {
                    old.close().await;
                }
                if let Some(conn) = &new_conn {
                    tracing::info!(
                        route = %self.shared.key,
                        peer = %conn.peer(),
                        "connected"
                    );
                }
                self.conn = new_conn;
            }
        }
    }

    /// Deliver, spool, or drop one line
    async fn process_packet(&mut self, line: Bytes) {
        let counters = Arc::clone(&self.shared.counters);

        let Some(conn) = self.conn.as_mut() else {
            match &self.spool {
                Some(spool) => {
                    counters.record_spooled();
                    if let Err(e) = spool.put(line).await {
                        counters.record_error();
                        tracing::error!(
                            route = %self.shared.key,
                            error = %e,
                            "spool put failed, line lost"
                        );
                    }
                }
                None => counters.record_dropped(),
            }
            return;
        };

        counters.record_out();
        if let Err(e) = conn.write(&line).await {
            counters.record_error();
            tracing::warn!(
                route = %self.shared.key,
                error = %e,
                "write failed, closing connection"
            );
            if let Some(conn) = self.conn.take() {
                conn.close().await;
            }
            // Failed and truncated writes both land in the spool so the
            // line survives until the next reconnect.
            if let Some(spool) = &self.spool {
                if let Err(e) = spool.put(line).await {
                    tracing::error!(
                        route = %self.shared.key,
                        error = %e,
                        "spool put failed, line lost"
                    );
                }
            }
        }
    }

    /// Start a background connect attempt
    fn spawn_connect(&self) {
        let shared = Arc::clone(&self.shared);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            if events.send(ConnEvent::AttemptBegan).await.is_err() {
                return;
            }
            let addr = shared.addr();
            tracing::info!(route = %shared.key, addr = %addr, "(re)connecting");
            match Connection::open(&addr).await {
                Ok(conn) => {
                    let _ = events.send(ConnEvent::Connected(Some(conn))).await;
                }
                Err(e) => {
                    tracing::warn!(route = %shared.key, addr = %addr, error = %e, "connect failed");
                    let _ = events.send(ConnEvent::Connected(None)).await;
                }
            }
            let _ = events.send(ConnEvent::AttemptEnded).await;
        });
    }
}

/// Receive from the spool when present; pending forever otherwise
///
/// The select branch using this is additionally guarded, so the pending arm
/// only exists to keep the future well-formed.
async fn spool_recv(spool: &mut Option<Spool>) -> Option<Bytes> {
    match spool {
        Some(spool) => spool.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod relay_test;
