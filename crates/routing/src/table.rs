//! The routing table
//!
//! Owns every route, classifies ingress lines, and serializes mutations.
//! One async mutex guards the key map and the dispatch order; it is held
//! for the whole of `dispatch`, submissions included, so a mutation can
//! never interleave with a single line's routing (and a stalled route
//! backpressures the dispatcher, which is intended).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use metro_spool::Spool;
use metro_telemetry::StatsRegistry;
use tokio::sync::Mutex;

use crate::matcher::Matcher;
use crate::relay::{self, RelayOptions, RouteHandle};
use crate::TableError;

/// A static copy of one route's definition, for admin display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSnapshot {
    /// Route key
    pub key: String,
    /// Pattern string ("" matches everything)
    pub pattern: String,
    /// Sink address
    pub addr: String,
    /// Spooling enabled?
    pub spool: bool,
}

/// Keyed routes plus their dispatch order
#[derive(Debug, Default)]
struct TableInner {
    routes: HashMap<String, RouteHandle>,
    order: Vec<String>,
}

/// Ordered, mutable collection of running routes
#[derive(Debug)]
pub struct RoutingTable {
    inner: Mutex<TableInner>,
    spool_dir: PathBuf,
    options: RelayOptions,
    stats: Arc<StatsRegistry>,
}

impl RoutingTable {
    /// Create an empty table
    ///
    /// `spool_dir` is where newly added spooled routes put their queues.
    pub fn new(
        spool_dir: impl Into<PathBuf>,
        options: RelayOptions,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        Self {
            inner: Mutex::new(TableInner::default()),
            spool_dir: spool_dir.into(),
            options,
            stats,
        }
    }

    /// Add and start a route; it lands at the end of the dispatch order
    ///
    /// # Errors
    ///
    /// `DuplicateKey` if the key is taken, `Pattern` if the pattern does not
    /// compile, `Spool` if the queue directory cannot be opened. Nothing is
    /// mutated on error.
    pub async fn add(
        &self,
        key: &str,
        pattern: &str,
        addr: &str,
        spool: bool,
    ) -> Result<(), TableError> {
        let mut inner = self.inner.lock().await;
        if inner.routes.contains_key(key) {
            return Err(TableError::duplicate_key(key));
        }

        let matcher = Matcher::new(pattern).map_err(TableError::Relay)?;

        let spool_queue = if spool {
            match Spool::open(key, &self.spool_dir, self.options.spool.clone()).await {
                Ok(queue) => Some(queue),
                Err(e) => return Err(TableError::Relay(e.into())),
            }
        } else {
            None
        };

        let counters = self.stats.register_route(key);
        let handle = relay::spawn(key, matcher, addr, spool_queue, counters, &self.options);

        inner.order.push(key.to_string());
        inner.routes.insert(key.to_string(), handle);

        tracing::info!(route = %key, pattern = %pattern, addr = %addr, spool, "route added");
        Ok(())
    }

    /// Remove a route and shut its relay down
    ///
    /// The route leaves the table before the shutdown signal fires, so no
    /// new dispatch can enqueue onto it; lines already in its input channel
    /// are still processed until the relay notices the signal.
    pub async fn remove(&self, key: &str) -> Result<(), TableError> {
        let mut inner = self.inner.lock().await;
        let handle = inner
            .routes
            .remove(key)
            .ok_or_else(|| TableError::unknown_key(key))?;
        inner.order.retain(|k| k != key);
        drop(inner);

        handle.shutdown();
        self.stats.deregister_route(key);
        tokio::spawn(handle.stopped());

        tracing::info!(route = %key, "route removed");
        Ok(())
    }

    /// Update a route's address and/or pattern
    ///
    /// The pattern (when given) is validated before anything changes, so an
    /// invalid pattern fails the whole update. The address is applied first
    /// and forces an inline reconnect whose resolve/dial errors surface to
    /// the caller; the pattern is applied second either way, and a dial
    /// failure leaves both updates in force with the reconnect tick
    /// retrying.
    pub async fn update(
        &self,
        key: &str,
        addr: Option<&str>,
        pattern: Option<&str>,
    ) -> Result<(), TableError> {
        let inner = self.inner.lock().await;
        let handle = inner
            .routes
            .get(key)
            .ok_or_else(|| TableError::unknown_key(key))?;

        if let Some(pattern) = pattern {
            Matcher::new(pattern).map_err(TableError::Relay)?;
        }

        let dial_result = match addr {
            Some(addr) => handle.update_addr(addr).await,
            None => Ok(()),
        };

        if let Some(pattern) = pattern {
            // Compiled fine above; recompile-and-swap through the handle.
            handle.update_pattern(pattern).map_err(TableError::Relay)?;
        }

        dial_result.map_err(TableError::Relay)
    }

    /// Copy of the table in dispatch order
    pub async fn snapshot(&self) -> Vec<RouteSnapshot> {
        let inner = self.inner.lock().await;
        inner
            .order
            .iter()
            .filter_map(|key| inner.routes.get(key))
            .map(|handle| RouteSnapshot {
                key: handle.key().to_string(),
                pattern: handle.pattern(),
                addr: handle.addr(),
                spool: handle.spool(),
            })
            .collect()
    }

    /// Match a line against the table and hand it to the matching routes
    ///
    /// Routes are visited in table order. With `first_only` the line goes to
    /// the first match alone; otherwise it fans out to every match. Returns
    /// whether at least one route accepted the line.
    pub async fn dispatch(&self, line: &Bytes, first_only: bool) -> bool {
        let inner = self.inner.lock().await;
        let mut routed = false;

        for key in &inner.order {
            let Some(handle) = inner.routes.get(key) else {
                continue;
            };
            if !handle.matches(line) {
                continue;
            }
            routed = true;
            if let Err(e) = handle.submit(line.clone()).await {
                tracing::warn!(route = %key, error = %e, "submit failed, line dropped");
            }
            if first_only {
                break;
            }
        }

        routed
    }

    /// Number of routes
    pub async fn len(&self) -> usize {
        self.inner.lock().await.order.len()
    }

    /// Is the table empty?
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.order.is_empty()
    }

    /// Stop every route and wait for the relays to flush and exit
    pub async fn shutdown_all(&self) {
        let mut inner = self.inner.lock().await;
        let keys: Vec<String> = inner.order.drain(..).collect();
        let handles: Vec<RouteHandle> = keys
            .iter()
            .filter_map(|key| inner.routes.remove(key))
            .collect();
        drop(inner);

        for handle in &handles {
            handle.shutdown();
            self.stats.deregister_route(handle.key());
        }
        for handle in handles {
            handle.stopped().await;
        }
    }
}

#[cfg(test)]
#[path = "table_test.rs"]
mod table_test;
