//! Registry of live counter sets
//!
//! The registry is the rendezvous point between the routing table (which
//! registers a counter set per route) and the reporter (which walks the
//! registry on every flush). Routes come and go at runtime, so the map is
//! behind a `parking_lot::RwLock`; the lock is only taken on route mutation
//! and on flush, never on the per-line hot path.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::counters::{IngressCounters, RouteCounters};

/// Process-wide registry of delivery counters
#[derive(Debug, Default)]
pub struct StatsRegistry {
    routes: RwLock<HashMap<String, Arc<RouteCounters>>>,
    ingress: IngressCounters,
}

impl StatsRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route, returning its counter set
    ///
    /// Re-registering an existing key returns the existing counters so a
    /// delete/add cycle under the same key keeps its history.
    pub fn register_route(&self, key: &str) -> Arc<RouteCounters> {
        let mut routes = self.routes.write();
        Arc::clone(
            routes
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(RouteCounters::new())),
        )
    }

    /// Drop a route's counters from the registry
    ///
    /// Relays still holding the `Arc` can keep incrementing; the reporter
    /// simply stops flushing the route.
    pub fn deregister_route(&self, key: &str) {
        self.routes.write().remove(key);
    }

    /// Ingress counters (listener + dispatcher)
    pub fn ingress(&self) -> &IngressCounters {
        &self.ingress
    }

    /// Current route keys and their counter sets
    pub fn routes(&self) -> Vec<(String, Arc<RouteCounters>)> {
        self.routes
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }
}
