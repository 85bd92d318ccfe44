//! Atomic delivery counters
//!
//! Counters are incremented from the relay and ingress hot paths, so they are
//! plain relaxed atomics behind `Arc`. Snapshots are taken by the admin
//! surface and the statsd reporter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Delivery counters for a single route
#[derive(Debug, Default)]
pub struct RouteCounters {
    /// Lines written to the sink
    pub out: AtomicU64,

    /// Lines enqueued to the disk spool while disconnected
    pub spooled: AtomicU64,

    /// Lines discarded while disconnected (spooling disabled)
    pub dropped: AtomicU64,

    /// Write failures and truncated writes
    pub errors: AtomicU64,
}

impl RouteCounters {
    /// Create a zeroed counter set
    pub const fn new() -> Self {
        Self {
            out: AtomicU64::new(0),
            spooled: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Record a successful sink write
    #[inline]
    pub fn record_out(&self) {
        self.out.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a line handed to the spool
    #[inline]
    pub fn record_spooled(&self) {
        self.spooled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dropped line
    #[inline]
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a write failure or truncation
    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time snapshot
    pub fn snapshot(&self) -> RouteCounterSnapshot {
        RouteCounterSnapshot {
            out: self.out.load(Ordering::Relaxed),
            spooled: self.spooled.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of one route's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteCounterSnapshot {
    pub out: u64,
    pub spooled: u64,
    pub dropped: u64,
    pub errors: u64,
}

/// Process-wide ingress counters
#[derive(Debug, Default)]
pub struct IngressCounters {
    /// Lines accepted by the listener
    pub lines_in: AtomicU64,

    /// Lines that matched no route
    pub unroutable: AtomicU64,

    /// Lines discarded for exceeding the framing buffer
    pub framing_errors: AtomicU64,
}

impl IngressCounters {
    /// Create a zeroed counter set
    pub const fn new() -> Self {
        Self {
            lines_in: AtomicU64::new(0),
            unroutable: AtomicU64::new(0),
            framing_errors: AtomicU64::new(0),
        }
    }

    /// Record an accepted line
    #[inline]
    pub fn record_in(&self) {
        self.lines_in.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a line that matched no route
    #[inline]
    pub fn record_unroutable(&self) {
        self.unroutable.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an oversized line dropped by the framer
    #[inline]
    pub fn record_framing_error(&self) {
        self.framing_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time snapshot
    pub fn snapshot(&self) -> IngressSnapshot {
        IngressSnapshot {
            lines_in: self.lines_in.load(Ordering::Relaxed),
            unroutable: self.unroutable.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of the ingress counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngressSnapshot {
    pub lines_in: u64,
    pub unroutable: u64,
    pub framing_errors: u64,
}
