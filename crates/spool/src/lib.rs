//! Metro spool
//!
//! A durable single-producer/single-consumer FIFO of opaque byte records,
//! backed by a directory of segment files. A spooled route writes lines here
//! while its sink is unreachable and drains them once a connection is back.
//!
//! # Layout
//!
//! Each queue owns one directory, `<spool_dir>/spool_<name>/`:
//!
//! ```text
//! spool_prod/
//!   000000.dat     segment files: [u32 big-endian length][payload]...
//!   000001.dat
//!   meta.json      read/write positions and depth
//! ```
//!
//! Writes roll to a new segment at the configured size limit; fully consumed
//! segments are deleted. Positions are synced to `meta.json` every N records
//! or every sync interval, whichever comes first, so segments survive a
//! restart.
//!
//! # Consumption model
//!
//! All file state is owned by a single IO task. Producers hand records to it
//! over a channel ([`Spool::put`]); the task stages at most one record ahead
//! into a capacity-1 read channel ([`Spool::recv`]). A consumer that stops
//! polling the read channel stops the drain with no records in flight, which
//! is exactly the gating the relay needs while disconnected.
//!
//! # Crash recovery
//!
//! On open the queue trusts the last synced read position and rescans the
//! segment files from there, so a crash replays at most the records consumed
//! since the last sync and loses at most the records whose data never
//! reached the disk. Delivery stays at-most-once per record actually on
//! disk.

mod queue;

pub use queue::{Spool, SpoolConfig};

use std::path::PathBuf;

use thiserror::Error;

/// Result type for spool operations
pub type Result<T> = std::result::Result<T, SpoolError>;

/// Errors from the durable queue
#[derive(Debug, Error)]
pub enum SpoolError {
    /// Failed to create or open the queue directory
    #[error("failed to open spool directory '{path}': {source}")]
    OpenDir {
        /// Directory path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Failed to read or parse the metadata file
    #[error("failed to load spool metadata '{path}': {message}")]
    Meta {
        /// Metadata file path
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// Segment file IO failure
    #[error("spool IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The queue's IO task is gone
    #[error("spool is closed")]
    Closed,
}
