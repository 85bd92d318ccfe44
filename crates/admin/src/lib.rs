//! Metro admin
//!
//! Runtime control over the routing table, exposed two ways:
//!
//! - a textual TCP channel (`route list` / `route add` / `route del` /
//!   `route patt`) meant for humans with a terminal, and
//! - an HTTP API (axum) with JSON bodies for tooling.
//!
//! Both surfaces are thin shells over [`metro_routing::RoutingTable`]; every
//! validation rule lives in the table itself.

mod command;
mod http;
mod server;

pub use command::Command;
pub use http::{serve_http, HttpError};
pub use server::AdminServer;

use thiserror::Error;

/// Result type for the textual admin channel
pub type Result<T> = std::result::Result<T, AdminError>;

/// Errors from the textual admin channel
#[derive(Debug, Error)]
pub enum AdminError {
    /// Failed to bind the admin address
    #[error("failed to bind to {address}: {source}")]
    Bind {
        /// The configured admin address
        address: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
