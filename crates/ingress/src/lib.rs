//! Metro ingress
//!
//! The receiving half of the relay: a TCP listener that frames
//! newline-delimited metric lines, and the dispatcher task that classifies
//! each line against the routing table.
//!
//! Lines are forwarded verbatim, terminator included. The listener applies
//! no parsing beyond framing; anything between newlines is a record.

mod dispatcher;
mod tcp;

pub use dispatcher::Dispatcher;
pub use tcp::{Ingress, IngressConfig};

use thiserror::Error;

/// Result type for ingress operations
pub type Result<T> = std::result::Result<T, IngressError>;

/// Errors from the ingress listener
#[derive(Debug, Error)]
pub enum IngressError {
    /// Failed to bind the listen address
    #[error("failed to bind to {address}: {source}")]
    Bind {
        /// The configured listen address
        address: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The dispatch channel closed underneath the listener
    #[error("dispatch channel closed")]
    ChannelClosed,
}
