//! Metro routing
//!
//! The delivery core of the relay: an ordered table of routes, each binding
//! a regex pattern to a downstream sink, and a relay task per route that
//! owns the outbound connection and the optional disk spool.
//!
//! # Data flow
//!
//! ```text
//! dispatch(line) ── pattern match ──▶ route input channel ──▶ relay task
//!                                                               │
//!                                             connected ──▶ sink write
//!                                          disconnected ──▶ spool / drop
//! ```
//!
//! The [`RoutingTable`] is the only ownership root: it holds a
//! [`RouteHandle`] per route, and relays hold no back-references. Dispatch
//! and table mutations serialize on one async mutex; everything inside a
//! route is driven by its own task through channels.

mod connection;
mod error;
mod matcher;
mod relay;
mod table;

pub use connection::Connection;
pub use error::{RelayError, TableError};
pub use matcher::Matcher;
pub use relay::{RelayOptions, RouteHandle};
pub use table::{RouteSnapshot, RoutingTable};
