//! Configuration error types

use std::io;
use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("failed to read config file '{path}': {source}")]
    Io {
        /// Path to the file
        path: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A route was declared with an empty key
    #[error("route key must not be empty")]
    EmptyRouteKey,

    /// The same route key appears more than once
    #[error("duplicate route key '{key}'")]
    DuplicateRouteKey {
        /// The repeated key
        key: String,
    },

    /// A route pattern failed to compile
    #[error("route '{key}' has an invalid pattern: {source}")]
    InvalidPattern {
        /// Route the pattern belongs to
        key: String,
        /// Compile error from the regex engine
        #[source]
        source: regex::Error,
    },

    /// An address field is not host:port
    #[error("{field} '{value}' is not a host:port address")]
    InvalidAddr {
        /// Config field name
        field: &'static str,
        /// Offending value
        value: String,
    },
}

impl ConfigError {
    /// Create a DuplicateRouteKey error
    pub fn duplicate_route_key(key: impl Into<String>) -> Self {
        Self::DuplicateRouteKey { key: key.into() }
    }
}
