//! Routing error types

use thiserror::Error;

/// Errors from a single route's relay and connection machinery
#[derive(Debug, Error)]
pub enum RelayError {
    /// A pattern failed to compile
    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        /// The offending pattern
        pattern: String,
        /// Compile error from the regex engine
        #[source]
        source: regex::Error,
    },

    /// Sink address did not resolve
    #[error("failed to resolve '{addr}': {message}")]
    Resolve {
        /// The configured address
        addr: String,
        /// Resolver failure detail
        message: String,
    },

    /// Dial to the sink failed
    #[error("failed to connect to '{addr}': {source}")]
    Dial {
        /// The configured address
        addr: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Write to the sink failed
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    /// The sink accepted fewer bytes than the line holds
    ///
    /// Treated exactly like a write error: the connection is poisoned.
    #[error("truncated write: {wrote} of {expected} bytes")]
    TruncatedWrite {
        /// Bytes the sink accepted
        wrote: usize,
        /// Bytes in the line
        expected: usize,
    },

    /// The route's relay task is no longer running
    #[error("route is not running")]
    NotRunning,

    /// Durable queue failure
    #[error(transparent)]
    Spool(#[from] metro_spool::SpoolError),
}

impl RelayError {
    /// Create a Pattern error
    pub fn pattern(pattern: impl Into<String>, source: regex::Error) -> Self {
        Self::Pattern {
            pattern: pattern.into(),
            source,
        }
    }
}

/// Errors from routing table operations
#[derive(Debug, Error)]
pub enum TableError {
    /// A route with this key already exists
    #[error("route '{key}' already exists")]
    DuplicateKey {
        /// The requested key
        key: String,
    },

    /// No route with this key exists
    #[error("unknown route '{key}'")]
    UnknownKey {
        /// The requested key
        key: String,
    },

    /// The underlying route operation failed
    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl TableError {
    /// Create a DuplicateKey error
    pub fn duplicate_key(key: impl Into<String>) -> Self {
        Self::DuplicateKey { key: key.into() }
    }

    /// Create an UnknownKey error
    pub fn unknown_key(key: impl Into<String>) -> Self {
        Self::UnknownKey { key: key.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_key_display() {
        let err = TableError::duplicate_key("prod");
        assert!(err.to_string().contains("prod"));
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_unknown_key_display() {
        let err = TableError::unknown_key("stag");
        assert!(err.to_string().contains("stag"));
        assert!(err.to_string().contains("unknown"));
    }

    #[test]
    fn test_pattern_error_display() {
        let source = regex::bytes::Regex::new("[").unwrap_err();
        let err = RelayError::pattern("[", source);
        assert!(err.to_string().contains("invalid pattern"));
    }

    #[test]
    fn test_truncated_write_display() {
        let err = RelayError::TruncatedWrite {
            wrote: 3,
            expected: 10,
        };
        assert!(err.to_string().contains("3 of 10"));
    }
}
