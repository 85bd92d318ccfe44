//! Route table configuration

use serde::Deserialize;

/// One route in the initial table
///
/// # Example
///
/// ```toml
/// [[routes]]
/// key = "prod"
/// pattern = "\\.prod\\."
/// addr = "10.0.0.1:2003"
/// spool = true
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RouteConfig {
    /// Unique route identifier (shows up in stats and logs)
    pub key: String,

    /// Regular expression matched against each line; empty matches all
    #[serde(default)]
    pub pattern: String,

    /// Downstream sink address (host:port)
    pub addr: String,

    /// Spool lines to disk while the sink is unreachable
    #[serde(default)]
    pub spool: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_route() {
        let route: RouteConfig = toml::from_str(
            r#"
key = "catchall"
addr = "10.0.0.2:2003"
"#,
        )
        .unwrap();
        assert_eq!(route.key, "catchall");
        assert_eq!(route.pattern, "");
        assert!(!route.spool);
    }

    #[test]
    fn test_full_route() {
        let route: RouteConfig = toml::from_str(
            r#"
key = "prod"
pattern = "\\.prod\\."
addr = "10.0.0.1:2003"
spool = true
"#,
        )
        .unwrap();
        assert_eq!(route.pattern, "\\.prod\\.");
        assert!(route.spool);
    }
}
