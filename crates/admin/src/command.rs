//! Textual command parsing
//!
//! Commands are whitespace-tokenized lines. The pattern argument is
//! optional in `route add` and `route patt`; omitting it means the empty
//! pattern, which matches every line.

/// A parsed admin command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show the help text
    Help,
    /// Close this admin connection
    Quit,
    /// List all routes
    RouteList,
    /// Add a route
    RouteAdd {
        key: String,
        pattern: String,
        addr: String,
        spool: bool,
    },
    /// Delete a route
    RouteDel { key: String },
    /// Replace a route's pattern
    RoutePatt { key: String, pattern: String },
}

impl Command {
    /// Parse one input line
    ///
    /// Returns a human-readable message for anything malformed; the caller
    /// prints it followed by the help text.
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();

        match tokens.as_slice() {
            [] => Err("empty command".to_string()),
            ["help"] => Ok(Self::Help),
            ["quit"] => Ok(Self::Quit),
            ["route", "list"] => Ok(Self::RouteList),
            ["route", "list", ..] => Err("extraneous arguments".to_string()),
            ["route", "add", key, addr, spool] => Ok(Self::RouteAdd {
                key: key.to_string(),
                pattern: String::new(),
                addr: addr.to_string(),
                spool: parse_spool(spool)?,
            }),
            ["route", "add", key, pattern, addr, spool] => Ok(Self::RouteAdd {
                key: key.to_string(),
                pattern: pattern.to_string(),
                addr: addr.to_string(),
                spool: parse_spool(spool)?,
            }),
            ["route", "add", ..] => Err("bad number of arguments".to_string()),
            ["route", "del", key] => Ok(Self::RouteDel {
                key: key.to_string(),
            }),
            ["route", "del", ..] => Err("bad number of arguments".to_string()),
            ["route", "patt", key] => Ok(Self::RoutePatt {
                key: key.to_string(),
                pattern: String::new(),
            }),
            ["route", "patt", key, pattern] => Ok(Self::RoutePatt {
                key: key.to_string(),
                pattern: pattern.to_string(),
            }),
            ["route", "patt", ..] => Err("bad number of arguments".to_string()),
            _ => Err("unknown command".to_string()),
        }
    }
}

fn parse_spool(token: &str) -> std::result::Result<bool, String> {
    match token {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(format!("spool must be 0 or 1, got '{other}'")),
    }
}

/// Help text shown for `help` and for malformed input
pub(crate) const HELP: &str = "\
commands:
    help                                     show this menu
    route list                               list routes
    route add <key> [pattern] <addr> <spool> add the route. (empty pattern allows all). (spool has to be 1 or 0)
    route del <key>                          delete the matching route
    route patt <key> [pattern]               update pattern for given route key.  (empty pattern allows all)
    quit                                     close this connection

";
