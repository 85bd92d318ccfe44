//! Pattern matching for route classification
//!
//! A [`Matcher`] keeps the pattern string and its compiled regex together in
//! one immutable value. Pattern updates build a fresh `Matcher` and swap the
//! whole thing, so a reader can never observe a string that disagrees with
//! the compiled form.

use regex::bytes::Regex;

use crate::RelayError;

/// An immutable (pattern, compiled regex) pair
///
/// Matching runs on raw bytes because metric lines are forwarded verbatim
/// and are not required to be valid UTF-8. The empty pattern compiles to a
/// regex that matches every line.
#[derive(Debug, Clone)]
pub struct Matcher {
    pattern: String,
    regex: Regex,
}

impl Matcher {
    /// Compile `pattern` into a matcher
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Pattern`] when the pattern does not compile;
    /// no matcher is produced, so the caller's previous matcher survives.
    pub fn new(pattern: &str) -> Result<Self, RelayError> {
        let regex = Regex::new(pattern).map_err(|e| RelayError::pattern(pattern, e))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// The pattern this matcher was compiled from
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Does the full line (trailing newline included) match?
    #[inline]
    pub fn is_match(&self, line: &[u8]) -> bool {
        self.regex.is_match(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_pattern_matches_everything() {
        let matcher = Matcher::new("").unwrap();
        assert!(matcher.is_match(b"app.prod.count 1 0\n"));
        assert!(matcher.is_match(b"\n"));
        assert!(matcher.is_match(b""));
        assert!(matcher.is_match(&[0xff, 0xfe, b'\n']));
    }

    #[test]
    fn test_substring_pattern() {
        let matcher = Matcher::new(r"\.prod\.").unwrap();
        assert!(matcher.is_match(b"app.prod.count 1 0\n"));
        assert!(!matcher.is_match(b"app.stag.count 1 0\n"));
    }

    #[test]
    fn test_anchored_pattern() {
        let matcher = Matcher::new("^foo").unwrap();
        assert!(matcher.is_match(b"foo.bar 1 0\n"));
        assert!(!matcher.is_match(b"bar.foo 1 0\n"));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = Matcher::new("[").unwrap_err();
        assert!(matches!(err, RelayError::Pattern { ref pattern, .. } if pattern == "["));
    }

    #[test]
    fn test_pattern_accessor_round_trips() {
        let matcher = Matcher::new(r"^servers\.").unwrap();
        assert_eq!(matcher.pattern(), r"^servers\.");
    }
}
