//! HTTP headers handling
//!
//! Header names are case-sensitive keys, unique per message. Inserting a
//! name that is already present replaces its value in place, so the last
//! occurrence wins while the original position is kept for serialization.

use super::{Error, Result, MAX_HEADERS};
use std::fmt;

/// Separator between a header name and its value
pub const HEADER_SEPARATOR: &str = ": ";

/// HTTP headers collection
///
/// Headers are stored in insertion order and support:
/// - Exact (case-sensitive) lookups, plus a case-insensitive escape hatch
/// - Replacement on duplicate names
/// - Iteration in wire order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty headers collection
    pub fn new() -> Self {
        Headers {
            headers: Vec::new(),
        }
    }

    /// Insert a header
    ///
    /// If the name is already present its value is replaced.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        match self.headers.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    /// Get the value for a header
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get the value for a header, ignoring ASCII case in the name
    ///
    /// Used for the framing headers, which peers spell in any case.
    pub fn get_ignore_case(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Check if a header exists
    pub fn contains(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n == name)
    }

    /// Remove a header, returning its value
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let pos = self.headers.iter().position(|(n, _)| n == name)?;
        Some(self.headers.remove(pos).1)
    }

    /// The first header in wire order
    pub fn first(&self) -> Option<(&str, &str)> {
        self.headers.first().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Get the number of headers
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Check if there are no headers
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Iterate over all headers
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parse a header line into name and value
    ///
    /// The line must contain exactly one `": "` separator and a non-empty name.
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        let mut parts = line.split(HEADER_SEPARATOR);
        let (name, value) = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(value), None) => (name, value),
            _ => {
                return Err(Error::MalformedMessage(format!(
                    "header line needs exactly one \": \": {:?}",
                    line
                )))
            }
        };

        if name.is_empty() {
            return Err(Error::MalformedMessage(format!("empty header name: {:?}", line)));
        }

        Ok((name.to_string(), value.to_string()))
    }

    /// Parse the header lines following a start line
    ///
    /// Empty lines are skipped.
    pub fn parse_block<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Headers> {
        let mut headers = Headers::new();

        for line in lines.filter(|l| !l.is_empty()) {
            let (name, value) = Headers::parse_header_line(line)?;
            headers.insert(name, value);
            if headers.len() > MAX_HEADERS {
                return Err(Error::MalformedMessage(format!(
                    "more than {} headers",
                    MAX_HEADERS
                )));
            }
        }

        Ok(headers)
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            writeln!(f, "{}{}{}", name, HEADER_SEPARATOR, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");
        headers.insert("Content-Length", "42");

        assert_eq!(headers.get("Content-Type"), Some("text/html"));
        assert_eq!(headers.get("Content-Length"), Some("42"));
        assert_eq!(headers.get("Missing"), None);
    }

    #[test]
    fn test_case_sensitive_names() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");

        assert_eq!(headers.get("content-type"), None);
        assert_eq!(headers.get_ignore_case("content-type"), Some("text/html"));
        assert_eq!(headers.get_ignore_case("CONTENT-TYPE"), Some("text/html"));
    }

    #[test]
    fn test_last_value_wins_in_first_position() {
        let mut headers = Headers::new();
        headers.insert("X-Custom", "first");
        headers.insert("Host", "localhost");
        headers.insert("X-Custom", "second");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("X-Custom"), Some("second"));
        assert_eq!(headers.first(), Some(("X-Custom", "second")));
    }

    #[test]
    fn test_remove() {
        let mut headers = Headers::new();
        headers.insert("X-Remove", "value1");
        headers.insert("X-Keep", "value2");

        assert_eq!(headers.remove("X-Remove"), Some("value1".to_string()));
        assert_eq!(headers.remove("X-Remove"), None);
        assert_eq!(headers.get("X-Keep"), Some("value2"));
    }

    #[test]
    fn test_iter_preserves_order() {
        let mut headers = Headers::new();
        headers.insert("C", "3");
        headers.insert("A", "1");
        headers.insert("B", "2");

        let collected: Vec<_> = headers.iter().collect();
        assert_eq!(collected, vec![("C", "3"), ("A", "1"), ("B", "2")]);
    }

    #[test]
    fn test_parse_header_line() {
        let (name, value) = Headers::parse_header_line("Content-Type: text/html").unwrap();
        assert_eq!(name, "Content-Type");
        assert_eq!(value, "text/html");

        let (_, value) = Headers::parse_header_line("Date: Tue, 15 Nov 1994 08:12:31 GMT").unwrap();
        assert_eq!(value, "Tue, 15 Nov 1994 08:12:31 GMT");

        assert!(Headers::parse_header_line("Invalid").is_err());
        assert!(Headers::parse_header_line("NoSpace:value").is_err());
        assert!(Headers::parse_header_line(": value").is_err());
        assert!(Headers::parse_header_line("X-Two: a: b").is_err());
    }

    #[test]
    fn test_parse_block() {
        let block = "Host: localhost\r\nAccept: */*\r\nHost: example.com";
        let headers = Headers::parse_block(block.split("\r\n")).unwrap();

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("Host"), Some("example.com"));
    }

    #[test]
    fn test_max_headers() {
        let lines: Vec<String> = (0..MAX_HEADERS + 1)
            .map(|i| format!("Header-{}: value", i))
            .collect();

        let err = Headers::parse_block(lines.iter().map(String::as_str)).unwrap_err();
        assert!(matches!(err, Error::MalformedMessage(_)));
    }
}
