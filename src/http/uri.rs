//! Absolute `http://` URIs and reference resolution

use super::{Error, Result, DEFAULT_HTTP_PORT};
use std::fmt;

const HTTP_PREFIX: &str = "http://";

/// An absolute plain-HTTP URI: `http://host[:port][/path]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    host: String,
    port: u16,
    path: String,
}

impl Uri {
    /// Parse an absolute URI
    ///
    /// Only the `http` scheme is accepted; `https` and anything without the
    /// `http://` prefix fail with `UnsupportedUri`.
    pub fn parse(s: &str) -> Result<Uri> {
        let rest = match strip_prefix_ignore_case(s, HTTP_PREFIX) {
            Some(rest) => rest,
            None => {
                let reason = match scheme_of(s) {
                    Some(scheme) => format!("scheme {:?} not supported: {}", scheme, s),
                    None => format!("missing http:// prefix: {}", s),
                };
                return Err(Error::UnsupportedUri(reason));
            }
        };

        let (authority, path) = match rest.find(['/', '?']) {
            Some(i) if rest[i..].starts_with('/') => (&rest[..i], rest[i..].to_string()),
            Some(i) => (&rest[..i], format!("/{}", &rest[i..])),
            None => (rest, "/".to_string()),
        };

        let (host, port) = split_authority(authority)
            .ok_or_else(|| Error::UnsupportedUri(format!("invalid authority: {}", s)))?;

        Ok(Uri {
            host,
            port,
            path: remove_dot_segments(&path),
        })
    }

    /// Build a URI from parts
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Uri {
        Uri {
            host: host.into(),
            port,
            path: path.into(),
        }
    }

    /// Get the host name
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the path, including any query string
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Same URI with a different port
    pub fn with_port(mut self, port: u16) -> Uri {
        self.port = port;
        self
    }

    /// Value for the `Host` header: the port is omitted when it is 80
    pub fn host_header(&self) -> String {
        if self.port == DEFAULT_HTTP_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Whether `other` lives on the same host and port
    pub fn same_origin(&self, other: &Uri) -> bool {
        self.host.eq_ignore_ascii_case(&other.host) && self.port == other.port
    }

    /// Resolve a scheme-less reference against this URI's path
    ///
    /// Relative references are joined onto the directory of the current
    /// path. `.` and `..` segments are then removed, never climbing above
    /// the root.
    pub fn join(&self, reference: &str) -> Uri {
        let path = if reference.starts_with('/') {
            reference.to_string()
        } else {
            let dir = match self.path.rfind('/') {
                Some(i) => &self.path[..=i],
                None => "/",
            };
            format!("{}{}", dir, reference)
        };

        Uri {
            host: self.host.clone(),
            port: self.port,
            path: remove_dot_segments(&path),
        }
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", HTTP_PREFIX, self.host_header(), self.path)
    }
}

/// Split `host[:port]`, defaulting the port to 80
pub fn split_authority(authority: &str) -> Option<(String, u16)> {
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().ok()?),
        None => (authority, DEFAULT_HTTP_PORT),
    };

    if host.is_empty() {
        return None;
    }

    Some((host.to_string(), port))
}

/// The scheme of a URI reference, if it has one
///
/// A scheme is a letter followed by letters, digits, `+`, `-` or `.`, ended
/// by `:`. Protocol-relative references (`//host/path`) report `"http"`.
pub fn scheme_of(reference: &str) -> Option<&str> {
    if reference.starts_with("//") {
        return Some("http");
    }

    let colon = reference.find(':')?;
    let scheme = &reference[..colon];
    let mut chars = scheme.chars();
    let first = chars.next()?;

    if first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        Some(scheme)
    } else {
        None
    }
}

/// Collapse `.` and `..` segments of an absolute path
///
/// The query string and fragment are left alone. A trailing `.` or `..`
/// leaves the path ending in `/`.
pub fn remove_dot_segments(path: &str) -> String {
    let (path, rest) = match path.find(['?', '#']) {
        Some(i) => path.split_at(i),
        None => (path, ""),
    };

    let mut segments: Vec<&str> = Vec::new();
    let mut parts = path.split('/').skip(1).peekable();
    while let Some(segment) = parts.next() {
        let last = parts.peek().is_none();
        match segment {
            "." => {}
            ".." => {
                segments.pop();
            }
            other => {
                segments.push(other);
                continue;
            }
        }
        if last {
            segments.push("");
        }
    }

    format!("/{}{}", segments.join("/"), rest)
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}
