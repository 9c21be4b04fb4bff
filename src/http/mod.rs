//! HTTP/1.1 implementation
//!
//! This module provides HTTP/1.1 client and server functionality built
//! directly on byte streams, without an HTTP library underneath.
//!
//! # Architecture
//!
//! The HTTP layer uses a session operations abstraction so the framing code
//! never touches a socket directly:
//!
//! - `SessionOps` trait defines the transport operations (poll, read, write, close)
//! - `HttpSession` adds timeouts and delimiter-aware buffered reads on top
//! - `parser` and `chunked` frame messages out of any `HttpSession`
//! - `client` and `server` drive one exchange at a time over a session
//!
//! # Examples
//!
//! ```no_run
//! use rawhttp::http::{Client, HttpRequest, Method, Outcome};
//! use rawhttp::ClientConfig;
//!
//! let request = HttpRequest::for_uri(Method::Head, "http://localhost:8080/").unwrap();
//! let client = Client::new(ClientConfig::default());
//! if let Outcome::Headers(response) = client.perform(&request).unwrap() {
//!     assert_eq!(response.status().code(), 200);
//! }
//! ```

pub mod chunked;
pub mod client;
pub mod crawl;
pub mod docroot;
pub mod headers;
pub mod message;
pub mod mime;
pub mod parser;
pub mod server;
pub mod session;
pub mod uri;

pub use client::{Client, HttpClient, Outcome};
pub use headers::Headers;
pub use message::{HttpRequest, HttpResponse, Method, Status, Version};
pub use parser::FramingMode;
pub use server::{HttpServer, Server};
pub use session::{HttpSession, SessionOps};
pub use uri::Uri;

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error ({addr}): {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout")]
    Timeout,

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Malformed chunk: {0}")]
    MalformedChunk(String),

    #[error("Truncated body: expected {expected} bytes, received {received}")]
    TruncatedBody { expected: usize, received: usize },

    #[error("Unsupported URI: {0}")]
    UnsupportedUri(String),

    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Incomplete message")]
    Incomplete,

    #[error("HTML error: {0}")]
    Html(String),
}

impl Error {
    /// True for errors that only mean the peer went away or went quiet.
    pub fn is_recoverable_close(&self) -> bool {
        matches!(self, Error::Timeout | Error::ConnectionClosed | Error::Incomplete)
    }
}

/// Maximum number of headers per message
pub const MAX_HEADERS: usize = 100;

/// Maximum size of a start line plus header block
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Block size used for body reads and file streaming
pub const BLOCK_SIZE: usize = 1024;

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// CRLF line ending
pub const CRLF: &str = "\r\n";

/// Blank line terminating the header block
pub const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";
