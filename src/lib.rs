//! rawhttp - HTTP/1.1 over raw byte streams
//!
//! This crate provides a minimal HTTP/1.1 client and server that frame
//! requests and responses directly on TCP sockets: start-line and header
//! parsing, `Content-Length` and chunked bodies, keep-alive connection
//! reuse, and a client that downloads the images embedded in HTML pages.

pub mod config;
pub mod http;

pub use config::{ClientConfig, ServerConfig};
