//! Client and server configuration

use std::path::PathBuf;
use std::time::Duration;

/// Server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host; requests must carry it in their `Host` header
    pub address: String,
    pub port: u16,
    /// Document root
    pub root: PathBuf,
    /// Per-read/write timeout on accepted connections
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            address: "localhost".to_string(),
            port: 8080,
            root: PathBuf::from("www"),
            timeout: Duration::from_secs(2),
        }
    }
}

impl ServerConfig {
    /// Whether a `Host` header value names this server
    ///
    /// Both the bare address and `address:port` are accepted.
    pub fn accepts_host(&self, value: &str) -> bool {
        value == self.address || value == format!("{}:{}", self.address, self.port)
    }
}

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Directory downloads are written to
    pub output_dir: PathBuf,
    /// File name for the main download, relative to `output_dir`
    pub target: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            output_dir: PathBuf::from("."),
            target: None,
            timeout: Duration::from_secs(5),
        }
    }
}
