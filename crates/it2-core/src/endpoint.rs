//! Endpoint discovery
//!
//! The terminal listens on a private Unix socket and, when the user enables
//! it, on a loopback TCP port. The socket is preferred whenever it exists;
//! the probe runs once per connect attempt.

use std::fmt;
use std::path::PathBuf;

use crate::config::ClientConfig;

/// Address a transport can dial
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket path
    Unix(PathBuf),
    /// `host:port` of a TCP listener
    Tcp(String),
}

impl Endpoint {
    /// Pick the endpoint for a configuration
    pub fn discover(config: &ClientConfig) -> Self {
        match config.socket_path() {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "Using Unix socket endpoint");
                Endpoint::Unix(path)
            }
            probed => {
                tracing::debug!(
                    socket = ?probed,
                    address = %config.tcp_address,
                    "Unix socket not found, falling back to TCP"
                );
                Endpoint::Tcp(config.tcp_address.clone())
            }
        }
    }

    /// URL used in the WebSocket upgrade request
    ///
    /// Over a Unix socket the URL only supplies the `Host` header and path.
    pub fn websocket_url(&self) -> String {
        match self {
            Endpoint::Unix(_) => "ws://localhost/".to_string(),
            Endpoint::Tcp(address) => format!("ws://{}/", address),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(address) => write!(f, "tcp:{}", address),
        }
    }
}
