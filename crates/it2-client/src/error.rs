//! Client error types

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use it2_protocol::ProtocolError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::transport::TransportState;

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The caller disconnected
    Disconnected,
    /// The transport closed underneath the caller
    Remote {
        /// WebSocket close code (1006 when no close frame arrived)
        code: u16,
        /// Close reason text, possibly empty
        reason: String,
    },
}

impl CloseReason {
    /// Close code, if the remote supplied one
    pub fn code(&self) -> Option<u16> {
        match self {
            CloseReason::Disconnected => None,
            CloseReason::Remote { code, .. } => Some(*code),
        }
    }

    /// Whether the connection ended without the caller asking
    pub fn is_remote(&self) -> bool {
        matches!(self, CloseReason::Remote { .. })
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Disconnected => write!(f, "disconnected by client"),
            CloseReason::Remote { code, reason } if reason.is_empty() => {
                write!(f, "closed by remote (code {})", code)
            }
            CloseReason::Remote { code, reason } => {
                write!(f, "closed by remote (code {}: {})", code, reason)
            }
        }
    }
}

/// Errors raised by the byte-level transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// WebSocket handshake or framing failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A handshake header value cannot be sent
    #[error("Invalid handshake header {name}: {message}")]
    InvalidHeader { name: String, message: String },

    /// Dial plus handshake exceeded the configured timeout
    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    /// Operation needs an open transport
    #[error("Transport is not open (state: {0})")]
    NotOpen(TransportState),

    /// `connect` may only be called once per transport
    #[error("Transport already used (state: {0})")]
    AlreadyStarted(TransportState),

    /// The transport was closed while the operation was pending
    #[error("Transport closed")]
    Closed,

    /// Unix domain sockets are unavailable on this platform
    #[error("Unix domain sockets are not supported on this platform")]
    UnsupportedEndpoint,
}

/// Errors surfaced by [`Connection`](crate::Connection)
///
/// Cloneable so that every caller awaiting a shared connect attempt receives
/// the same outcome.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Transport or handshake failure while connecting
    #[error("Failed to connect: {0}")]
    ConnectFailed(#[source] Arc<TransportError>),

    /// A request was issued outside the connected state
    #[error("Not connected")]
    NotConnected,

    /// The transport refused the request bytes
    #[error("Failed to send request: {0}")]
    SendFailed(#[source] Arc<TransportError>),

    /// The connection ended while the request was outstanding
    #[error("Connection closed: {0}")]
    ConnectionClosed(CloseReason),

    /// The request could not be encoded into a frame
    #[error("Failed to encode request: {0}")]
    Encode(#[source] Arc<ProtocolError>),
}

impl ConnectionError {
    /// Close reason, for errors caused by the connection ending
    pub fn close_reason(&self) -> Option<&CloseReason> {
        match self {
            ConnectionError::ConnectionClosed(reason) => Some(reason),
            _ => None,
        }
    }
}
