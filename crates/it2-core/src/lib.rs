//! it2-core: Configuration and connection prerequisites for it2
//!
//! This crate provides the pieces a connection needs before the first byte is
//! written: client configuration, the authentication headers sent with the
//! WebSocket upgrade, discovery of the terminal's endpoint, and the socket
//! alias used when the Unix socket path cannot be dialed directly.

pub mod alias;
pub mod auth;
pub mod config;
pub mod endpoint;
pub mod error;

pub use auth::{Credentials, Handshake};
pub use config::ClientConfig;
pub use endpoint::Endpoint;
pub use error::ConfigError;
