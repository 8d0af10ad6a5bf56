//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding envelopes
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Inbound bytes do not parse as an envelope frame
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Outbound payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Outbound serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}
