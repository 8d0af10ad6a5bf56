//! Frame header encoding/decoding
//!
//! Each WebSocket binary message holds exactly one frame. The frame starts
//! with a 5-byte header:
//! - version: 1 byte (u8)
//! - payload_length: 4 bytes (u32, big-endian)
//!
//! The payload follows immediately and must be exactly `payload_length`
//! bytes long.

use bytes::{BufMut, BytesMut};

use crate::error::ProtocolError;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 5;

/// Current frame format version
pub const FRAME_VERSION: u8 = 1;

/// Default maximum payload size (16MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Frame header containing version and length information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Format version of this frame
    pub version: u8,
    /// Length of the payload in bytes
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a header for the current frame version
    pub fn new(payload_length: u32) -> Self {
        Self {
            version: FRAME_VERSION,
            payload_length,
        }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u8(self.version);
        dst.put_u32(self.payload_length);
    }

    /// Decode a header from the start of a frame
    ///
    /// Returns `MalformedFrame` if the frame is shorter than a header or
    /// carries an unknown version.
    pub fn decode(src: &[u8]) -> Result<Self, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Err(ProtocolError::MalformedFrame(format!(
                "frame of {} bytes is shorter than the {}-byte header",
                src.len(),
                HEADER_SIZE
            )));
        }

        let version = src[0];
        if version != FRAME_VERSION {
            return Err(ProtocolError::MalformedFrame(format!(
                "unsupported frame version {}",
                version
            )));
        }

        let payload_length = u32::from_be_bytes([src[1], src[2], src[3], src[4]]);

        Ok(Self {
            version,
            payload_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FrameHeader::new(12345);

        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        header.encode(&mut buf);

        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[..], &[FRAME_VERSION, 0, 0, 0x30, 0x39]);

        let decoded = FrameHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_insufficient_bytes() {
        let result = FrameHeader::decode(&[FRAME_VERSION, 0, 0]);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_unknown_version() {
        let result = FrameHeader::decode(&[0xFE, 0, 0, 0, 10]);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(msg)) if msg.contains("254")));
    }
}
