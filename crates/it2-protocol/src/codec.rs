//! Envelope codec
//!
//! Turns an [`Envelope`] into one self-contained binary frame and back. The
//! payload is bincode with fixed-width integers; decoding rejects trailing
//! bytes so that `encode(decode(frame)) == frame` for every frame that
//! decodes.

use bincode::Options;
use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::envelope::Envelope;
use crate::error::ProtocolError;
use crate::frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};

/// Codec for encoding/decoding envelope frames
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeCodec {
    /// Largest payload accepted in either direction
    max_payload: usize,
}

impl EnvelopeCodec {
    /// Create a codec with the default payload limit
    pub fn new() -> Self {
        Self {
            max_payload: MAX_PAYLOAD_SIZE,
        }
    }

    /// Create a codec with a custom payload limit
    ///
    /// The limit is clamped to what the 32-bit length field can express.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.min(u32::MAX as usize),
        }
    }

    /// Largest payload this codec accepts
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Serialize an envelope into a frame
    pub fn encode<P: Serialize>(&self, envelope: &Envelope<P>) -> Result<Bytes, ProtocolError> {
        let payload = bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .serialize(envelope)?;

        if payload.len() > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload,
            });
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        FrameHeader::new(payload.len() as u32).encode(&mut buf);
        buf.extend_from_slice(&payload);

        Ok(buf.freeze())
    }

    /// Parse a frame into an envelope
    ///
    /// The returned envelope owns all of its data; nothing borrows from
    /// `frame` after this returns.
    pub fn decode<P: DeserializeOwned>(&self, frame: &[u8]) -> Result<Envelope<P>, ProtocolError> {
        let header = FrameHeader::decode(frame)?;
        let declared = header.payload_length as usize;

        if declared > self.max_payload {
            return Err(ProtocolError::MalformedFrame(format!(
                "declared payload of {} bytes exceeds maximum of {} bytes",
                declared, self.max_payload
            )));
        }

        let body = &frame[HEADER_SIZE..];
        if body.len() != declared {
            return Err(ProtocolError::MalformedFrame(format!(
                "header declares {} payload bytes, frame carries {}",
                declared,
                body.len()
            )));
        }

        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .with_limit(declared as u64)
            .reject_trailing_bytes()
            .deserialize(body)
            .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationId;
    use crate::frame::FRAME_VERSION;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Payload {
        ListSessions,
        SendText { session: String, text: String },
        Buffer(Vec<u8>),
    }

    #[test]
    fn test_codec_roundtrip() {
        let codec = EnvelopeCodec::new();
        let envelope = Envelope::with_id(
            CorrelationId::new(3).unwrap(),
            Payload::SendText {
                session: "w0t0p0".to_string(),
                text: "ls -la\n".to_string(),
            },
        );

        let frame = codec.encode(&envelope).unwrap();
        assert_eq!(frame[0], FRAME_VERSION);

        let decoded: Envelope<Payload> = codec.decode(&frame).unwrap();
        assert_eq!(decoded, envelope);

        // Re-encoding a decoded frame reproduces it byte for byte
        assert_eq!(codec.encode(&decoded).unwrap(), frame);
    }

    #[test]
    fn test_codec_untracked_envelope() {
        let codec = EnvelopeCodec::new();
        let envelope = Envelope::new(Payload::ListSessions);

        let frame = codec.encode(&envelope).unwrap();
        let decoded: Envelope<Payload> = codec.decode(&frame).unwrap();

        assert!(decoded.id.is_none());
        assert_eq!(decoded.payload, Payload::ListSessions);
    }

    #[test]
    fn test_truncated_frame_is_malformed() {
        let codec = EnvelopeCodec::new();
        let frame = codec
            .encode(&Envelope::new(Payload::Buffer(vec![1, 2, 3, 4])))
            .unwrap();

        let result = codec.decode::<Payload>(&frame[..frame.len() - 1]);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_trailing_bytes_are_malformed() {
        let codec = EnvelopeCodec::new();
        let frame = codec.encode(&Envelope::new(Payload::ListSessions)).unwrap();

        let mut padded = frame.to_vec();
        padded.push(0);
        let result = codec.decode::<Payload>(&padded);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_trailing_byte_inside_declared_length_is_malformed() {
        let codec = EnvelopeCodec::new();
        let frame = codec.encode(&Envelope::new(Payload::ListSessions)).unwrap();

        // Header agrees with the padded body, so only the payload parse can object
        let mut body = frame[HEADER_SIZE..].to_vec();
        body.push(0);
        let mut padded = BytesMut::new();
        FrameHeader::new(body.len() as u32).encode(&mut padded);
        padded.extend_from_slice(&body);

        let result = codec.decode::<Payload>(&padded);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_garbage_payload_is_malformed() {
        let codec = EnvelopeCodec::new();
        let frame = [FRAME_VERSION, 0, 0, 0, 3, 0xFF, 0xFF, 0xFF];
        let result = codec.decode::<Payload>(&frame);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_oversized_payload_rejected_on_encode() {
        let codec = EnvelopeCodec::with_max_payload(16);
        let envelope = Envelope::new(Payload::Buffer(vec![0u8; 64]));
        let result = codec.encode(&envelope);
        assert!(matches!(
            result,
            Err(ProtocolError::PayloadTooLarge { max: 16, .. })
        ));
    }

    #[test]
    fn test_oversized_declaration_rejected_on_decode() {
        let codec = EnvelopeCodec::with_max_payload(16);
        let frame = [FRAME_VERSION, 0, 0, 1, 0];
        let result = codec.decode::<Payload>(&frame);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }
}
