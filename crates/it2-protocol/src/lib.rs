//! it2-protocol: Wire envelope for the iTerm2 scripting API
//!
//! This crate defines how request, response and notification messages are
//! framed on the WebSocket between a client and the terminal. The concrete
//! payload schema is supplied by the caller; this crate only knows that every
//! message is an [`Envelope`] carrying an optional correlation id.

pub mod codec;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod frame;

pub use codec::EnvelopeCodec;
pub use correlation::{CorrelationId, IdGenerator};
pub use envelope::{Envelope, InboundPayload};
pub use error::ProtocolError;
pub use frame::{FrameHeader, FRAME_VERSION, HEADER_SIZE, MAX_PAYLOAD_SIZE};
