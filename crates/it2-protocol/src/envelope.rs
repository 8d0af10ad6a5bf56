//! The unit of wire exchange
//!
//! Every message on the socket is an [`Envelope`]: an optional correlation id
//! plus a payload whose shape belongs to the API schema. Outbound envelopes
//! get their id from the connection just before they are sent; inbound
//! envelopes carry whatever id the terminal echoed back, or none for a
//! notification.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::correlation::CorrelationId;

/// A message with an optional correlation id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<P> {
    /// Correlation id as it appears on the wire
    pub id: Option<String>,
    /// Schema-defined payload
    pub payload: P,
}

impl<P> Envelope<P> {
    /// Create an envelope with no correlation id
    pub fn new(payload: P) -> Self {
        Self { id: None, payload }
    }

    /// Create an envelope tagged with a correlation id
    pub fn with_id(id: CorrelationId, payload: P) -> Self {
        Self {
            id: Some(id.to_string()),
            payload,
        }
    }

    /// The tracked correlation id, if this envelope carries one
    ///
    /// An absent, empty or zero id means the envelope is not a response to a
    /// tracked request.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.id.as_deref().and_then(CorrelationId::from_wire)
    }

    /// Attach a correlation id, replacing any previous one
    pub fn set_correlation_id(&mut self, id: CorrelationId) {
        self.id = Some(id.to_string());
    }

    /// Consume the envelope and return its payload
    pub fn into_payload(self) -> P {
        self.payload
    }
}

/// Contract for payloads received from the terminal
///
/// The connection needs exactly one fact about an inbound payload: whether it
/// is a notification. Schemas answer by converting the payload into their
/// notification type, or handing it back unchanged when it is something else
/// (a response, an error report).
pub trait InboundPayload: DeserializeOwned + Send + 'static {
    /// Type delivered to notification handlers
    type Notification: Send + Sync + 'static;

    /// Convert into a notification, or return `self` if this payload is not one
    fn into_notification(self) -> Result<Self::Notification, Self>;
}
