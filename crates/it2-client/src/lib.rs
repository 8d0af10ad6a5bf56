//! it2-client: Connection and correlation layer for the iTerm2 scripting API
//!
//! A [`Connection`] turns the terminal's WebSocket into request/response
//! calls. Each request gets a fresh correlation id; the matching response
//! completes that call no matter how many other calls are in flight or in
//! which order responses arrive. Messages the terminal sends on its own
//! (notifications) go to handlers registered with
//! [`Connection::on_notification`].
//!
//! The message schema is supplied by the caller: outbound payloads only need
//! to be serializable, inbound payloads implement
//! [`InboundPayload`](it2_protocol::InboundPayload).
//!
//! ```ignore
//! let conn: Connection<Request, ServerMessage> = Connection::new(ClientConfig::load_or_default()?);
//! conn.connect().await?;
//! let sub = conn.on_notification(|n| tracing::info!(?n, "notification"));
//! let response = conn.send(Request::ListSessions).await?;
//! conn.disconnect().await;
//! ```

pub mod broadcast;
pub mod connection;
pub mod error;
pub mod pending;
pub mod transport;

pub use broadcast::{Broadcaster, Subscription};
pub use connection::{Connection, ConnectionState};
pub use error::{CloseReason, ConnectionError, TransportError};
pub use pending::{CorrelationTable, ResponseHandle};
pub use transport::{Dialer, Duplex, Transport, TransportEvent, TransportState, WebSocketDialer};

pub use it2_core::ClientConfig;
pub use it2_protocol::{CorrelationId, Envelope, InboundPayload};
