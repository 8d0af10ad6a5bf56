//! Connection façade
//!
//! [`Connection`] drives one session with the terminal through the states
//! `Disconnected → Connecting → Connected → Closed`. `Closed` is terminal;
//! reconnecting means constructing a new connection.
//!
//! Each connected session runs a driver task (see `driver`) that owns the
//! correlation table. The handle talks to it over a command channel, so the
//! only locking here guards the small state enum and is never held across an
//! await.

mod driver;

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use it2_core::{ClientConfig, Endpoint, Handshake};
use it2_protocol::{Envelope, EnvelopeCodec, IdGenerator, InboundPayload, HEADER_SIZE};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::broadcast::{Broadcaster, Subscription};
use crate::error::{CloseReason, ConnectionError, TransportError};
use crate::pending::CorrelationTable;
use crate::transport::{Dialer, Transport, TransportEvent, WebSocketDialer};

use driver::{Command, Driver};

/// Observable state of a [`Connection`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not yet connected, or the last attempt failed
    Disconnected,
    /// A connect attempt is in flight
    Connecting,
    /// Requests may be sent
    Connected,
    /// The session ended; the connection cannot be reused
    Closed(CloseReason),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Closed(reason) => write!(f, "closed ({})", reason),
        }
    }
}

type ConnectAttempt = Shared<BoxFuture<'static, Result<(), ConnectionError>>>;

/// Handles to a live session
struct Link<Resp> {
    transport: Arc<Transport>,
    commands: mpsc::UnboundedSender<Command<Resp>>,
    closed: Arc<OnceLock<CloseReason>>,
}

impl<Resp> Clone for Link<Resp> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            commands: self.commands.clone(),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<Resp> Link<Resp> {
    fn closed_error(&self) -> ConnectionError {
        let reason = self
            .closed
            .get()
            .cloned()
            .unwrap_or(CloseReason::Disconnected);
        ConnectionError::ConnectionClosed(reason)
    }
}

enum State<Resp> {
    Disconnected,
    Connecting(ConnectAttempt),
    Connected(Link<Resp>),
    Closed(CloseReason),
}

struct Inner<Resp: InboundPayload> {
    config: ClientConfig,
    dialer: Arc<dyn Dialer>,
    codec: EnvelopeCodec,
    ids: IdGenerator,
    broadcaster: Arc<Broadcaster<Resp::Notification>>,
    state: Mutex<State<Resp>>,
}

impl<Resp: InboundPayload> Inner<Resp> {
    fn lock_raw(&self) -> MutexGuard<'_, State<Resp>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the state, first folding in a close the driver has recorded
    fn lock_state(&self) -> MutexGuard<'_, State<Resp>> {
        let mut state = self.lock_raw();
        let ended = match &*state {
            State::Connected(link) => link.closed.get().cloned(),
            _ => None,
        };
        if let Some(reason) = ended {
            *state = State::Closed(reason);
        }
        state
    }

    fn live_link(&self) -> Result<Link<Resp>, ConnectionError> {
        match &*self.lock_state() {
            State::Connected(link) => Ok(link.clone()),
            _ => Err(ConnectionError::NotConnected),
        }
    }

    /// Return to `Disconnected` after a failed attempt, unless disconnected meanwhile
    fn abandon_attempt(&self) {
        let mut state = self.lock_raw();
        if matches!(*state, State::Connecting(_)) {
            *state = State::Disconnected;
        }
    }

    /// Start the driver for a freshly opened transport
    fn install(
        &self,
        transport: Arc<Transport>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> Result<(), ConnectionError> {
        let mut state = self.lock_raw();
        if !matches!(*state, State::Connecting(_)) {
            transport.close();
            let reason = match &*state {
                State::Closed(reason) => reason.clone(),
                _ => CloseReason::Disconnected,
            };
            return Err(ConnectionError::ConnectionClosed(reason));
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(OnceLock::new());
        let driver = Driver {
            table: CorrelationTable::new(),
            codec: self.codec,
            broadcaster: Arc::clone(&self.broadcaster),
            commands: commands_rx,
            events,
            transport: Arc::clone(&transport),
            closed: Arc::clone(&closed),
        };
        tokio::spawn(driver.run());

        *state = State::Connected(Link {
            transport,
            commands: commands_tx,
            closed,
        });
        Ok(())
    }
}

/// Client connection to the terminal's scripting API
///
/// `Req` is the outbound payload type and `Resp` the inbound one. Methods
/// take `&self`; share the connection behind an `Arc` to issue requests from
/// several tasks at once.
pub struct Connection<Req, Resp: InboundPayload> {
    inner: Arc<Inner<Resp>>,
    _request: PhantomData<fn(Req)>,
}

impl<Req, Resp> Connection<Req, Resp>
where
    Req: Serialize,
    Resp: InboundPayload,
{
    /// Create a connection that dials with [`WebSocketDialer`]
    pub fn new(config: ClientConfig) -> Self {
        let dialer =
            WebSocketDialer::with_max_message_size(config.max_frame_size.saturating_add(HEADER_SIZE));
        Self::with_dialer(config, Arc::new(dialer))
    }

    /// Create a connection that dials with a custom [`Dialer`]
    pub fn with_dialer(config: ClientConfig, dialer: Arc<dyn Dialer>) -> Self {
        let codec = EnvelopeCodec::with_max_payload(config.max_frame_size);
        Self {
            inner: Arc::new(Inner {
                config,
                dialer,
                codec,
                ids: IdGenerator::new(),
                broadcaster: Arc::new(Broadcaster::new()),
                state: Mutex::new(State::Disconnected),
            }),
            _request: PhantomData,
        }
    }

    /// Connect to the terminal
    ///
    /// Succeeds immediately when already connected. Concurrent callers share
    /// one attempt and all observe its outcome. On failure the connection
    /// returns to `Disconnected` and may be retried.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let attempt = {
            let mut state = self.inner.lock_state();
            match &*state {
                State::Connected(_) => return Ok(()),
                State::Closed(reason) => {
                    return Err(ConnectionError::ConnectionClosed(reason.clone()))
                }
                State::Connecting(attempt) => attempt.clone(),
                State::Disconnected => {
                    let attempt = establish(
                        Arc::downgrade(&self.inner),
                        self.inner.config.clone(),
                        Arc::clone(&self.inner.dialer),
                    )
                    .boxed()
                    .shared();
                    *state = State::Connecting(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await
    }

    /// Send a payload and wait for its response
    pub async fn send(&self, payload: Req) -> Result<Envelope<Resp>, ConnectionError> {
        self.send_envelope(Envelope::new(payload)).await
    }

    /// Send an envelope and wait for its response
    ///
    /// Any id already on the envelope is replaced by a freshly minted one.
    /// Fails with [`ConnectionError::NotConnected`] outside the connected
    /// state. Dropping the returned future abandons the wait, but the
    /// request stays tracked until its response arrives or the connection
    /// closes.
    pub async fn send_envelope(
        &self,
        mut envelope: Envelope<Req>,
    ) -> Result<Envelope<Resp>, ConnectionError> {
        let link = self.inner.live_link()?;

        let id = self.inner.ids.next_id();
        envelope.set_correlation_id(id);
        let frame = self
            .inner
            .codec
            .encode(&envelope)
            .map_err(|e| ConnectionError::Encode(Arc::new(e)))?;

        let (reply, registered) = oneshot::channel();
        link.commands
            .send(Command::Register { id, reply })
            .map_err(|_| link.closed_error())?;
        let handle = registered.await.map_err(|_| link.closed_error())?;

        match link.transport.send(frame).await {
            Ok(()) => {}
            // The transport went down under us; the driver fails the entry
            // with the recorded close reason
            Err(TransportError::NotOpen(_) | TransportError::Closed) => {
                tracing::debug!(%id, "Connection closed before the request was sent");
                return handle.await;
            }
            Err(e) => {
                let _ = link.commands.send(Command::Forget { id });
                tracing::debug!(%id, error = %e, "Request not sent");
                return Err(ConnectionError::SendFailed(Arc::new(e)));
            }
        }
        tracing::trace!(%id, "Request sent");

        handle.await
    }

    /// Close the connection and fail every pending request
    ///
    /// Idempotent and safe before any connect. Returns once all pending
    /// callers have been failed with `ConnectionClosed(Disconnected)`.
    pub async fn disconnect(&self) {
        let link = {
            let mut state = self.inner.lock_raw();
            match std::mem::replace(&mut *state, State::Closed(CloseReason::Disconnected)) {
                State::Connected(link) => {
                    let reason = link.closed.get_or_init(|| CloseReason::Disconnected).clone();
                    *state = State::Closed(reason);
                    Some(link)
                }
                State::Closed(reason) => {
                    *state = State::Closed(reason);
                    None
                }
                State::Disconnected | State::Connecting(_) => None,
            }
        };

        let Some(link) = link else {
            return;
        };
        link.transport.close();

        let (done, finished) = oneshot::channel();
        if link.commands.send(Command::Shutdown { done }).is_ok() {
            // Dropped unacknowledged when the driver was already stopping
            let _ = finished.await;
        }
        tracing::info!("Disconnected");
    }

    /// Whether requests can currently be sent
    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ConnectionState::Connected)
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        match &*self.inner.lock_state() {
            State::Disconnected => ConnectionState::Disconnected,
            State::Connecting(_) => ConnectionState::Connecting,
            State::Connected(_) => ConnectionState::Connected,
            State::Closed(reason) => ConnectionState::Closed(reason.clone()),
        }
    }

    /// Register a handler for notifications
    ///
    /// Handlers run on the connection's driver task, in registration order,
    /// and should return quickly. Registration works in any state.
    pub fn on_notification<F>(&self, handler: F) -> Subscription<Resp::Notification>
    where
        F: Fn(&Resp::Notification) + Send + Sync + 'static,
    {
        self.inner.broadcaster.subscribe(handler)
    }
}

impl<Req, Resp: InboundPayload> fmt::Debug for Connection<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.lock_state() {
            State::Disconnected => "disconnected",
            State::Connecting(_) => "connecting",
            State::Connected(_) => "connected",
            State::Closed(_) => "closed",
        };
        f.debug_struct("Connection")
            .field("state", &state)
            .field("handlers", &self.inner.broadcaster.len())
            .finish()
    }
}

/// One connect attempt, shared by every caller that asked for it
async fn establish<Resp: InboundPayload>(
    inner: Weak<Inner<Resp>>,
    config: ClientConfig,
    dialer: Arc<dyn Dialer>,
) -> Result<(), ConnectionError> {
    let endpoint = Endpoint::discover(&config);
    let handshake = Handshake::from_config(&config);
    let transport = Arc::new(Transport::new(dialer, &config));

    tracing::debug!("Connecting to {}", endpoint);
    let outcome = transport.connect(&endpoint, &handshake).await;

    let Some(inner) = inner.upgrade() else {
        transport.close();
        return Err(ConnectionError::ConnectionClosed(CloseReason::Disconnected));
    };

    match outcome {
        Ok(events) => {
            inner.install(transport, events)?;
            tracing::info!("Connected to {}", endpoint);
            Ok(())
        }
        Err(e) => {
            tracing::warn!(%endpoint, error = %e, "Connect failed");
            inner.abandon_attempt();
            Err(ConnectionError::ConnectFailed(Arc::new(e)))
        }
    }
}
