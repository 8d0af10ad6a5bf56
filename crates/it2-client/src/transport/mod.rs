//! Byte-level transport
//!
//! A [`Transport`] owns at most one physical connection. It dials through a
//! [`Dialer`], then runs one writer task and one reader task over the
//! resulting [`Duplex`]. Inbound traffic and lifecycle changes are reported
//! as [`TransportEvent`]s on a channel handed out once by
//! [`Transport::connect`].

mod websocket;

pub use websocket::{build_request, WebSocketDialer};

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use it2_core::alias::{needs_alias, SocketAlias};
use it2_core::{ClientConfig, Endpoint, Handshake};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Close code for a normal shutdown
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when a close frame carried no status
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Close code reported when the connection dropped without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Channel capacity for events from the reader and writer tasks
///
/// Bounded so a stalled consumer applies backpressure to the socket instead
/// of buffering without limit.
const TRANSPORT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long the writer waits to deliver a close frame on shutdown
const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Message exchanged with a [`Duplex`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Opaque binary payload
    Binary(Bytes),
    /// Close frame
    Close { code: u16, reason: String },
}

/// Outbound half of a dialed connection
pub type FrameSink = Pin<Box<dyn Sink<WireMessage, Error = TransportError> + Send>>;

/// Inbound half of a dialed connection
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<WireMessage, TransportError>> + Send>>;

/// Both halves of an established connection
pub struct Duplex {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Establishes physical connections
///
/// Implementations perform the dial and the upgrade handshake, returning a
/// connection ready to carry binary messages.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to `endpoint` and complete the handshake
    async fn dial(&self, endpoint: &Endpoint, handshake: &Handshake)
        -> Result<Duplex, TransportError>;
}

/// Lifecycle of a [`Transport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::Idle => "idle",
            TransportState::Connecting => "connecting",
            TransportState::Open => "open",
            TransportState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Event reported by the reader or writer task
#[derive(Debug)]
pub enum TransportEvent {
    /// A binary message arrived
    Message(Bytes),
    /// The connection ended; always the last event
    Closed { code: u16, reason: String },
    /// The connection failed; followed by `Closed`
    Error(TransportError),
}

struct Outgoing {
    frame: Bytes,
    ack: oneshot::Sender<Result<(), TransportError>>,
}

struct Shared {
    state: TransportState,
    writer: Option<mpsc::UnboundedSender<Outgoing>>,
    alias: Option<SocketAlias>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One physical connection and its reader and writer tasks
pub struct Transport {
    dialer: Arc<dyn Dialer>,
    connect_timeout: Duration,
    alias_dir: PathBuf,
    shared: Arc<Mutex<Shared>>,
    cancel: CancellationToken,
}

impl Transport {
    /// Create an idle transport
    pub fn new(dialer: Arc<dyn Dialer>, config: &ClientConfig) -> Self {
        Self {
            dialer,
            connect_timeout: config.connect_timeout,
            alias_dir: config.alias_dir(),
            shared: Arc::new(Mutex::new(Shared {
                state: TransportState::Idle,
                writer: None,
                alias: None,
            })),
            cancel: CancellationToken::new(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> TransportState {
        lock(&self.shared).state
    }

    /// Socket alias in use, if the endpoint needed one
    pub fn alias_path(&self) -> Option<PathBuf> {
        lock(&self.shared)
            .alias
            .as_ref()
            .map(|alias| alias.path().to_path_buf())
    }

    /// Dial `endpoint` and start the reader and writer tasks
    ///
    /// Returns the event channel for this connection. A transport connects at
    /// most once; create a new one to reconnect.
    pub async fn connect(
        &self,
        endpoint: &Endpoint,
        handshake: &Handshake,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        {
            let mut shared = lock(&self.shared);
            if shared.state != TransportState::Idle {
                return Err(TransportError::AlreadyStarted(shared.state));
            }
            shared.state = TransportState::Connecting;
        }

        match self.open(endpoint, handshake).await {
            Ok(events) => Ok(events),
            Err(e) => {
                let alias = {
                    let mut shared = lock(&self.shared);
                    shared.state = TransportState::Closed;
                    shared.alias.take()
                };
                drop(alias);
                tracing::debug!(%endpoint, error = %e, "Transport connect failed");
                Err(e)
            }
        }
    }

    async fn open(
        &self,
        endpoint: &Endpoint,
        handshake: &Handshake,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let alias = match endpoint {
            Endpoint::Unix(path) if needs_alias(path) => {
                Some(SocketAlias::create(path, &self.alias_dir)?)
            }
            _ => None,
        };
        let target = match &alias {
            Some(alias) => Endpoint::Unix(alias.path().to_path_buf()),
            None => endpoint.clone(),
        };

        tracing::debug!(endpoint = %target, "Dialing");
        let dial = tokio::time::timeout(self.connect_timeout, self.dialer.dial(&target, handshake));
        let duplex = tokio::select! {
            _ = self.cancel.cancelled() => return Err(TransportError::Closed),
            outcome = dial => match outcome {
                Ok(result) => result?,
                Err(_) => return Err(TransportError::Timeout(self.connect_timeout)),
            },
        };

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(TRANSPORT_EVENT_CHANNEL_CAPACITY);
        {
            let mut shared = lock(&self.shared);
            if shared.state != TransportState::Connecting {
                // close() won the race; the alias guard drops with us
                return Err(TransportError::Closed);
            }
            shared.state = TransportState::Open;
            shared.writer = Some(writer_tx);
            shared.alias = alias;
        }

        let Duplex { sink, stream } = duplex;
        tokio::spawn(write_loop(
            sink,
            writer_rx,
            event_tx.clone(),
            Arc::clone(&self.shared),
            self.cancel.clone(),
        ));
        tokio::spawn(read_loop(
            stream,
            event_tx,
            Arc::clone(&self.shared),
            self.cancel.clone(),
        ));

        tracing::debug!(%endpoint, "Transport open");
        Ok(event_rx)
    }

    /// Send one binary message
    ///
    /// Completes once the writer task has handed the bytes to the socket.
    pub async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        let writer = {
            let shared = lock(&self.shared);
            match (&shared.writer, shared.state) {
                (Some(writer), TransportState::Open) => writer.clone(),
                (_, state) => return Err(TransportError::NotOpen(state)),
            }
        };

        let (ack, done) = oneshot::channel();
        writer
            .send(Outgoing { frame, ack })
            .map_err(|_| TransportError::Closed)?;
        done.await.unwrap_or(Err(TransportError::Closed))
    }

    /// Close the connection
    ///
    /// Idempotent and safe on a transport that never connected. The writer
    /// task sends a close frame on its way out.
    pub fn close(&self) {
        let was_open = mark_closed(&self.shared);
        self.cancel.cancel();

        if was_open {
            tracing::debug!("Transport closed");
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Mark the transport closed and release its alias
///
/// Returns true only for the call that moved it out of `Open`; that caller
/// owns reporting the close.
fn mark_closed(shared: &Mutex<Shared>) -> bool {
    let (previous, alias) = {
        let mut shared = lock(shared);
        let previous = shared.state;
        shared.state = TransportState::Closed;
        shared.writer = None;
        (previous, shared.alias.take())
    };
    drop(alias);
    previous == TransportState::Open
}

async fn write_loop(
    mut sink: FrameSink,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::Sender<TransportEvent>,
    shared: Arc<Mutex<Shared>>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = outgoing.recv() => next,
        };
        let Some(Outgoing { frame, ack }) = next else { break };

        // Dropping `ack` unanswered tells the sender the transport closed
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = sink.send(WireMessage::Binary(frame)) => result,
        };

        let Err(e) = result else {
            let _ = ack.send(Ok(()));
            continue;
        };
        let reason = e.to_string();
        tracing::warn!(error = %reason, "Transport write failed");
        let _ = ack.send(Err(e));

        if mark_closed(&shared) {
            cancel.cancel();
            let failure = io::Error::new(io::ErrorKind::Other, reason.clone());
            let _ = events.send(TransportEvent::Error(failure.into())).await;
            let _ = events
                .send(TransportEvent::Closed {
                    code: ABNORMAL_CLOSURE,
                    reason,
                })
                .await;
        }
        break;
    }
    drop(events);

    let goodbye = async {
        sink.send(WireMessage::Close {
            code: NORMAL_CLOSURE,
            reason: String::new(),
        })
        .await?;
        sink.close().await
    };
    match tokio::time::timeout(CLOSE_GRACE_PERIOD, goodbye).await {
        Ok(Ok(())) => tracing::trace!("Close frame sent"),
        Ok(Err(e)) => tracing::debug!(error = %e, "Could not send close frame"),
        Err(_) => tracing::debug!("Timed out sending close frame"),
    }
}

async fn read_loop(
    mut stream: FrameStream,
    events: mpsc::Sender<TransportEvent>,
    shared: Arc<Mutex<Shared>>,
    cancel: CancellationToken,
) {
    let (failure, code, reason) = loop {
        let next = tokio::select! {
            biased;
            // Closed elsewhere: whoever closed it reports
            _ = cancel.cancelled() => return,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(WireMessage::Binary(bytes))) => {
                if events.send(TransportEvent::Message(bytes)).await.is_err() {
                    tracing::debug!("Event receiver dropped, stopping reader");
                    break (None, NORMAL_CLOSURE, String::new());
                }
            }
            Some(Ok(WireMessage::Close { code, reason })) => {
                tracing::debug!(code, %reason, "Close frame received");
                break (None, code, reason);
            }
            Some(Err(e)) => {
                let reason = e.to_string();
                tracing::warn!(error = %reason, "Transport read failed");
                break (Some(e), ABNORMAL_CLOSURE, reason);
            }
            None => {
                let reason = "connection closed without a close frame".to_string();
                tracing::debug!("{}", reason);
                let eof = io::Error::new(io::ErrorKind::UnexpectedEof, reason.clone());
                break (Some(TransportError::from(eof)), ABNORMAL_CLOSURE, reason);
            }
        }
    };

    if !mark_closed(&shared) {
        return;
    }
    cancel.cancel();

    if let Some(e) = failure {
        let _ = events.send(TransportEvent::Error(e)).await;
    }
    let _ = events.send(TransportEvent::Closed { code, reason }).await;
}
