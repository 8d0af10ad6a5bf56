//! Shared fixtures for it2-client integration tests

#![allow(dead_code)]

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc as fmpsc;
use futures::future::{self, BoxFuture};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};

use it2_client::transport::WireMessage;
use it2_client::{
    ClientConfig, Connection, Dialer, Duplex, Envelope, InboundPayload, TransportError,
};
use it2_core::{Endpoint, Handshake};
use it2_protocol::EnvelopeCodec;

/// Outbound payloads used by the tests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TestRequest {
    Ping(u32),
    Echo(String),
}

/// Inbound payloads used by the tests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TestResponse {
    Pong(u32),
    Echoed(String),
    Event(String),
}

impl InboundPayload for TestResponse {
    type Notification = String;

    fn into_notification(self) -> Result<String, Self> {
        match self {
            TestResponse::Event(text) => Ok(text),
            other => Err(other),
        }
    }
}

pub type TestConnection = Connection<TestRequest, TestResponse>;

/// Install a test subscriber honoring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Configuration that never finds a Unix socket
pub fn test_config() -> ClientConfig {
    ClientConfig {
        socket_path: Some(PathBuf::from("/nonexistent/it2-test/socket")),
        connect_timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    }
}

/// The terminal's side of an in-memory connection
pub struct ServerEnd {
    pub endpoint: Endpoint,
    pub handshake: Handshake,
    inbound: fmpsc::UnboundedReceiver<WireMessage>,
    outbound: fmpsc::UnboundedSender<Result<WireMessage, TransportError>>,
    codec: EnvelopeCodec,
}

impl ServerEnd {
    /// Next message the client wrote
    pub async fn next_message(&mut self) -> Option<WireMessage> {
        self.inbound.next().await
    }

    /// Next request the client wrote, decoded
    pub async fn recv_request(&mut self) -> Envelope<TestRequest> {
        match self.next_message().await {
            Some(WireMessage::Binary(frame)) => self.codec.decode(&frame).expect("decode request"),
            other => panic!("expected a request frame, got {:?}", other),
        }
    }

    /// Send an envelope with an explicit wire id
    pub fn reply(&self, id: Option<&str>, payload: TestResponse) {
        let envelope = Envelope {
            id: id.map(str::to_string),
            payload,
        };
        let frame = self.codec.encode(&envelope).expect("encode response");
        self.send_raw(frame);
    }

    /// Answer `request` with `payload`
    pub fn respond(&self, request: &Envelope<TestRequest>, payload: TestResponse) {
        self.reply(request.id.as_deref(), payload);
    }

    /// Send a notification
    pub fn notify(&self, text: &str) {
        self.reply(None, TestResponse::Event(text.to_string()));
    }

    /// Send arbitrary bytes as a binary message
    pub fn send_raw(&self, frame: Bytes) {
        self.outbound
            .unbounded_send(Ok(WireMessage::Binary(frame)))
            .expect("client stream dropped");
    }

    /// Send a close frame
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.outbound.unbounded_send(Ok(WireMessage::Close {
            code,
            reason: reason.to_string(),
        }));
    }

    /// Drop the connection without a close frame
    pub fn vanish(self) {
        drop(self);
    }
}

/// How a [`MemoryDialer`] connection treats request writes
#[derive(Debug, Clone, Copy)]
enum Writes {
    Accept,
    /// Accept this many binary writes, then refuse the rest
    FailAfter(usize),
    /// Never complete a binary write
    Stall,
}

/// In-memory [`Dialer`] handing each server end to the test
pub struct MemoryDialer {
    dials: AtomicUsize,
    failures: AtomicUsize,
    delay: Duration,
    writes: Writes,
    stalled: Arc<Notify>,
    servers: mpsc::UnboundedSender<ServerEnd>,
}

impl MemoryDialer {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        Self::build(Duration::ZERO, Writes::Accept)
    }

    /// Dialer whose dials take `delay` to complete
    pub fn with_delay(delay: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        Self::build(delay, Writes::Accept)
    }

    /// Dialer whose connections refuse every write
    pub fn rejecting_writes() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        Self::build(Duration::ZERO, Writes::FailAfter(0))
    }

    /// Dialer whose connections accept `count` writes and refuse the rest
    pub fn failing_after(count: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        Self::build(Duration::ZERO, Writes::FailAfter(count))
    }

    /// Dialer whose connections never finish writing a request
    pub fn stalling_writes() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        Self::build(Duration::ZERO, Writes::Stall)
    }

    fn build(delay: Duration, writes: Writes) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            dials: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            delay,
            writes,
            stalled: Arc::new(Notify::new()),
            servers,
        });
        (dialer, rx)
    }

    /// Make the next `count` dials fail with connection refused
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Number of dials attempted so far
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Wait until a write has stalled
    pub async fn write_stalled(&self) {
        self.stalled.notified().await;
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(
        &self,
        endpoint: &Endpoint,
        handshake: &Handshake,
    ) -> Result<Duplex, TransportError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into());
        }

        let (client_tx, server_rx) = fmpsc::unbounded();
        let (server_tx, client_rx) = fmpsc::unbounded();

        let mut writes = self.writes;
        let stalled = Arc::clone(&self.stalled);
        let sink = client_tx.sink_map_err(|_| TransportError::Closed).with(
            move |message: WireMessage| -> BoxFuture<'static, Result<WireMessage, TransportError>> {
                if !matches!(message, WireMessage::Binary(_)) {
                    return Box::pin(future::ready(Ok(message)));
                }
                match writes {
                    Writes::Accept => Box::pin(future::ready(Ok(message))),
                    Writes::FailAfter(0) => Box::pin(future::ready(Err(TransportError::Io(
                        io::Error::new(io::ErrorKind::BrokenPipe, "write rejected"),
                    )))),
                    Writes::FailAfter(n) => {
                        writes = Writes::FailAfter(n - 1);
                        Box::pin(future::ready(Ok(message)))
                    }
                    Writes::Stall => {
                        stalled.notify_one();
                        Box::pin(future::pending())
                    }
                }
            },
        );

        let server = ServerEnd {
            endpoint: endpoint.clone(),
            handshake: handshake.clone(),
            inbound: server_rx,
            outbound: server_tx,
            codec: EnvelopeCodec::new(),
        };
        self.servers
            .send(server)
            .map_err(|_| TransportError::Closed)?;

        Ok(Duplex {
            sink: Box::pin(sink),
            stream: Box::pin(client_rx),
        })
    }
}

/// A connection already connected through a fresh [`MemoryDialer`]
pub async fn connected() -> (TestConnection, ServerEnd, Arc<MemoryDialer>) {
    init_tracing();
    let (dialer, mut servers) = MemoryDialer::new();
    let conn = TestConnection::with_dialer(test_config(), dialer.clone());
    conn.connect().await.expect("connect");
    let server = servers.recv().await.expect("server end");
    (conn, server, dialer)
}
