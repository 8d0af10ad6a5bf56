//! Per-connection driver task
//!
//! The driver owns the correlation table. It consumes commands from the
//! connection handle and events from the transport, so every table mutation
//! happens on this one task.

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use it2_protocol::{CorrelationId, Envelope, EnvelopeCodec, InboundPayload};
use tokio::sync::{mpsc, oneshot};

use crate::broadcast::Broadcaster;
use crate::error::CloseReason;
use crate::pending::{CorrelationTable, ResponseHandle};
use crate::transport::{Transport, TransportEvent, ABNORMAL_CLOSURE};

/// Request from the connection handle to its driver
pub(super) enum Command<Resp> {
    /// Track a request before its bytes are written
    Register {
        id: CorrelationId,
        reply: oneshot::Sender<ResponseHandle<Envelope<Resp>>>,
    },
    /// Roll back a registration whose send failed
    Forget { id: CorrelationId },
    /// Fail everything pending and stop
    Shutdown { done: oneshot::Sender<()> },
}

pub(super) struct Driver<Resp: InboundPayload> {
    pub(super) table: CorrelationTable<Envelope<Resp>>,
    pub(super) codec: EnvelopeCodec,
    pub(super) broadcaster: Arc<Broadcaster<Resp::Notification>>,
    pub(super) commands: mpsc::UnboundedReceiver<Command<Resp>>,
    pub(super) events: mpsc::Receiver<TransportEvent>,
    pub(super) transport: Arc<Transport>,
    pub(super) closed: Arc<OnceLock<CloseReason>>,
}

impl<Resp: InboundPayload> Driver<Resp> {
    pub(super) async fn run(mut self) {
        let mut acks = Vec::new();

        let reason = loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Register { id, reply }) => {
                        let handle = self.table.register(id);
                        if reply.send(handle).is_err() {
                            // Caller went away before writing anything
                            self.table.remove(id);
                        }
                    }
                    Some(Command::Forget { id }) => {
                        self.table.remove(id);
                    }
                    Some(Command::Shutdown { done }) => {
                        acks.push(done);
                        break CloseReason::Disconnected;
                    }
                    None => break CloseReason::Disconnected,
                },
                event = self.events.recv() => match event {
                    Some(TransportEvent::Message(frame)) => self.route(&frame),
                    Some(TransportEvent::Error(e)) => {
                        tracing::warn!(error = %e, "Transport error");
                    }
                    Some(TransportEvent::Closed { code, reason }) => {
                        break CloseReason::Remote { code, reason };
                    }
                    None => {
                        break CloseReason::Remote {
                            code: ABNORMAL_CLOSURE,
                            reason: "transport stopped".to_string(),
                        };
                    }
                },
            }
        };

        // A local disconnect records its reason before closing the transport
        let reason = self.closed.get_or_init(|| reason).clone();
        let failed = self.table.reject_all(&reason);
        self.transport.close();

        if reason.is_remote() {
            tracing::warn!(%reason, failed, "Connection lost");
        } else {
            tracing::info!(failed, "Connection closed");
        }

        for done in acks {
            let _ = done.send(());
        }
    }

    /// Deliver one inbound frame to its waiter or to the notification handlers
    fn route(&mut self, frame: &Bytes) {
        let envelope: Envelope<Resp> = match self.codec.decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, len = frame.len(), "Dropping malformed frame");
                return;
            }
        };

        let envelope = match envelope.correlation_id() {
            Some(id) => match self.table.resolve(id, envelope) {
                Ok(()) => {
                    tracing::trace!(%id, "Response delivered");
                    return;
                }
                Err(unclaimed) => unclaimed,
            },
            None => envelope,
        };

        let id = envelope.id.clone();
        match envelope.into_payload().into_notification() {
            Ok(notification) => {
                let delivered = self.broadcaster.dispatch(&notification);
                tracing::trace!(delivered, "Notification dispatched");
            }
            Err(_) => {
                tracing::debug!(id = ?id, "Dropping frame with no pending request");
            }
        }
    }
}
