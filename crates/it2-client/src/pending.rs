//! Correlation table for in-flight requests
//!
//! Maps a correlation id to the one-shot sink of the caller waiting on it.
//! The table is owned by a single task (the connection driver), so it needs
//! no locking: registration, resolution and rejection can never interleave
//! for the same id.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use it2_protocol::CorrelationId;
use tokio::sync::oneshot;

use crate::error::{CloseReason, ConnectionError};

type Completion<T> = oneshot::Sender<Result<T, ConnectionError>>;

/// Pending requests keyed by correlation id
pub struct CorrelationTable<T> {
    pending: HashMap<CorrelationId, Completion<T>>,
}

impl<T> CorrelationTable<T> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Track a new request and return the handle its caller awaits
    pub fn register(&mut self, id: CorrelationId) -> ResponseHandle<T> {
        let (tx, rx) = oneshot::channel();
        let previous = self.pending.insert(id, tx);
        debug_assert!(previous.is_none(), "correlation id {} registered twice", id);
        ResponseHandle { id, rx }
    }

    /// Complete the request registered under `id`
    ///
    /// Hands `value` back when no request is pending under `id`: unknown and
    /// already-completed ids are not errors, since late or duplicate
    /// deliveries must not disturb anyone.
    pub fn resolve(&mut self, id: CorrelationId, value: T) -> Result<(), T> {
        let Some(completion) = self.pending.remove(&id) else {
            return Err(value);
        };
        if completion.send(Ok(value)).is_err() {
            tracing::trace!(%id, "Caller stopped waiting before its response arrived");
        }
        Ok(())
    }

    /// Drop the entry for `id` without completing it
    ///
    /// Returns whether an entry existed.
    pub fn remove(&mut self, id: CorrelationId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Fail every pending request and empty the table
    ///
    /// Returns how many requests were failed.
    pub fn reject_all(&mut self, reason: &CloseReason) -> usize {
        let count = self.pending.len();
        for (_, completion) in self.pending.drain() {
            let _ = completion.send(Err(ConnectionError::ConnectionClosed(reason.clone())));
        }
        count
    }

    /// Whether a request is pending under `id`
    pub fn contains(&self, id: CorrelationId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Number of pending requests
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if no request is pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T> Default for CorrelationTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Future completing when a pending request resolves or is rejected
#[must_use = "a response handle does nothing unless awaited"]
pub struct ResponseHandle<T> {
    id: CorrelationId,
    rx: oneshot::Receiver<Result<T, ConnectionError>>,
}

impl<T> ResponseHandle<T> {
    /// Correlation id this handle waits on
    pub fn id(&self) -> CorrelationId {
        self.id
    }
}

impl<T> Future for ResponseHandle<T> {
    type Output = Result<T, ConnectionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sink means the table went away with the connection
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or(Err(ConnectionError::ConnectionClosed(
                CloseReason::Disconnected,
            )))
        })
    }
}
