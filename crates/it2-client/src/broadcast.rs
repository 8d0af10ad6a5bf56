//! Notification fan-out
//!
//! Handlers registered on a [`Broadcaster`] receive every notification in
//! registration order. A panicking handler is logged and skipped; the
//! remaining handlers still run.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

type Handler<N> = Arc<dyn Fn(&N) + Send + Sync>;

/// Registry of notification handlers
pub struct Broadcaster<N> {
    handlers: DashMap<u64, Handler<N>>,
    next_id: AtomicU64,
}

impl<N> Broadcaster<N> {
    /// Create a broadcaster with no handlers
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler
    ///
    /// The handler stays registered until [`Subscription::unsubscribe`] is
    /// called; dropping the subscription does not remove it.
    pub fn subscribe<F>(self: &Arc<Self>, handler: F) -> Subscription<N>
    where
        F: Fn(&N) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.insert(id, Arc::new(handler));
        tracing::trace!(subscription = id, "Notification handler registered");
        Subscription {
            id,
            broadcaster: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: u64) -> bool {
        self.handlers.remove(&id).is_some()
    }

    /// Deliver a notification to every current handler
    ///
    /// Handlers added or removed while a dispatch is running take effect from
    /// the next dispatch. Returns the number of handlers that completed
    /// without panicking.
    pub fn dispatch(&self, notification: &N) -> usize {
        // Snapshot so handlers may (un)subscribe without deadlocking the map
        let mut snapshot: Vec<(u64, Handler<N>)> = self
            .handlers
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        snapshot.sort_unstable_by_key(|(id, _)| *id);

        let mut delivered = 0;
        for (id, handler) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(notification))) {
                Ok(()) => delivered += 1,
                Err(cause) => {
                    let message = cause
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| cause.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(subscription = id, "Notification handler panicked: {}", message);
                }
            }
        }
        delivered
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handler is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<N> Default for Broadcaster<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Token identifying one registered handler
pub struct Subscription<N> {
    id: u64,
    broadcaster: Weak<Broadcaster<N>>,
}

impl<N> Subscription<N> {
    /// Registration id, unique within its broadcaster
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the handler
    ///
    /// Returns false if it was already gone or the broadcaster was dropped.
    pub fn unsubscribe(self) -> bool {
        match self.broadcaster.upgrade() {
            Some(broadcaster) => broadcaster.unsubscribe(self.id),
            None => false,
        }
    }
}

impl<N> std::fmt::Debug for Subscription<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
