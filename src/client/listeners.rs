//! Listener registry: typed fan-out from the connection driver to callers.
//!
//! DESIGN
//! ======
//! Events form a closed enum with one subscriber list per `EventKind`.
//! Registration hands back a `Subscription`; calling `unsubscribe()` removes
//! exactly that registration. Dropping the subscription keeps the listener.
//!
//! Callbacks run outside the registry lock, so a callback may add or remove
//! listeners. A panicking callback is caught and logged; the remaining
//! callbacks for the same event still run.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use tracing::error;

use crate::protocol::{ChatMessage, ErrorPayload};

// =============================================================================
// EVENTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionStatus,
    Error,
    NewMessage,
}

/// Everything a chat client reports to its listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    ConnectionStatus(ConnectionStatus),
    /// Transport failure or server-reported error. Never fatal on its own.
    Error(ErrorPayload),
    NewMessage(ChatMessage),
}

impl ClientEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ConnectionStatus(_) => EventKind::ConnectionStatus,
            Self::Error(_) => EventKind::Error,
            Self::NewMessage(_) => EventKind::NewMessage,
        }
    }
}

/// Payload of `connection_status`. `error` is set only on the terminal
/// event emitted when reconnection gives up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionStatus {
    #[must_use]
    pub fn connected() -> Self {
        Self { connected: true, error: None }
    }

    #[must_use]
    pub fn disconnected() -> Self {
        Self { connected: false, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { connected: false, error: Some(error.into()) }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

pub type Callback = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Identifies one registration. Registering the same closure twice yields
/// two distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    connection_status: Vec<(ListenerId, Callback)>,
    error: Vec<(ListenerId, Callback)>,
    new_message: Vec<(ListenerId, Callback)>,
}

impl Registry {
    fn slot(&mut self, kind: EventKind) -> &mut Vec<(ListenerId, Callback)> {
        match kind {
            EventKind::ConnectionStatus => &mut self.connection_status,
            EventKind::Error => &mut self.error,
            EventKind::NewMessage => &mut self.new_message,
        }
    }
}

/// Shared handle to the registry. Clones refer to the same listeners.
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Arc<Mutex<Registry>>,
}

impl Listeners {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for every event of `kind`.
    pub fn add<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        let id = ListenerId(registry.next_id);
        registry.next_id += 1;
        registry.slot(kind).push((id, Arc::new(callback)));
        Subscription { registry: Arc::downgrade(&self.inner), kind, id }
    }

    /// Remove one registration. Returns `false` if it was already gone.
    pub fn remove(&self, kind: EventKind, id: ListenerId) -> bool {
        remove_from(&self.inner, kind, id)
    }

    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.lock().slot(kind).len()
    }

    /// Invoke every callback registered for the event's kind, in
    /// registration order.
    pub(crate) fn notify(&self, event: &ClientEvent) {
        let kind = event.kind();
        let callbacks: Vec<(ListenerId, Callback)> = self.lock().slot(kind).clone();

        for (id, callback) in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(?kind, listener = id.0, "chat: listener panicked");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn remove_from(inner: &Mutex<Registry>, kind: EventKind, id: ListenerId) -> bool {
    let mut registry = inner.lock().unwrap_or_else(PoisonError::into_inner);
    let slot = registry.slot(kind);
    let Some(pos) = slot.iter().position(|(existing, _)| *existing == id) else {
        return false;
    };
    slot.remove(pos);
    true
}

/// Scoped handle returned by `add`. Holds the registry weakly, so an
/// outstanding subscription does not keep a dropped client alive.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    kind: EventKind,
    id: ListenerId,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove the listener this subscription was issued for.
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(inner) => remove_from(&inner, self.kind, self.id),
            None => false,
        }
    }
}

#[cfg(test)]
#[path = "listeners_test.rs"]
mod tests;
