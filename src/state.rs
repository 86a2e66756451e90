//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the message store and the map of live project rooms. A room
//! exists only while at least one socket is in it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::config::DEFAULT_WS_CLIENT_QUEUE;
use crate::protocol::ServerFrame;
use crate::services::message::MessageStore;

// =============================================================================
// ROOM
// =============================================================================

/// Sockets currently joined to one project.
pub struct Room {
    /// socket id -> sender for outgoing frames.
    pub clients: HashMap<Uuid, mpsc::Sender<ServerFrame>>,
}

impl Room {
    #[must_use]
    pub fn new() -> Self {
        Self { clients: HashMap::new() }
    }
}

impl Default for Room {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MessageStore>,
    /// project id -> room.
    pub rooms: Arc<RwLock<HashMap<String, Room>>>,
    /// Outbound queue depth for each socket.
    pub client_queue: usize,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store, rooms: Arc::new(RwLock::new(HashMap::new())), client_queue: DEFAULT_WS_CLIENT_QUEUE }
    }

    #[must_use]
    pub fn with_client_queue(mut self, depth: usize) -> Self {
        self.client_queue = depth.max(1);
        self
    }
}

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::services::message::MemoryMessageStore;

    /// `AppState` over an empty in-memory store.
    #[must_use]
    pub fn test_app_state() -> AppState {
        AppState::new(Arc::new(MemoryMessageStore::new()))
    }

    /// `AppState` sharing the given in-memory store, so tests can inspect it.
    #[must_use]
    pub fn test_app_state_with_store(store: MemoryMessageStore) -> AppState {
        AppState::new(Arc::new(store))
    }

    /// Insert a socket into a room directly and return its id and receiver.
    pub async fn seed_client(state: &AppState, project_id: &str) -> (Uuid, mpsc::Receiver<ServerFrame>) {
        let socket_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(8);
        let mut rooms = state.rooms.write().await;
        rooms
            .entry(project_id.to_owned())
            .or_default()
            .clients
            .insert(socket_id, tx);
        (socket_id, rx)
    }
}
