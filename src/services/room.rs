//! Room service: join, leave, and fan-out for project rooms.
//!
//! DESIGN
//! ======
//! A socket belongs to at most one room at a time; the caller tracks which
//! one and passes it back on leave. Broadcast is best-effort: a socket whose
//! outbound queue is full misses the frame rather than stalling the room.

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::protocol::ServerFrame;
use crate::state::AppState;

/// Add a socket to the room for `project_id`, creating the room if needed.
pub async fn join_room(state: &AppState, project_id: &str, socket_id: Uuid, tx: mpsc::Sender<ServerFrame>) {
    let mut rooms = state.rooms.write().await;
    let room = rooms.entry(project_id.to_owned()).or_default();
    room.clients.insert(socket_id, tx);
    info!(%project_id, %socket_id, members = room.clients.len(), "socket joined project room");
}

/// Remove a socket from a room. Empty rooms are evicted.
pub async fn leave_room(state: &AppState, project_id: &str, socket_id: Uuid) {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(project_id) else {
        return;
    };

    room.clients.remove(&socket_id);
    info!(%project_id, %socket_id, remaining = room.clients.len(), "socket left project room");

    if room.clients.is_empty() {
        rooms.remove(project_id);
        info!(%project_id, "evicted empty project room");
    }
}

/// Send `frame` to every socket in the room except `exclude`.
/// Returns the number of sockets the frame was queued for.
pub async fn broadcast(state: &AppState, project_id: &str, frame: &ServerFrame, exclude: Option<Uuid>) -> usize {
    let rooms = state.rooms.read().await;
    let Some(room) = rooms.get(project_id) else {
        return 0;
    };

    let mut delivered = 0;
    for (socket_id, tx) in &room.clients {
        if exclude == Some(*socket_id) {
            continue;
        }
        match tx.try_send(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%project_id, %socket_id, "outbound queue full; dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
    delivered
}

/// Number of sockets currently in the room.
pub async fn room_size(state: &AppState, project_id: &str) -> usize {
    state
        .rooms
        .read()
        .await
        .get(project_id)
        .map_or(0, |room| room.clients.len())
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
