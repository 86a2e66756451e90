//! WebSocket handler: project rooms and chat relay.
//!
//! DESIGN
//! ======
//! On upgrade, generates a socket ID and enters a `select!` loop:
//! - Incoming client frames → decode + dispatch by event
//! - Room broadcasts queued for this socket → forward to client
//!
//! Handlers validate, touch state, and return an `Outcome`. The dispatch
//! layer owns delivery: reply to sender or broadcast to a room.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → socket id assigned, no welcome frame
//! 2. `join_project` → leave current room, join the named one
//! 3. `chat_message` → persist → broadcast stored record to its room
//! 4. Close → leave current room

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::protocol::{ClientFrame, OutgoingMessage, ServerFrame};
use crate::services;
use crate::state::AppState;

/// Error text sent to the sender when a chat message cannot be stored.
pub const SAVE_FAILED_MESSAGE: &str = "Failed to save message";

// =============================================================================
// OUTCOME
// =============================================================================

/// What the dispatch layer should deliver after a handler runs.
#[derive(Debug)]
enum Outcome {
    /// Nothing to send.
    Silent,
    /// Send a frame to the sender only.
    Reply(ServerFrame),
    /// Send a frame to every socket in `room`, sender included.
    Broadcast { room: String, frame: ServerFrame },
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let socket_id = Uuid::new_v4();
    let (client_tx, mut client_rx) = mpsc::channel::<ServerFrame>(state.client_queue);

    info!(%socket_id, "ws: client connected");

    let mut current_room: Option<String> = None;

    'conn: loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, &mut current_room, socket_id, &client_tx, &text).await;
                        for frame in replies {
                            if send_frame(&mut socket, &frame).await.is_err() {
                                break 'conn;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(room) = current_room {
        services::room::leave_room(&state, &room, socket_id).await;
    }
    info!(%socket_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Decode and handle one inbound text frame; returns frames for the sender.
///
/// Kept apart from the socket so tests can drive dispatch with plain channels.
pub(crate) async fn process_inbound_text(
    state: &AppState,
    current_room: &mut Option<String>,
    socket_id: Uuid,
    client_tx: &mpsc::Sender<ServerFrame>,
    text: &str,
) -> Vec<ServerFrame> {
    let frame = match ClientFrame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(%socket_id, error = %e, "ws: invalid inbound frame");
            return vec![ServerFrame::error(format!("invalid frame: {e}"))];
        }
    };

    let outcome = match frame {
        ClientFrame::JoinProject(project_id) => {
            handle_join(state, current_room, socket_id, client_tx, project_id).await
        }
        ClientFrame::ChatMessage(message) => handle_chat(state, socket_id, message).await,
    };

    match outcome {
        Outcome::Silent => vec![],
        Outcome::Reply(frame) => vec![frame],
        Outcome::Broadcast { room, frame } => {
            let delivered = services::room::broadcast(state, &room, &frame, None).await;
            info!(%socket_id, %room, delivered, "ws: broadcast frame");
            vec![]
        }
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn handle_join(
    state: &AppState,
    current_room: &mut Option<String>,
    socket_id: Uuid,
    client_tx: &mpsc::Sender<ServerFrame>,
    project_id: String,
) -> Outcome {
    if project_id.trim().is_empty() {
        return Outcome::Reply(ServerFrame::error("projectId required"));
    }
    if current_room.as_deref() == Some(project_id.as_str()) {
        return Outcome::Silent;
    }

    if let Some(previous) = current_room.take() {
        services::room::leave_room(state, &previous, socket_id).await;
    }
    services::room::join_room(state, &project_id, socket_id, client_tx.clone()).await;
    *current_room = Some(project_id);
    Outcome::Silent
}

async fn handle_chat(state: &AppState, socket_id: Uuid, message: OutgoingMessage) -> Outcome {
    match state.store.create(message.into()).await {
        Ok(stored) => {
            info!(%socket_id, id = %stored.id, project_id = %stored.project_id, "ws: message saved");
            Outcome::Broadcast { room: stored.project_id.clone(), frame: ServerFrame::NewMessage(stored.to_chat()) }
        }
        Err(e) => {
            warn!(%socket_id, error = %e, "ws: failed to save message");
            Outcome::Reply(ServerFrame::error(SAVE_FAILED_MESSAGE))
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), ()> {
    let json = match frame.encode() {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
