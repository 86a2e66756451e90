use super::*;
use crate::protocol::UNKNOWN_USER;
use crate::services::message::{MemoryMessageStore, MessageError, MessageStore, MessageUpdate, NewMessage, StoredMessage};
use crate::state::test_helpers;
use std::sync::Arc;
use tokio::time::{Duration, timeout};

async fn recv_frame(rx: &mut mpsc::Receiver<ServerFrame>) -> ServerFrame {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("frame receive timed out")
        .expect("channel closed")
}

async fn assert_channel_empty(rx: &mut mpsc::Receiver<ServerFrame>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected channel to remain empty"
    );
}

/// One simulated socket: its room cursor plus its outbound queue.
struct TestSocket {
    id: Uuid,
    room: Option<String>,
    tx: mpsc::Sender<ServerFrame>,
    rx: mpsc::Receiver<ServerFrame>,
}

impl TestSocket {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(16);
        Self { id: Uuid::new_v4(), room: None, tx, rx }
    }

    async fn send(&mut self, state: &AppState, frame: &ClientFrame) -> Vec<ServerFrame> {
        let text = frame.encode().unwrap();
        process_inbound_text(state, &mut self.room, self.id, &self.tx, &text).await
    }
}

fn chat(project_id: &str, text: &str) -> ClientFrame {
    ClientFrame::ChatMessage(OutgoingMessage::new(project_id, text))
}

#[tokio::test]
async fn join_then_chat_broadcasts_stored_record_to_room() {
    let store = MemoryMessageStore::new();
    let state = test_helpers::test_app_state_with_store(store.clone());
    let mut alice = TestSocket::new();
    let mut bob = TestSocket::new();

    assert!(alice.send(&state, &ClientFrame::JoinProject("P1".into())).await.is_empty());
    assert!(bob.send(&state, &ClientFrame::JoinProject("P1".into())).await.is_empty());

    let outgoing = OutgoingMessage::new("P1", "hi").with_user(Some("u1".into()), Some("Alice".into()));
    let replies = alice.send(&state, &ClientFrame::ChatMessage(outgoing)).await;
    assert!(replies.is_empty());

    let ServerFrame::NewMessage(to_alice) = recv_frame(&mut alice.rx).await else {
        panic!("expected new_message");
    };
    let ServerFrame::NewMessage(to_bob) = recv_frame(&mut bob.rx).await else {
        panic!("expected new_message");
    };
    assert_eq!(to_alice, to_bob);
    assert_eq!(to_alice.project_id, "P1");
    assert_eq!(to_alice.text, "hi");
    assert_eq!(to_alice.user, "Alice");

    let stored = store.list_by_project("P1").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, to_alice.id);
    assert_eq!(stored[0].timestamp, to_alice.timestamp);
}

#[tokio::test]
async fn chat_without_username_is_stamped_unknown_user() {
    let state = test_helpers::test_app_state();
    let mut socket = TestSocket::new();
    socket.send(&state, &ClientFrame::JoinProject("P1".into())).await;
    socket.send(&state, &chat("P1", "anonymous")).await;

    let ServerFrame::NewMessage(msg) = recv_frame(&mut socket.rx).await else {
        panic!("expected new_message");
    };
    assert_eq!(msg.user, UNKNOWN_USER);
}

#[tokio::test]
async fn join_moves_socket_between_rooms() {
    let state = test_helpers::test_app_state();
    let mut socket = TestSocket::new();
    let mut watcher = TestSocket::new();
    watcher.send(&state, &ClientFrame::JoinProject("P1".into())).await;

    socket.send(&state, &ClientFrame::JoinProject("P1".into())).await;
    socket.send(&state, &ClientFrame::JoinProject("P2".into())).await;

    assert_eq!(socket.room.as_deref(), Some("P2"));
    assert_eq!(services::room::room_size(&state, "P1").await, 1);
    assert_eq!(services::room::room_size(&state, "P2").await, 1);

    watcher.send(&state, &chat("P1", "p1 only")).await;
    recv_frame(&mut watcher.rx).await;
    assert_channel_empty(&mut socket.rx).await;
}

#[tokio::test]
async fn rejoining_same_room_keeps_single_membership() {
    let state = test_helpers::test_app_state();
    let mut socket = TestSocket::new();
    socket.send(&state, &ClientFrame::JoinProject("P1".into())).await;
    socket.send(&state, &ClientFrame::JoinProject("P1".into())).await;

    assert_eq!(services::room::room_size(&state, "P1").await, 1);
    socket.send(&state, &chat("P1", "once")).await;
    recv_frame(&mut socket.rx).await;
    assert_channel_empty(&mut socket.rx).await;
}

#[tokio::test]
async fn chat_targets_message_project_not_senders_room() {
    let state = test_helpers::test_app_state();
    let mut sender = TestSocket::new();
    let mut listener = TestSocket::new();
    sender.send(&state, &ClientFrame::JoinProject("P1".into())).await;
    listener.send(&state, &ClientFrame::JoinProject("P2".into())).await;

    sender.send(&state, &chat("P2", "cross-room")).await;

    let ServerFrame::NewMessage(msg) = recv_frame(&mut listener.rx).await else {
        panic!("expected new_message");
    };
    assert_eq!(msg.project_id, "P2");
    assert_channel_empty(&mut sender.rx).await;
}

#[tokio::test]
async fn blank_join_is_rejected() {
    let state = test_helpers::test_app_state();
    let mut socket = TestSocket::new();
    let replies = socket.send(&state, &ClientFrame::JoinProject("  ".into())).await;
    assert_eq!(replies, vec![ServerFrame::error("projectId required")]);
    assert!(socket.room.is_none());
}

#[tokio::test]
async fn malformed_frames_reply_with_error() {
    let state = test_helpers::test_app_state();
    let mut socket = TestSocket::new();

    for text in ["not json", r#"{"event":"shout","data":"x"}"#] {
        let replies = process_inbound_text(&state, &mut socket.room, socket.id, &socket.tx, text).await;
        assert_eq!(replies.len(), 1);
        let ServerFrame::Error(payload) = &replies[0] else {
            panic!("expected error frame");
        };
        assert!(payload.message.starts_with("invalid frame: "), "{}", payload.message);
    }
}

#[tokio::test]
async fn invalid_chat_reports_save_failure_to_sender_only() {
    let state = test_helpers::test_app_state();
    let mut sender = TestSocket::new();
    let mut peer = TestSocket::new();
    sender.send(&state, &ClientFrame::JoinProject("P1".into())).await;
    peer.send(&state, &ClientFrame::JoinProject("P1".into())).await;

    let replies = sender.send(&state, &chat("P1", "   ")).await;
    assert_eq!(replies, vec![ServerFrame::error(SAVE_FAILED_MESSAGE)]);
    assert_channel_empty(&mut peer.rx).await;
}

struct FailingStore;

#[async_trait::async_trait]
impl MessageStore for FailingStore {
    async fn create(&self, _message: NewMessage) -> Result<StoredMessage, MessageError> {
        Err(MessageError::Database(sqlx::Error::PoolTimedOut))
    }
    async fn get(&self, _id: Uuid) -> Result<Option<StoredMessage>, MessageError> {
        Ok(None)
    }
    async fn list_by_project(&self, _project_id: &str) -> Result<Vec<StoredMessage>, MessageError> {
        Ok(vec![])
    }
    async fn list_by_user(&self, _user_id: Option<&str>) -> Result<Vec<StoredMessage>, MessageError> {
        Ok(vec![])
    }
    async fn update(&self, _id: Uuid, _update: MessageUpdate) -> Result<Option<StoredMessage>, MessageError> {
        Ok(None)
    }
    async fn mark_read(&self, _id: Uuid, _user_id: &str) -> Result<Option<StoredMessage>, MessageError> {
        Ok(None)
    }
    async fn delete(&self, _id: Uuid) -> Result<bool, MessageError> {
        Ok(false)
    }
}

#[tokio::test]
async fn store_failure_reports_error_without_broadcast() {
    let state = AppState::new(Arc::new(FailingStore));
    let mut socket = TestSocket::new();
    socket.send(&state, &ClientFrame::JoinProject("P1".into())).await;

    let replies = socket.send(&state, &chat("P1", "lost")).await;
    assert_eq!(replies, vec![ServerFrame::error(SAVE_FAILED_MESSAGE)]);
    assert_channel_empty(&mut socket.rx).await;
}
