use super::*;
use crate::protocol::ChatMessage;
use crate::state::test_helpers;
use tokio::time::{Duration, timeout};

async fn assert_channel_has_frame(rx: &mut mpsc::Receiver<ServerFrame>) -> ServerFrame {
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

fn chat_frame(project_id: &str, text: &str) -> ServerFrame {
    ServerFrame::NewMessage(ChatMessage {
        id: Uuid::new_v4(),
        user: "Alice".into(),
        text: text.into(),
        timestamp: 1,
        project_id: project_id.into(),
    })
}

#[tokio::test]
async fn join_creates_room_and_leave_evicts_it() {
    let state = test_helpers::test_app_state();
    let socket = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(4);

    join_room(&state, "P1", socket, tx).await;
    assert_eq!(room_size(&state, "P1").await, 1);

    leave_room(&state, "P1", socket).await;
    assert_eq!(room_size(&state, "P1").await, 0);
    assert!(state.rooms.read().await.get("P1").is_none());
}

#[tokio::test]
async fn leave_keeps_room_with_other_members() {
    let state = test_helpers::test_app_state();
    let (a, _rx_a) = test_helpers::seed_client(&state, "P1").await;
    let (_b, _rx_b) = test_helpers::seed_client(&state, "P1").await;

    leave_room(&state, "P1", a).await;
    assert_eq!(room_size(&state, "P1").await, 1);
}

#[tokio::test]
async fn leave_unknown_room_is_a_no_op() {
    let state = test_helpers::test_app_state();
    leave_room(&state, "missing", Uuid::new_v4()).await;
    assert!(state.rooms.read().await.is_empty());
}

#[tokio::test]
async fn broadcast_sends_to_all_except_excluded_socket() {
    let state = test_helpers::test_app_state();
    let (_a, mut rx_a) = test_helpers::seed_client(&state, "P1").await;
    let (b, mut rx_b) = test_helpers::seed_client(&state, "P1").await;
    let (_c, mut rx_c) = test_helpers::seed_client(&state, "P1").await;

    let frame = chat_frame("P1", "hi");
    let delivered = broadcast(&state, "P1", &frame, Some(b)).await;

    assert_eq!(delivered, 2);
    assert_eq!(assert_channel_has_frame(&mut rx_a).await, frame);
    assert_eq!(assert_channel_has_frame(&mut rx_c).await, frame);
    assert_channel_empty(&mut rx_b).await;
}

#[tokio::test]
async fn broadcast_stays_inside_its_room() {
    let state = test_helpers::test_app_state();
    let (_a, mut rx_a) = test_helpers::seed_client(&state, "P1").await;
    let (_b, mut rx_b) = test_helpers::seed_client(&state, "P2").await;

    broadcast(&state, "P1", &chat_frame("P1", "only p1"), None).await;

    assert_channel_has_frame(&mut rx_a).await;
    assert_channel_empty(&mut rx_b).await;
    assert_eq!(broadcast(&state, "P9", &chat_frame("P9", "nobody"), None).await, 0);
}

#[tokio::test]
async fn broadcast_skips_full_and_closed_queues() {
    let state = test_helpers::test_app_state();
    let full = Uuid::new_v4();
    let closed = Uuid::new_v4();
    let (full_tx, _full_rx) = mpsc::channel(1);
    let (closed_tx, closed_rx) = mpsc::channel(1);
    drop(closed_rx);
    full_tx.try_send(chat_frame("P1", "backlog")).unwrap();

    join_room(&state, "P1", full, full_tx).await;
    join_room(&state, "P1", closed, closed_tx).await;
    let (_ok, mut rx_ok) = test_helpers::seed_client(&state, "P1").await;

    let delivered = broadcast(&state, "P1", &chat_frame("P1", "next"), None).await;
    assert_eq!(delivered, 1);
    assert_channel_has_frame(&mut rx_ok).await;
}
