use super::*;
use serde_json::json;

#[test]
fn join_project_uses_event_envelope() {
    let text = ClientFrame::JoinProject("P1".into()).encode().unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value, json!({"event": "join_project", "data": "P1"}));
}

#[test]
fn chat_message_payload_is_camel_case() {
    let msg = OutgoingMessage {
        project_id: "P1".into(),
        text: "hi".into(),
        user_id: Some("u-1".into()),
        username: None,
        timestamp: 42,
    };
    let value = serde_json::to_value(ClientFrame::ChatMessage(msg)).unwrap();
    assert_eq!(
        value,
        json!({
            "event": "chat_message",
            "data": {"projectId": "P1", "text": "hi", "userId": "u-1", "timestamp": 42}
        })
    );
}

#[test]
fn chat_message_decodes_without_optional_fields() {
    let frame = ClientFrame::decode(r#"{"event":"chat_message","data":{"projectId":"P9","text":"yo"}}"#).unwrap();
    let ClientFrame::ChatMessage(msg) = frame else {
        panic!("expected chat_message, got {frame:?}");
    };
    assert_eq!(msg.project_id, "P9");
    assert_eq!(msg.text, "yo");
    assert!(msg.user_id.is_none());
    assert!(msg.username.is_none());
    assert_eq!(msg.timestamp, 0);
}

#[test]
fn unknown_client_event_is_rejected() {
    assert!(ClientFrame::decode(r#"{"event":"leave_project","data":"P1"}"#).is_err());
    assert!(ClientFrame::decode("not json").is_err());
}

#[test]
fn new_message_decodes_from_server_json() {
    let id = Uuid::new_v4();
    let text = json!({
        "event": "new_message",
        "data": {"id": id, "user": "Ada", "text": "hello", "timestamp": 1000, "projectId": "P1"}
    })
    .to_string();

    let frame = ServerFrame::decode(&text).unwrap();
    assert_eq!(
        frame,
        ServerFrame::NewMessage(ChatMessage {
            id,
            user: "Ada".into(),
            text: "hello".into(),
            timestamp: 1000,
            project_id: "P1".into(),
        })
    );
}

#[test]
fn error_frame_carries_message() {
    let text = ServerFrame::error("Failed to save message").encode().unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value, json!({"event": "error", "data": {"message": "Failed to save message"}}));
}

#[test]
fn outgoing_message_new_stamps_time() {
    let before = now_ms();
    let msg = OutgoingMessage::new("P1", "hi").with_user(Some("u-1".into()), Some("Ada".into()));
    assert!(msg.timestamp >= before);
    assert_eq!(msg.user_id.as_deref(), Some("u-1"));
    assert_eq!(msg.username.as_deref(), Some("Ada"));
}
