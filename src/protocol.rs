//! Wire protocol shared by the relay server and the chat client.
//!
//! ARCHITECTURE
//! ============
//! Every WebSocket text frame is a JSON envelope `{"event": ..., "data": ...}`.
//! Clients send `ClientFrame`s, the server answers with `ServerFrame`s. The
//! `connect` and `disconnect` events belong to the transport and never appear
//! on the wire.
//!
//! DESIGN
//! ======
//! - Closed enums on both sides: an unknown event name is a decode error,
//!   not a silently dropped frame.
//! - Payload field names are camelCase to stay compatible with the browser
//!   client (`projectId`, `userId`).
//! - Timestamps are milliseconds since the Unix epoch.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display name stamped on messages sent without a `username`.
pub const UNKNOWN_USER: &str = "Unknown User";

// =============================================================================
// FRAMES
// =============================================================================

/// Frames emitted by a chat client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Move the socket into the room named by a project id.
    JoinProject(String),
    /// Persist a chat message and broadcast it to its project room.
    ChatMessage(OutgoingMessage),
}

/// Frames emitted by the relay server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    NewMessage(ChatMessage),
    Error(ErrorPayload),
}

impl ClientFrame {
    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON or an unknown event name.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl ServerFrame {
    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON or an unknown event name.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Build an `error` frame carrying a human-readable message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload { message: message.into() })
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// Payload of an outgoing `chat_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub project_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Client-side send time. The server stamps its own on persist.
    #[serde(default)]
    pub timestamp: i64,
}

impl OutgoingMessage {
    pub fn new(project_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            text: text.into(),
            user_id: None,
            username: None,
            timestamp: now_ms(),
        }
    }

    #[must_use]
    pub fn with_user(mut self, user_id: Option<String>, username: Option<String>) -> Self {
        self.user_id = user_id;
        self.username = username;
        self
    }
}

/// A persisted chat message as broadcast to a project room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub user: String,
    pub text: String,
    pub timestamp: i64,
    pub project_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

// =============================================================================
// HELPERS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
