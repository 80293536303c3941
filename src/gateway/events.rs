//! Wire events exchanged with chat clients.
//!
//! The event names and payload shapes are the wire contract; clients depend
//! on them verbatim. Payloads serialize camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::ChatMessage;

fn default_history_limit() -> usize {
    50
}

/// Events received from a client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinSession { session_id: String },

    #[serde(rename_all = "camelCase")]
    SendMessage {
        session_id: String,
        sender_type: String,
        content: String,
        #[serde(default)]
        metadata: Option<serde_json::Value>,
    },

    #[serde(rename_all = "camelCase")]
    Typing { session_id: String, is_typing: bool },

    #[serde(rename_all = "camelCase")]
    LoadMessageHistory {
        session_id: String,
        #[serde(default)]
        before_timestamp: Option<DateTime<Utc>>,
        #[serde(default = "default_history_limit")]
        limit: usize,
    },

    #[serde(rename_all = "camelCase")]
    SearchMessages {
        session_id: String,
        query: String,
        #[serde(default = "default_history_limit")]
        limit: usize,
    },

    #[serde(rename_all = "camelCase")]
    MarkMessageDelivered { message_id: String },

    #[serde(rename_all = "camelCase")]
    MarkMessageRead { message_id: String },
}

/// Events emitted to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    SessionJoined {
        session_id: String,
        socket_id: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    MessageHistory {
        session_id: String,
        messages: Vec<ChatMessage>,
    },

    MessageReceived(ChatMessage),

    #[serde(rename_all = "camelCase")]
    MessageSent {
        id: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    TypingStatus {
        socket_id: String,
        is_typing: bool,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    MessageHistoryLoaded {
        session_id: String,
        messages: Vec<ChatMessage>,
        has_more: bool,
    },

    #[serde(rename_all = "camelCase")]
    MessageSearchResults {
        session_id: String,
        query: String,
        messages: Vec<ChatMessage>,
    },

    #[serde(rename_all = "camelCase")]
    MessageDeliveryConfirmed {
        message_id: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    MessageReadConfirmed {
        message_id: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    UserJoined {
        socket_id: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    UserDisconnected {
        socket_id: String,
        timestamp: DateTime<Utc>,
    },

    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_parse_from_wire_names() {
        let raw = r#"{"event":"join_session","data":{"sessionId":"session_1"}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(event, ClientEvent::JoinSession { session_id } if session_id == "session_1"));

        let raw = r#"{"event":"send_message","data":{"sessionId":"session_1","senderType":"operator","content":"Hello"}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::SendMessage {
                content, metadata, ..
            } => {
                assert_eq!(content, "Hello");
                assert!(metadata.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn history_limit_defaults_to_fifty() {
        let raw = r#"{"event":"load_message_history","data":{"sessionId":"session_1"}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::LoadMessageHistory {
                limit,
                before_timestamp,
                ..
            } => {
                assert_eq!(limit, 50);
                assert!(before_timestamp.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn server_events_serialize_wire_names() {
        let event = ServerEvent::UserDisconnected {
            socket_id: "conn-1".into(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "user_disconnected");
        assert_eq!(value["data"]["socketId"], "conn-1");

        let value = serde_json::to_value(ServerEvent::error("nope")).unwrap();
        assert_eq!(value["event"], "error");
        assert_eq!(value["data"]["message"], "nope");
    }
}
