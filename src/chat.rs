//! Chat persistence collaborator.
//!
//! Message storage and search are owned by an external chat service; the
//! gateway delegates through this seam and treats failures per the gateway
//! error policy (history fetch failures are swallowed on join, everything
//! else surfaces as an `error` event).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A persisted chat message as returned by the chat service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub sender_id: String,
    pub sender_type: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// A message submitted for persistence.
#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub session_id: String,
    pub sender_id: String,
    pub sender_type: String,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
}

/// Errors raised by the chat collaborator.
#[derive(Debug, Error)]
pub enum ChatServiceError {
    #[error("message not found: {0}")]
    NotFound(String),

    #[error("chat service unavailable: {0}")]
    Unavailable(String),
}

/// Chat persistence seam consumed by the gateway.
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Most recent messages for a session, oldest first.
    async fn get_recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatServiceError>;

    /// Persist a message, returning it with id and timestamp assigned.
    async fn save_message(&self, message: NewChatMessage)
        -> Result<ChatMessage, ChatServiceError>;

    /// Page backwards through history from an optional timestamp.
    async fn load_message_history(
        &self,
        session_id: &str,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatServiceError>;

    /// Full-text search within one session's messages.
    async fn search_messages(
        &self,
        session_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatServiceError>;

    /// Flag a message as delivered to its recipient.
    async fn mark_message_as_delivered(&self, message_id: &str) -> Result<(), ChatServiceError>;

    /// Flag a message as read by its recipient.
    async fn mark_message_as_read(&self, message_id: &str) -> Result<(), ChatServiceError>;
}

/// Process-local chat store. Backs the development server and tests; a real
/// deployment points the gateway at an external chat service instead.
#[derive(Default)]
pub struct InMemoryChatService {
    messages: std::sync::Mutex<Vec<ChatMessage>>,
}

impl InMemoryChatService {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_messages<T>(&self, f: impl FnOnce(&mut Vec<ChatMessage>) -> T) -> T {
        let mut guard = match self.messages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[async_trait]
impl ChatService for InMemoryChatService {
    async fn get_recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatServiceError> {
        Ok(self.with_messages(|messages| {
            let mut recent: Vec<ChatMessage> = messages
                .iter()
                .filter(|m| m.session_id == session_id)
                .cloned()
                .collect();
            if recent.len() > limit {
                recent.drain(..recent.len() - limit);
            }
            recent
        }))
    }

    async fn save_message(
        &self,
        message: NewChatMessage,
    ) -> Result<ChatMessage, ChatServiceError> {
        let saved = ChatMessage {
            id: format!("msg_{}", ulid::Ulid::new()),
            session_id: message.session_id,
            sender_id: message.sender_id,
            sender_type: message.sender_type,
            content: message.content,
            metadata: message.metadata,
            timestamp: Utc::now(),
        };
        self.with_messages(|messages| messages.push(saved.clone()));
        Ok(saved)
    }

    async fn load_message_history(
        &self,
        session_id: &str,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatServiceError> {
        Ok(self.with_messages(|messages| {
            let mut page: Vec<ChatMessage> = messages
                .iter()
                .filter(|m| m.session_id == session_id)
                .filter(|m| before.is_none_or(|cutoff| m.timestamp < cutoff))
                .cloned()
                .collect();
            if page.len() > limit {
                page.drain(..page.len() - limit);
            }
            page
        }))
    }

    async fn search_messages(
        &self,
        session_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatServiceError> {
        let query = query.to_lowercase();
        Ok(self.with_messages(|messages| {
            messages
                .iter()
                .filter(|m| m.session_id == session_id)
                .filter(|m| m.content.to_lowercase().contains(&query))
                .take(limit)
                .cloned()
                .collect()
        }))
    }

    async fn mark_message_as_delivered(&self, message_id: &str) -> Result<(), ChatServiceError> {
        self.mark_metadata_flag(message_id, "delivered")
    }

    async fn mark_message_as_read(&self, message_id: &str) -> Result<(), ChatServiceError> {
        self.mark_metadata_flag(message_id, "read")
    }
}

impl InMemoryChatService {
    fn mark_metadata_flag(&self, message_id: &str, flag: &str) -> Result<(), ChatServiceError> {
        self.with_messages(|messages| {
            let message = messages
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| ChatServiceError::NotFound(message_id.to_string()))?;
            let metadata = message
                .metadata
                .get_or_insert_with(|| serde_json::json!({}));
            if let Some(map) = metadata.as_object_mut() {
                map.insert(flag.to_string(), serde_json::json!(true));
            }
            Ok(())
        })
    }
}
