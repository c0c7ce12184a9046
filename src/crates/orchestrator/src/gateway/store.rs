//! Conversation store seam.
//!
//! Message persistence lives outside this crate. The gateway reads history
//! from the store and appends exactly one assistant message per completed
//! request.

use crate::{OrchestratorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use llm::{ChatMessage, ChatRole};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: ChatRole,
    pub text: String,
    /// Structured details attached by the writer
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.text.clone())
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append_message(
        &self,
        conversation_id: &str,
        role: ChatRole,
        text: &str,
        metadata: Value,
    ) -> Result<StoredMessage>;

    /// Messages oldest first
    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>>;
}

/// Process-local store for the CLI and tests
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: DashMap<String, Vec<StoredMessage>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_count(&self, conversation_id: &str) -> usize {
        self.conversations.get(conversation_id).map_or(0, |m| m.len())
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append_message(
        &self,
        conversation_id: &str,
        role: ChatRole,
        text: &str,
        metadata: Value,
    ) -> Result<StoredMessage> {
        if conversation_id.trim().is_empty() {
            return Err(OrchestratorError::Store("conversation id is empty".to_string()));
        }
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            text: text.to_string(),
            metadata,
            created_at: Utc::now(),
        };
        self.conversations
            .entry(conversation_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        Ok(self
            .conversations
            .get(conversation_id)
            .map(|m| m.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_and_load() {
        let store = InMemoryConversationStore::new();
        store.append_message("c1", ChatRole::User, "hi", Value::Null).await.unwrap();
        let reply = store
            .append_message("c1", ChatRole::Assistant, "hello", json!({"model": "m"}))
            .await
            .unwrap();

        let messages = store.load_messages("c1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], reply);
        assert_eq!(messages[0].to_chat(), ChatMessage::user("hi"));
        assert!(store.load_messages("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_blank_conversation() {
        let store = InMemoryConversationStore::new();
        assert!(store.append_message(" ", ChatRole::User, "hi", Value::Null).await.is_err());
        assert_eq!(store.message_count(" "), 0);
    }
}
