//! In-memory conversation store: process-lifetime multi-turn history.

use async_trait::async_trait;
use policypilot_core::error::MemoryError;
use policypilot_core::memory::ConversationStore;
use policypilot_core::message::{ConversationId, Message, Role};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::trace;

/// Keeps every conversation's messages in a map keyed by conversation id.
///
/// Each append extends the log under a single write lock, so a batch is
/// never observed half-written.
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<ConversationId, Vec<Message>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get_history(&self, conversation_id: &ConversationId) -> Result<Vec<Message>, MemoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(conversation_id).cloned().unwrap_or_default())
    }

    async fn append(
        &self,
        conversation_id: &ConversationId,
        messages: Vec<Message>,
    ) -> Result<(), MemoryError> {
        if messages.is_empty() {
            return Ok(());
        }
        if messages.iter().any(|m| m.role == Role::System) {
            return Err(MemoryError::Storage(
                "system messages are not part of conversation history".into(),
            ));
        }

        let mut conversations = self.conversations.write().await;
        trace!(conversation_id = %conversation_id, count = messages.len(), "Appending messages");
        conversations
            .entry(conversation_id.clone())
            .or_default()
            .extend(messages);
        Ok(())
    }

    async fn conversation_ids(&self) -> Result<Vec<ConversationId>, MemoryError> {
        let mut ids: Vec<_> = self.conversations.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
