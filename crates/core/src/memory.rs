//! Conversation memory: the per-conversation message log.
//!
//! The store is append-only. Each conversation's messages keep strict append
//! order, and a batch passed to one `append` call is recorded entirely or not
//! at all.

use async_trait::async_trait;

use crate::error::MemoryError;
use crate::message::{ConversationId, Message};

/// The core ConversationStore trait.
///
/// Implementations: in-memory (process lifetime).
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The backend name (e.g., "in_memory").
    fn name(&self) -> &str;

    /// Ordered history for a conversation; empty if the id was never seen.
    async fn get_history(&self, conversation_id: &ConversationId) -> Result<Vec<Message>, MemoryError>;

    /// Append a batch of messages atomically.
    async fn append(
        &self,
        conversation_id: &ConversationId,
        messages: Vec<Message>,
    ) -> Result<(), MemoryError>;

    /// Ids of every conversation that has at least one message.
    async fn conversation_ids(&self) -> Result<Vec<ConversationId>, MemoryError>;
}
