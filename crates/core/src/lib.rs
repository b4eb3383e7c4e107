//! # PolicyPilot Core
//!
//! Domain types, traits, and error definitions for the PolicyPilot policy
//! assistant. Every subsystem (model backend, embedder, document store,
//! conversation memory, tools) is a trait here; implementations live in their
//! own crates and everything depends inward on core.

pub mod document;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use document::{Document, DocumentMetadata, DocumentStore, EmbeddedDocument, Embedder, ScoredDocument};
pub use error::{Error, IngestionError, MemoryError, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use memory::ConversationStore;
pub use message::{ContentPart, ConversationId, ImageContent, Message, MessageToolCall, Role, ToolResultContent};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
