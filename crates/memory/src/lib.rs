//! Memory implementations for PolicyPilot: the document index and the
//! conversation log. Both live for the lifetime of the process.

pub mod document_store;
pub mod in_memory;
pub mod vector;

pub use document_store::InMemoryDocumentStore;
pub use in_memory::InMemoryConversationStore;
pub use vector::{cosine_similarity, rank_by_similarity};
