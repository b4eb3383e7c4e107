//! LLM and embedding provider implementations for PolicyPilot.
//!
//! All chat backends implement `policypilot_core::Provider`; embedding
//! backends implement `policypilot_core::Embedder`. The router builds both
//! from configuration.

pub mod embedding;
pub mod openai_compat;
pub mod router;

#[cfg(feature = "local-embeddings")]
pub use embedding::LocalEmbedder;
pub use embedding::ProviderEmbedder;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{build_chat_provider, build_embedder, build_provider};
