//! Tools the PolicyPilot agent can call.
//!
//! - `retrieval_tool`: semantic search over the ingested policy documents
//! - `send_reimbursement`: decides on a reimbursement request
//!
//! The registry is built once at startup and shared read-only by every
//! conversation.

pub mod reimbursement;
pub mod retrieval;

use std::sync::Arc;

use policypilot_config::AppConfig;
use policypilot_core::document::{DocumentStore, Embedder};
use policypilot_core::tool::ToolRegistry;

pub use reimbursement::{Currency, Decision, ReimbursementRequest, ReimbursementTool};
pub use retrieval::{format_results, RetrievalTool};

/// Create the registry with both built-in tools.
pub fn default_registry(
    config: &AppConfig,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn DocumentStore>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(RetrievalTool::new(
        embedder,
        store,
        config.retrieval.top_k,
    )));
    registry.register(Box::new(ReimbursementTool::new(config.reimbursement.limit)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use policypilot_core::error::ProviderError;
    use policypilot_memory::InMemoryDocumentStore;

    struct NullEmbedder;

    #[async_trait]
    impl Embedder for NullEmbedder {
        fn model(&self) -> &str {
            "null"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    #[test]
    fn default_registry_has_both_tools() {
        let registry = default_registry(
            &AppConfig::default(),
            Arc::new(NullEmbedder),
            Arc::new(InMemoryDocumentStore::new()),
        );
        assert_eq!(registry.names(), vec!["retrieval_tool", "send_reimbursement"]);
    }
}
