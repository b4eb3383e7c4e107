//! Policy retrieval tool: semantic search over the ingested policy chunks.
//!
//! Embeds the query, asks the document store for the `top_k` most similar
//! chunks and renders them as one text blob in rank order. No hits is a
//! successful, empty result.

use std::sync::Arc;

use async_trait::async_trait;
use policypilot_core::document::{DocumentStore, Embedder, ScoredDocument};
use policypilot_core::error::ToolError;
use policypilot_core::tool::{Tool, ToolResult};
use tracing::debug;

pub const RETRIEVAL_TOOL_NAME: &str = "retrieval_tool";

pub struct RetrievalTool {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn DocumentStore>,
    top_k: usize,
}

impl RetrievalTool {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn DocumentStore>, top_k: usize) -> Self {
        Self {
            embedder,
            store,
            top_k: top_k.max(1),
        }
    }

    /// Search and format in one step.
    pub async fn retrieve(&self, query: &str) -> Result<String, ToolError> {
        let query_vector = self
            .embedder
            .embed_one(query)
            .await
            .map_err(|e| failed(format!("could not embed query: {e}")))?;

        let hits = self
            .store
            .search(&query_vector, self.top_k)
            .await
            .map_err(|e| failed(format!("document search failed: {e}")))?;

        debug!(query = %query, hits = hits.len(), "Retrieved policy chunks");
        Ok(format_results(&hits))
    }
}

fn failed(reason: String) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: RETRIEVAL_TOOL_NAME.into(),
        reason,
    }
}

/// `File Content for {file_path}: {content}` per hit, blank-line separated.
pub fn format_results(hits: &[ScoredDocument]) -> String {
    hits.iter()
        .map(|hit| {
            let doc = &hit.document.document;
            format!("File Content for {}: {}\n\n", doc.metadata.file_path, doc.content)
        })
        .collect()
}

#[async_trait]
impl Tool for RetrievalTool {
    fn name(&self) -> &str {
        RETRIEVAL_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search the company policy documents, such as the social budget or business trip expenses. Returns the most relevant passages."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look up in the policy documents"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let output = self.retrieve(query).await?;
        Ok(ToolResult::ok(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policypilot_core::document::{Document, DocumentMetadata, EmbeddedDocument};
    use policypilot_core::error::ProviderError;
    use policypilot_memory::InMemoryDocumentStore;

    const KEYWORDS: [&str; 3] = ["budget", "travel", "lunch"];

    /// One dimension per keyword plus a constant bias.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn model(&self) -> &str {
            "keywords"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    let mut v: Vec<f32> = KEYWORDS
                        .iter()
                        .map(|k| t.matches(k).count() as f32)
                        .collect();
                    v.push(0.1);
                    v
                })
                .collect())
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn model(&self) -> &str {
            "broken"
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Err(ProviderError::Timeout(60))
        }
    }

    async fn seeded_store(chunks: &[(&str, &str)]) -> Arc<InMemoryDocumentStore> {
        let store = Arc::new(InMemoryDocumentStore::new());
        let texts: Vec<String> = chunks.iter().map(|(_, c)| c.to_string()).collect();
        let vectors = KeywordEmbedder.embed(&texts).await.unwrap();
        let docs = chunks
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, ((path, content), vector))| EmbeddedDocument {
                document: Document {
                    id: format!("chunk-{i}"),
                    content: content.to_string(),
                    metadata: DocumentMetadata {
                        file_path: path.to_string(),
                        chunk_index: i,
                        word_start: 0,
                        word_count: content.split_whitespace().count(),
                    },
                },
                vector,
            })
            .collect();
        store.insert(docs).await.unwrap();
        store
    }

    #[tokio::test]
    async fn formats_hits_in_rank_order() {
        let store = seeded_store(&[
            ("files/travel.md", "travel is booked by the office"),
            ("files/social.md", "the social budget budget is 50 EUR"),
            ("files/food.md", "team lunch counts against the budget"),
        ])
        .await;
        let tool = RetrievalTool::new(Arc::new(KeywordEmbedder), store, 2);

        let result = tool
            .execute(serde_json::json!({"query": "what is the budget"}))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(
            result.output,
            "File Content for files/social.md: the social budget budget is 50 EUR\n\n\
             File Content for files/food.md: team lunch counts against the budget\n\n"
        );
    }

    #[tokio::test]
    async fn repeated_queries_are_identical() {
        let store = seeded_store(&[
            ("a.md", "budget one"),
            ("b.md", "budget two"),
            ("c.md", "lunch"),
        ])
        .await;
        let tool = RetrievalTool::new(Arc::new(KeywordEmbedder), store, 10);
        let first = tool.retrieve("budget").await.unwrap();
        let second = tool.retrieve("budget").await.unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("File Content for a.md"));
    }

    #[tokio::test]
    async fn empty_store_returns_empty_string() {
        let tool = RetrievalTool::new(
            Arc::new(KeywordEmbedder),
            Arc::new(InMemoryDocumentStore::new()),
            5,
        );
        let result = tool
            .execute(serde_json::json!({"query": "budget"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "");
    }

    #[tokio::test]
    async fn missing_query_returns_error() {
        let tool = RetrievalTool::new(
            Arc::new(KeywordEmbedder),
            Arc::new(InMemoryDocumentStore::new()),
            5,
        );
        assert!(matches!(
            tool.execute(serde_json::json!({})).await,
            Err(ToolError::InvalidArguments(_))
        ));
        assert!(tool.execute(serde_json::json!({"query": "  "})).await.is_err());
    }

    #[tokio::test]
    async fn embedder_failure_is_execution_error() {
        let tool = RetrievalTool::new(
            Arc::new(BrokenEmbedder),
            Arc::new(InMemoryDocumentStore::new()),
            5,
        );
        let err = tool.retrieve("budget").await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn tool_definition() {
        let tool = RetrievalTool::new(
            Arc::new(KeywordEmbedder),
            Arc::new(InMemoryDocumentStore::new()),
            5,
        );
        let def = tool.to_definition();
        assert_eq!(def.name, "retrieval_tool");
        assert_eq!(def.parameters["required"], serde_json::json!(["query"]));
    }
}
