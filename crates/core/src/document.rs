//! Document chunks, the embedding capability and the document store contract.
//!
//! Documents are produced once by ingestion and never modified afterwards.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, ProviderError};

/// Where a chunk came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Source path as configured
    pub file_path: String,

    /// Zero-based position of the chunk within its source
    pub chunk_index: usize,

    /// Index of the chunk's first word within the source's word sequence
    pub word_start: usize,

    pub word_count: usize,
}

/// A chunk of a source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// A document together with its embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedDocument {
    pub document: Document,
    pub vector: Vec<f32>,
}

/// A search hit with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: EmbeddedDocument,
    pub score: f32,
}

/// Maps text to fixed-length vectors.
///
/// Implementations must return exactly one vector per input, in input order,
/// and be deterministic for a given model and input.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// The embedding model name (e.g., "all-MiniLM-L6-v2").
    fn model(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("embedder returned no vector".into()))
    }
}

/// Holds embedded chunks and answers similarity queries.
///
/// Writes happen only during ingestion, before any search.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn name(&self) -> &str;

    async fn insert(&self, documents: Vec<EmbeddedDocument>) -> Result<(), MemoryError>;

    /// The `top_k` most similar documents, most similar first.
    async fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<ScoredDocument>, MemoryError>;

    async fn count(&self) -> Result<usize, MemoryError>;
}
