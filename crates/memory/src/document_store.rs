//! In-memory document store filled once by ingestion.

use async_trait::async_trait;
use policypilot_core::document::{DocumentStore, EmbeddedDocument, ScoredDocument};
use policypilot_core::error::MemoryError;
use tokio::sync::RwLock;
use tracing::debug;

use crate::vector::rank_by_similarity;

/// Stores embedded chunks in a Vec and searches them by brute-force cosine
/// similarity. All vectors must share the dimension of the first insert.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<Vec<EmbeddedDocument>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dimension of the stored vectors, if any are stored.
    pub async fn dimensions(&self) -> Option<usize> {
        self.documents.read().await.first().map(|d| d.vector.len())
    }
}

fn check_dimension(expected: Option<usize>, actual: usize) -> Result<(), MemoryError> {
    match expected {
        Some(expected) if expected != actual => {
            Err(MemoryError::DimensionMismatch { expected, actual })
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn insert(&self, documents: Vec<EmbeddedDocument>) -> Result<(), MemoryError> {
        let mut stored = self.documents.write().await;

        // Validate the whole batch before touching the store
        let mut expected = stored.first().map(|d| d.vector.len());
        for doc in &documents {
            if doc.vector.is_empty() {
                return Err(MemoryError::EmbeddingFailed(format!(
                    "document {} has an empty vector",
                    doc.document.id
                )));
            }
            check_dimension(expected, doc.vector.len())?;
            expected = Some(doc.vector.len());
        }

        debug!(count = documents.len(), "Inserting documents");
        stored.extend(documents);
        Ok(())
    }

    async fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<ScoredDocument>, MemoryError> {
        let stored = self.documents.read().await;
        check_dimension(stored.first().map(|d| d.vector.len()), query_vector.len())?;
        Ok(rank_by_similarity(&stored, query_vector, top_k))
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        Ok(self.documents.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policypilot_core::document::{Document, DocumentMetadata};

    fn doc(id: &str, vector: Vec<f32>) -> EmbeddedDocument {
        EmbeddedDocument {
            document: Document {
                id: id.into(),
                content: id.into(),
                metadata: DocumentMetadata {
                    file_path: "policy.md".into(),
                    chunk_index: 0,
                    word_start: 0,
                    word_count: 1,
                },
            },
            vector,
        }
    }

    #[tokio::test]
    async fn insert_and_search() {
        let store = InMemoryDocumentStore::new();
        store
            .insert(vec![doc("x", vec![1.0, 0.0]), doc("y", vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.dimensions().await, Some(2));

        let hits = store.search(&[0.1, 0.9], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.document.id, "y");
    }

    #[tokio::test]
    async fn search_empty_store_returns_nothing() {
        let store = InMemoryDocumentStore::new();
        assert!(store.search(&[1.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_search_is_identical() {
        let store = InMemoryDocumentStore::new();
        store
            .insert((0..20).map(|i| doc(&i.to_string(), vec![1.0, (i % 4) as f32])).collect())
            .await
            .unwrap();
        let first = store.search(&[1.0, 1.0], 7).await.unwrap();
        let second = store.search(&[1.0, 1.0], 7).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn mixed_dimensions_rejected_atomically() {
        let store = InMemoryDocumentStore::new();
        let err = store
            .insert(vec![doc("a", vec![1.0, 0.0]), doc("b", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MemoryError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn query_dimension_must_match() {
        let store = InMemoryDocumentStore::new();
        store.insert(vec![doc("a", vec![1.0, 0.0])]).await.unwrap();
        assert!(store.search(&[1.0, 0.0, 0.0], 3).await.is_err());
    }

    #[tokio::test]
    async fn empty_vectors_rejected() {
        let store = InMemoryDocumentStore::new();
        let err = store.insert(vec![doc("a", vec![])]).await.unwrap_err();
        assert!(matches!(err, MemoryError::EmbeddingFailed(_)));
    }
}
