//! Embedding backends.
//!
//! - [`ProviderEmbedder`]: any [`Provider`] with an embeddings endpoint.
//! - [`LocalEmbedder`]: all-MiniLM-L6-v2 via fastembed, behind the
//!   `local-embeddings` feature. No network calls after the model download.

use async_trait::async_trait;
use policypilot_core::error::ProviderError;
use policypilot_core::provider::{EmbeddingRequest, Provider};
use policypilot_core::Embedder;
use std::sync::Arc;
use tracing::debug;

/// Embeds text through a provider's embeddings endpoint.
pub struct ProviderEmbedder {
    provider: Arc<dyn Provider>,
    model: String,
    dimensions: usize,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            provider,
            model: model.into(),
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .provider
            .embed(EmbeddingRequest {
                model: self.model.clone(),
                inputs: texts.to_vec(),
            })
            .await?;

        check_vectors(&response.embeddings, texts.len(), self.dimensions)?;
        debug!(model = %self.model, count = texts.len(), "Embedded texts");
        Ok(response.embeddings)
    }
}

/// Reject responses with the wrong vector count or length.
fn check_vectors(vectors: &[Vec<f32>], expected: usize, dimensions: usize) -> Result<(), ProviderError> {
    if vectors.len() != expected {
        return Err(ProviderError::MalformedResponse(format!(
            "expected {expected} embeddings, got {}",
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
        return Err(ProviderError::MalformedResponse(format!(
            "expected {dimensions}-dimensional embeddings, got {}",
            bad.len()
        )));
    }
    Ok(())
}

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings")]
mod local {
    use super::*;
    use std::sync::Mutex;

    /// all-MiniLM-L6-v2 (384 dimensions) running in-process.
    ///
    /// The ONNX model is loaded once; inference runs on the blocking pool.
    pub struct LocalEmbedder {
        model: Arc<Mutex<fastembed::TextEmbedding>>,
        name: String,
    }

    impl LocalEmbedder {
        pub const DIMENSIONS: usize = 384;

        pub async fn load(name: &str) -> Result<Self, ProviderError> {
            let kind = match name.to_ascii_lowercase().as_str() {
                "all-minilm-l6-v2" | "sentence-transformers/all-minilm-l6-v2" => {
                    fastembed::EmbeddingModel::AllMiniLML6V2
                }
                other => {
                    return Err(ProviderError::ModelNotFound(format!(
                        "unsupported local embedding model: {other}"
                    )));
                }
            };

            let model = tokio::task::spawn_blocking(move || {
                fastembed::TextEmbedding::try_new(fastembed::InitOptions::new(kind))
            })
            .await
            .map_err(|e| ProviderError::NotConfigured(e.to_string()))?
            .map_err(|e| {
                ProviderError::NotConfigured(format!("failed to load local embedding model: {e}"))
            })?;

            Ok(Self {
                model: Arc::new(Mutex::new(model)),
                name: name.to_string(),
            })
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model(&self) -> &str {
            &self.name
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }

            let model = Arc::clone(&self.model);
            let inputs = texts.to_vec();
            let expected = inputs.len();

            let vectors = tokio::task::spawn_blocking(move || {
                let mut model = model
                    .lock()
                    .map_err(|_| ProviderError::NotConfigured("local embedding model poisoned".into()))?;
                model
                    .embed(inputs, None)
                    .map_err(|e| ProviderError::MalformedResponse(format!("local embedding failed: {e}")))
            })
            .await
            .map_err(|e| ProviderError::StreamInterrupted(e.to_string()))??;

            check_vectors(&vectors, expected, Self::DIMENSIONS)?;
            Ok(vectors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policypilot_core::provider::{EmbeddingResponse, ProviderRequest, ProviderResponse};

    /// Returns `[len, 1.0, 0.0]` per input.
    struct LengthProvider {
        drop_last: bool,
    }

    #[async_trait]
    impl Provider for LengthProvider {
        fn name(&self) -> &str {
            "length"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::NotConfigured("chat".into()))
        }

        async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
            let mut embeddings: Vec<Vec<f32>> = request
                .inputs
                .iter()
                .map(|t| vec![t.len() as f32, 1.0, 0.0])
                .collect();
            if self.drop_last {
                embeddings.pop();
            }
            Ok(EmbeddingResponse {
                embeddings,
                model: request.model,
                usage: None,
            })
        }
    }

    #[tokio::test]
    async fn provider_embedder_returns_one_vector_per_text() {
        let embedder = ProviderEmbedder::new(Arc::new(LengthProvider { drop_last: false }), "m", 3);
        let vectors = embedder
            .embed(&["ab".to_string(), "abcd".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![2.0, 1.0, 0.0], vec![4.0, 1.0, 0.0]]);
        assert_eq!(embedder.embed_one("xyz").await.unwrap()[0], 3.0);
    }

    #[tokio::test]
    async fn provider_embedder_rejects_missing_vectors() {
        let embedder = ProviderEmbedder::new(Arc::new(LengthProvider { drop_last: true }), "m", 3);
        let err = embedder.embed(&["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn provider_embedder_rejects_wrong_dimensions() {
        let embedder = ProviderEmbedder::new(Arc::new(LengthProvider { drop_last: false }), "m", 384);
        let err = embedder.embed(&["a".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("384"));
    }

    #[tokio::test]
    async fn empty_input_skips_the_provider() {
        let embedder = ProviderEmbedder::new(Arc::new(LengthProvider { drop_last: true }), "m", 3);
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
    }
}
