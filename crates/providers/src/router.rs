//! Provider selection: builds the chat and embedding backends from config.

use std::sync::Arc;

use policypilot_config::AppConfig;
use policypilot_core::error::ProviderError;
use policypilot_core::provider::Provider;
use policypilot_core::Embedder;
use tracing::info;

use crate::embedding::ProviderEmbedder;
use crate::openai_compat::OpenAiCompatProvider;

/// Build an OpenAI-compatible provider for `name` from its config entry.
pub fn build_provider(config: &AppConfig, name: &str) -> Arc<dyn Provider> {
    let provider_config = config.providers.get(name);
    let api_key = config.api_key_for(name).unwrap_or_default();
    let base_url = provider_config
        .and_then(|p| p.api_url.clone())
        .unwrap_or_else(|| default_base_url(name));

    Arc::new(OpenAiCompatProvider::new(name, base_url, api_key))
}

/// The chat model backend and the model name to request from it.
pub fn build_chat_provider(config: &AppConfig) -> (Arc<dyn Provider>, String) {
    let name = &config.default_provider;
    let model = config
        .providers
        .get(name)
        .and_then(|p| p.default_model.clone())
        .unwrap_or_else(|| config.default_model.clone());

    info!(provider = %name, model = %model, "Using chat provider");
    (build_provider(config, name), model)
}

/// The embedding backend selected by `[embedding].provider`.
pub async fn build_embedder(config: &AppConfig) -> Result<Arc<dyn Embedder>, ProviderError> {
    let settings = &config.embedding;
    match settings.provider.as_str() {
        "openai" => {
            let provider = build_provider(config, "openai");
            Ok(Arc::new(ProviderEmbedder::new(
                provider,
                settings.model.clone(),
                settings.dimensions,
            )))
        }
        #[cfg(feature = "local-embeddings")]
        "local" => {
            let embedder = crate::embedding::LocalEmbedder::load(&settings.model).await?;
            if settings.dimensions != crate::embedding::LocalEmbedder::DIMENSIONS {
                return Err(ProviderError::NotConfigured(format!(
                    "local model produces {} dimensions, config expects {}",
                    crate::embedding::LocalEmbedder::DIMENSIONS,
                    settings.dimensions
                )));
            }
            Ok(Arc::new(embedder))
        }
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(ProviderError::NotConfigured(
            "local embeddings require building with --features local-embeddings".into(),
        )),
        other => Err(ProviderError::NotConfigured(format!(
            "unknown embedding provider: {other}"
        ))),
    }
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openai" => "https://api.openai.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => "https://api.openai.com/v1".into(),
    }
}
