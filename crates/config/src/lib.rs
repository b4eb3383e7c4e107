//! Configuration loading, validation, and management for PolicyPilot.
//!
//! Loads configuration from `~/.policypilot/config.toml` (or an explicit path)
//! with environment variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.policypilot/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub ingestion: IngestionConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub reimbursement: ReimbursementConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("providers", &self.providers)
            .field("embedding", &self.embedding)
            .field("ingestion", &self.ingestion)
            .field("retrieval", &self.retrieval)
            .field("agent", &self.agent)
            .field("reimbursement", &self.reimbursement)
            .finish()
    }
}

/// Per-provider endpoint settings.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// Which embedding backend maps text to vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "openai" (remote `/embeddings` endpoint) or "local" (all-MiniLM-L6-v2,
    /// 384 dimensions, needs the `local-embeddings` feature)
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Expected vector length
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

fn default_embedding_provider() -> String {
    "openai".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_embedding_dimensions() -> usize {
    1536
}
fn default_embedding_timeout() -> u64 {
    60
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

/// Source documents and chunking windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_sources")]
    pub sources: Vec<PathBuf>,

    #[serde(default = "default_chunk_words")]
    pub chunk_words: usize,

    #[serde(default = "default_overlap_words")]
    pub overlap_words: usize,
}

fn default_sources() -> Vec<PathBuf> {
    vec![PathBuf::from("files/social_budget_policy.md")]
}
fn default_chunk_words() -> usize {
    150
}
fn default_overlap_words() -> usize {
    50
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            chunk_words: default_chunk_words(),
            overlap_words: default_overlap_words(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of chunks returned per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    10
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

/// Agent loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Maximum model calls per request before a forced stop
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    #[serde(default = "default_model_timeout")]
    pub model_timeout_secs: u64,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Dispatch the tool calls of one round concurrently
    #[serde(default = "default_true")]
    pub parallel_tool_calls: bool,
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a helpful company policy assistant. You answer employee questions about internal policies \
and help them submit reimbursement requests.

You have access to two tools:
- retrieval_tool: searches the company policy documents. Use it whenever a question concerns a \
policy, a budget or an allowance, and answer from the content it returns.
- send_reimbursement: submits a reimbursement request with an amount, a currency (eur or usd) \
and a short description.

Briefly explain your reasoning before giving the answer. If the user's request is missing \
information you need, such as the amount, the currency or what the expense was for, ask a \
follow-up question instead of guessing. If the user attaches an image, such as a receipt, use \
what you can read from it.";

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.into()
}
fn default_max_rounds() -> usize {
    10
}
fn default_model_timeout() -> u64 {
    120
}
fn default_tool_timeout() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_rounds: default_max_rounds(),
            model_timeout_secs: default_model_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            parallel_tool_calls: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReimbursementConfig {
    /// Largest amount that is accepted
    #[serde(default = "default_reimbursement_limit")]
    pub limit: f64,
}

fn default_reimbursement_limit() -> f64 {
    10.0
}

impl Default for ReimbursementConfig {
    fn default() -> Self {
        Self {
            limit: default_reimbursement_limit(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.policypilot/config.toml).
    ///
    /// Environment variables override the file:
    /// - `POLICYPILOT_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `POLICYPILOT_PROVIDER`, `POLICYPILOT_MODEL`, `POLICYPILOT_API_URL`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply environment overrides and validate.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("POLICYPILOT_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }

        if let Some(provider) = lookup("POLICYPILOT_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("POLICYPILOT_MODEL") {
            self.default_model = model;
        }

        if let Some(url) = lookup("POLICYPILOT_API_URL") {
            self.providers
                .entry(self.default_provider.clone())
                .or_default()
                .api_url = Some(url);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".policypilot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::ValidationError(msg.into()));

        if !(0.0..=2.0).contains(&self.default_temperature) {
            return fail("default_temperature must be between 0.0 and 2.0");
        }
        if self.ingestion.sources.is_empty() {
            return fail("ingestion.sources must name at least one document");
        }
        if self.ingestion.chunk_words == 0 {
            return fail("ingestion.chunk_words must be > 0");
        }
        if self.ingestion.overlap_words >= self.ingestion.chunk_words {
            return fail("ingestion.overlap_words must be smaller than chunk_words");
        }
        if self.retrieval.top_k == 0 {
            return fail("retrieval.top_k must be > 0");
        }
        if self.agent.max_rounds == 0 {
            return fail("agent.max_rounds must be > 0");
        }
        if self.agent.model_timeout_secs == 0
            || self.agent.tool_timeout_secs == 0
            || self.embedding.timeout_secs == 0
        {
            return fail("timeouts must be > 0");
        }
        if self.embedding.dimensions == 0 {
            return fail("embedding.dimensions must be > 0");
        }
        if !self.reimbursement.limit.is_finite() || self.reimbursement.limit <= 0.0 {
            return fail("reimbursement.limit must be a positive number");
        }
        match self.embedding.provider.as_str() {
            "openai" | "local" => {}
            _ => return fail("embedding.provider must be \"openai\" or \"local\""),
        }

        Ok(())
    }

    /// The API key for `provider`, falling back to the global key.
    pub fn api_key_for(&self, provider: &str) -> Option<&str> {
        self.providers
            .get(provider)
            .and_then(|p| p.api_key.as_deref())
            .or(self.api_key.as_deref())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key_for(&self.default_provider).is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        Self::default().to_toml()
    }

    /// Render as TOML with every API key removed.
    pub fn to_redacted_toml(&self) -> String {
        let mut copy = self.clone();
        copy.api_key = copy.api_key.map(|_| "[REDACTED]".into());
        for provider in copy.providers.values_mut() {
            provider.api_key = provider.api_key.take().map(|_| "[REDACTED]".into());
        }
        copy.to_toml()
    }

    fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            providers: HashMap::new(),
            embedding: EmbeddingConfig::default(),
            ingestion: IngestionConfig::default(),
            retrieval: RetrievalConfig::default(),
            agent: AgentSettings::default(),
            reimbursement: ReimbursementConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for policypilot_core::Error {
    fn from(err: ConfigError) -> Self {
        policypilot_core::Error::Config {
            message: err.to_string(),
        }
    }
}
