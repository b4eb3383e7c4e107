//! Startup ingestion: load sources, chunk them, embed the chunks and fill
//! the document store.
//!
//! Ingestion is all-or-nothing. Every source is loaded and chunked before
//! anything is embedded, and the store receives a single insert once every
//! chunk has a vector. Any failure aborts before the store is touched.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use policypilot_config::AppConfig;
use policypilot_core::document::{Document, DocumentStore, EmbeddedDocument, Embedder};
use policypilot_core::error::{Error, IngestionError};
use policypilot_core::event::{DomainEvent, EventBus};
use tracing::{debug, info, warn};

use crate::chunker::{chunk_document, WordWindow};
use crate::loader::{SourceDocument, SourceLoader};

/// Chunks embedded per embedder call.
const DEFAULT_BATCH_SIZE: usize = 64;

/// Summary of a completed ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionReport {
    pub sources: usize,
    pub chunks: usize,
    /// Vector length of the stored embeddings
    pub dimensions: usize,
}

pub struct IngestionPipeline {
    loader: SourceLoader,
    window: WordWindow,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn DocumentStore>,
    embed_timeout: Duration,
    batch_size: usize,
    events: Option<Arc<EventBus>>,
}

impl IngestionPipeline {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            loader: SourceLoader,
            window: WordWindow::default(),
            embedder,
            store,
            embed_timeout: Duration::from_secs(60),
            batch_size: DEFAULT_BATCH_SIZE,
            events: None,
        }
    }

    /// Build a pipeline with the chunk window and timeout from `config`.
    pub fn from_config(
        config: &AppConfig,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self, Error> {
        let window = WordWindow::new(config.ingestion.chunk_words, config.ingestion.overlap_words)?;
        Ok(Self::new(embedder, store)
            .with_window(window)
            .with_embed_timeout(Duration::from_secs(config.embedding.timeout_secs)))
    }

    pub fn with_window(mut self, window: WordWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Ingest the given source files.
    pub async fn run(&self, sources: &[PathBuf]) -> Result<IngestionReport, IngestionError> {
        let mut loaded = Vec::with_capacity(sources.len());
        for path in sources {
            loaded.push(self.loader.load(path).await?);
        }
        self.ingest_sources(loaded).await
    }

    /// Ingest sources that are already in memory.
    pub async fn ingest_sources(
        &self,
        sources: Vec<SourceDocument>,
    ) -> Result<IngestionReport, IngestionError> {
        let documents: Vec<Document> = sources
            .iter()
            .flat_map(|source| {
                let chunks = chunk_document(&source.file_path, &source.text, self.window);
                if chunks.is_empty() {
                    warn!(path = %source.file_path, "Source has no text");
                }
                chunks
            })
            .collect();

        if documents.is_empty() {
            return Err(IngestionError::EmptyCorpus);
        }

        let vectors = self.embed_all(&documents).await?;
        let dimensions = vectors.first().map(Vec::len).unwrap_or_default();

        let embedded: Vec<EmbeddedDocument> = documents
            .into_iter()
            .zip(vectors)
            .map(|(document, vector)| EmbeddedDocument { document, vector })
            .collect();
        let chunks = embedded.len();

        self.store
            .insert(embedded)
            .await
            .map_err(|e| IngestionError::Store(e.to_string()))?;

        let report = IngestionReport {
            sources: sources.len(),
            chunks,
            dimensions,
        };
        info!(
            sources = report.sources,
            chunks = report.chunks,
            dimensions = report.dimensions,
            model = %self.embedder.model(),
            store = %self.store.name(),
            "Ingestion complete"
        );

        if let Some(events) = &self.events {
            events.publish(DomainEvent::DocumentsIngested {
                sources: report.sources,
                chunks: report.chunks,
                timestamp: Utc::now(),
            });
        }

        Ok(report)
    }

    /// Embed every chunk in batches, one vector per chunk in chunk order.
    async fn embed_all(&self, documents: &[Document]) -> Result<Vec<Vec<f32>>, IngestionError> {
        let mut vectors = Vec::with_capacity(documents.len());

        for batch in documents.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
            let embedded = tokio::time::timeout(self.embed_timeout, self.embedder.embed(&texts))
                .await
                .map_err(|_| {
                    IngestionError::Embedding(format!(
                        "embedder did not answer within {}s",
                        self.embed_timeout.as_secs()
                    ))
                })?
                .map_err(|e| IngestionError::Embedding(e.to_string()))?;

            if embedded.len() != texts.len() {
                return Err(IngestionError::EmbeddingCountMismatch {
                    expected: texts.len(),
                    actual: embedded.len(),
                });
            }
            debug!(batch = texts.len(), done = vectors.len() + embedded.len(), "Embedded chunk batch");
            vectors.extend(embedded);
        }

        Ok(vectors)
    }
}
