//! `policypilot ingest`: index the policy sources without starting the agent.

use std::path::Path;
use std::sync::Arc;

use policypilot_core::DocumentStore;
use policypilot_ingest::IngestionPipeline;
use policypilot_memory::InMemoryDocumentStore;
use policypilot_providers::build_embedder;

use super::{load_config, CommandResult};

pub async fn run(config_path: Option<&Path>) -> CommandResult {
    let config = load_config(config_path)?;
    let embedder = build_embedder(&config).await?;
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());

    let report = IngestionPipeline::from_config(&config, embedder, store)?
        .run(&config.ingestion.sources)
        .await?;

    println!("Ingested {} source(s):", report.sources);
    for source in &config.ingestion.sources {
        println!("  {}", source.display());
    }
    println!(
        "Chunks:     {} ({} words, {} overlap)",
        report.chunks, config.ingestion.chunk_words, config.ingestion.overlap_words
    );
    println!("Dimensions: {}", report.dimensions);
    Ok(())
}
