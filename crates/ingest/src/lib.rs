//! Startup ingestion for PolicyPilot.
//!
//! Policy files are read once at startup, reduced to plain text, cut into
//! overlapping word windows and embedded into the document store that the
//! retrieval tool searches.

pub mod chunker;
pub mod loader;
pub mod pipeline;

pub use chunker::{chunk_document, WordWindow};
pub use loader::{markdown_to_text, SourceDocument, SourceLoader};
pub use pipeline::{IngestionPipeline, IngestionReport};
