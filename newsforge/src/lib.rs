// Library interface for newsforge modules
// This allows tests and the binary to import modules

pub mod error;
pub mod retry;
pub mod models;
pub mod sources;
pub mod ingestion;
pub mod newsapi;
pub mod dedupe;
pub mod filter;
pub mod llm;
pub mod enrich;
pub mod curate;
pub mod publish;
pub mod artifacts;
pub mod pipeline;

pub use error::{EnrichmentError, PipelineError};
pub use models::{Audience, ContentType, EnrichedArticle, RawArticle, SelectionResult};
