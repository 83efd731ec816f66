use thiserror::Error;

/// Failures surfaced by pipeline stages.
///
/// Per-item failures are logged and absorbed by the stage that owns the batch,
/// so these mostly travel inside a stage or end up in a report.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("source {source_name} unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("model call failed after {attempts} attempt(s): {reason}")]
    ModelCall { attempts: u32, reason: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("delivery to {recipient} failed: {reason}")]
    Delivery { recipient: String, reason: String },
}

/// Enrichment of a single article failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnrichmentError {
    #[error("model call failed after {attempts} attempt(s): {reason}")]
    ModelCall { attempts: u32, reason: String },

    #[error("malformed model output: {0}")]
    Malformed(String),
}

impl From<EnrichmentError> for PipelineError {
    fn from(err: EnrichmentError) -> Self {
        match err {
            EnrichmentError::ModelCall { attempts, reason } => PipelineError::ModelCall { attempts, reason },
            EnrichmentError::Malformed(msg) => PipelineError::Parse(msg),
        }
    }
}
