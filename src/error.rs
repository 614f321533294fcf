//! Error types for the photon-analysis pipeline

use thiserror::Error;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Fatal at job initialization, before any event is processed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A required per-event input collection is absent. The event is
    /// discarded; no state has been mutated.
    #[error("Missing input data: {0}")]
    MissingInput(&'static str),

    #[error("Malformed status map (line {line}): {reason}")]
    StatusMapFormat { line: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
