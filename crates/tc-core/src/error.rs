//! Error types for track-counting tagging

use thiserror::Error;

/// Tagging error type.
///
/// Every variant aborts the run.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration does not match the input schema, or the classifier resource
    /// could not be loaded.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Event content violates a structural invariant (bad jet range, ragged columns).
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// Classifier failed while scoring a track.
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// Columnar store (Arrow / Parquet) read or write failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
