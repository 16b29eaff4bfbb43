//! Error types for the SHGAT engine

use thiserror::Error;

/// Main error type for the shgat crate
#[derive(Error, Debug)]
pub enum ShgatError {
    /// IO related errors
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Invalid input provided to a function
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Item not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Training related errors
    #[error("Training error: {0}")]
    TrainingError(String),

    /// Generic error with custom message
    #[error("Error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for ShgatError {
    fn from(error: serde_json::Error) -> Self {
        ShgatError::Serialization {
            source: Box::new(error),
        }
    }
}

impl From<anyhow::Error> for ShgatError {
    fn from(error: anyhow::Error) -> Self {
        ShgatError::Other(format!("Anyhow error: {}", error))
    }
}

/// Result type for the shgat crate
pub type Result<T> = std::result::Result<T, ShgatError>;
