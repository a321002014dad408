//! Error types for Memoria

use thiserror::Error;

/// Result type alias for Memoria operations
pub type Result<T> = std::result::Result<T, MemoriaError>;

/// Main error type for Memoria
#[derive(Error, Debug)]
pub enum MemoriaError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Memory not found: {0}")]
    NotFound(i64),

    #[error("Topic not found: {0}")]
    TopicNotFound(i64),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MemoriaError {
    /// True for errors that map to a missing resource rather than a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MemoriaError::NotFound(_) | MemoriaError::TopicNotFound(_)
        )
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, MemoriaError::Http(_) | MemoriaError::Embedding(_))
    }
}
