//! Error types for clip-worker

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Discovery error: {0}")]
    DiscoveryError(String),

    #[error("Media error: {0}")]
    MediaError(String),

    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Task timeout")]
    TaskTimeout,
}

pub type Result<T> = std::result::Result<T, WorkerError>;
