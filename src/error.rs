//! Error types for the banking support agent

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, SupportError>;

#[derive(Error, Debug)]
pub enum SupportError {

    // =============================
    // Per-call Errors
    // =============================

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Not initialized: {0}")]
    NotInitialized(String),

    #[error("Knowledge load error: {0}")]
    KnowledgeLoadError(String),

    // =============================
    // Session Errors
    // =============================

    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
