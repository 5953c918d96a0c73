//! Error types for the ESG assessment orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Agent Loop Errors
    // =============================

    #[error("Tool not found: {0}")]
    UnknownTool(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("Model transport failure: {0}")]
    TransportFailure(String),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Malformed reviewer output: {0}")]
    MalformedReviewerOutput(String),

    // =============================
    // Collaborators & Setup
    // =============================

    #[error("Industry classification error: {0}")]
    Classification(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Audit error: {0}")]
    Audit(String),

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
