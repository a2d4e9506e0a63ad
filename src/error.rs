//! Error types for the advisory decision core

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {

    // =============================
    // Pipeline Taxonomy
    // =============================

    #[error("Admission error: {0}")]
    AdmissionError(String),

    #[error("Extraction error: {0}")]
    ExtractionError(String),

    #[error("Routing error: {0}")]
    RoutingError(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidToolArgs(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Synthesis error: {0}")]
    SynthesisError(String),

    #[error("Grounding violation: {0}")]
    GroundingViolation(String),

    #[error("Inference error: {0}")]
    InferenceError(String),

    #[error("Knowledge base error: {0}")]
    KnowledgeError(String),

    #[error("Audit error: {0}")]
    AuditError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
