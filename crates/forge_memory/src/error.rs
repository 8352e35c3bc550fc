//! Error types for the memory subsystem.

use thiserror::Error;

/// Result type alias for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Errors that can occur while storing or retrieving memory.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Invalid project id: {0}")]
    InvalidProject(String),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] forge_llm::LlmError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
