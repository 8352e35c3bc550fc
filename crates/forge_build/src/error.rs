//! Error types for build tooling.

use thiserror::Error;

/// Result type alias for build tooling operations.
pub type BuildToolResult<T> = Result<T, BuildToolError>;

/// Errors raised while reading, writing or checking artifact files.
#[derive(Error, Debug)]
pub enum BuildToolError {
    #[error("Invalid artifact path: {0}")]
    InvalidPath(String),

    #[error("Invalid rule {rule}: {message}")]
    InvalidRule { rule: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
