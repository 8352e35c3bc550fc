//! Error types for the orchestration engine.

use forge_build::BuildToolError;
use forge_llm::LlmError;
use forge_memory::MemoryError;
use thiserror::Error;
use uuid::Uuid;

use crate::model::VersionId;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while orchestrating generation.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Reasoning service failed during {stage}: {source}")]
    Service {
        stage: String,
        #[source]
        source: LlmError,
    },

    #[error("Stage {stage} returned an unusable reply: {message}")]
    Contract { stage: String, message: String },

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Option {option} not found in session {session}")]
    OptionNotFound { session: Uuid, option: String },

    #[error("Version {version} not found in project {project}")]
    VersionNotFound { project: String, version: VersionId },

    #[error("Project {0} has no current version")]
    NoCurrentVersion(String),

    #[error("Invalid session state for {operation}: current={current}, expected={expected}")]
    InvalidState {
        operation: String,
        current: String,
        expected: String,
    },

    #[error("No cached preview to fix: {0}")]
    PreviewMissing(String),

    #[error("Max fix attempts reached for {key} ({attempts})")]
    FixLimitReached { key: String, attempts: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Build tooling error: {0}")]
    Build(#[from] BuildToolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure classes callers act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The reasoning service could not be reached or refused the call.
    Transport,
    /// A reply arrived but did not fit the stage contract.
    Contract,
    /// The request referenced something missing or not allowed now.
    Domain,
    /// A fix ceiling was reached.
    Exhausted,
    /// Local I/O, serialization or configuration trouble.
    Internal,
}

impl EngineError {
    pub fn service(stage: impl Into<String>, source: LlmError) -> Self {
        Self::Service {
            stage: stage.into(),
            source,
        }
    }

    pub fn contract(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Contract {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Service { source, .. } if source.is_transport() => ErrorKind::Transport,
            Self::Service { .. } | Self::Contract { .. } => ErrorKind::Contract,
            Self::ProjectNotFound(_)
            | Self::SessionNotFound(_)
            | Self::OptionNotFound { .. }
            | Self::VersionNotFound { .. }
            | Self::NoCurrentVersion(_)
            | Self::InvalidState { .. }
            | Self::PreviewMissing(_)
            | Self::Memory(MemoryError::InvalidProject(_)) => ErrorKind::Domain,
            Self::FixLimitReached { .. } => ErrorKind::Exhausted,
            Self::Config(_)
            | Self::Memory(_)
            | Self::Build(_)
            | Self::Io(_)
            | Self::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller, not the system, is at fault.
    pub fn is_client_fault(&self) -> bool {
        matches!(self.kind(), ErrorKind::Domain | ErrorKind::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_errors_split_by_cause() {
        let transport = EngineError::service("B:branches", LlmError::Network("reset".into()));
        assert_eq!(transport.kind(), ErrorKind::Transport);

        let malformed = EngineError::service("B:branches", LlmError::MalformedJson("eof".into()));
        assert_eq!(malformed.kind(), ErrorKind::Contract);
        assert!(!malformed.is_client_fault());
    }

    #[test]
    fn test_client_faults() {
        assert!(EngineError::SessionNotFound(Uuid::new_v4()).is_client_fault());
        assert!(EngineError::FixLimitReached {
            key: "preview:x:opt_1".into(),
            attempts: 2
        }
        .is_client_fault());
        assert!(EngineError::Memory(MemoryError::InvalidProject("..".into())).is_client_fault());
        assert!(!EngineError::Config("bad".into()).is_client_fault());
    }
}
