//! # forge_engine - Generation orchestration for Playforge
//!
//! Turns a natural-language game request into playable artifacts:
//!
//! - **Stage pipeline**: Decompose, Branch, Map, Feel-Spec, Generate, Iterate
//!   and Finish, each bound to a JSON contract with an explicit fallback
//! - **Exploration sessions**: `explore_options -> committed -> iterating ->
//!   stable`, one operation per session at a time
//! - **Repair loops**: the bounded build-fix loop and the preview
//!   runtime-fix loop
//! - **Preview cache**: TTL-bound generated previews per (session, option)
//! - **Chat orchestrator**: Intent, Plan, Build, Validate/Fix with streamed
//!   progress events, serialized per project
//! - **Persistence**: projects, versions, sessions, chat logs and cache
//!   entries under `<workspace>/.forge`
//!
//! [`Engine`] is the entry point.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod exploration;
pub mod feel;
pub mod locks;
pub mod model;
pub mod orchestrator;
pub mod persistence;
pub mod preview;
pub mod repair;
pub mod stages;

pub use config::{EngineConfig, Limits};
pub use engine::{Engine, EngineContext};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use events::{ProgressEvent, ProgressSink};
pub use exploration::{
    ActiveSession, ExploreOutcome, FinishOutcome, IterateOutcome, SelectOutcome, SessionManager,
};
pub use feel::Archetype;
pub use model::{
    Branch, BuildStatus, ChatTurn, Decomposition, ExplorationOption, ExplorationSession,
    HypothesisLedger, Project, RuntimeErrorReport, SessionState, Version, VersionId,
    VersionSummary,
};
pub use orchestrator::ChatOrchestrator;
pub use persistence::WorkspaceStore;
pub use preview::{PreviewCache, PreviewOutcome};
pub use repair::{build_fix_loop, RepairOutcome};
pub use stages::StagePipeline;
