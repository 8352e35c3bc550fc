//! # forge_memory - Project memory for Playforge
//!
//! Notes written by explorations and builds, per-project preference
//! records, and the retrieval paths that feed them back into prompts:
//!
//! - **MemoryRetriever**: vector search with a character budget, memory
//!   context for option biasing, cross-project feel profiles
//! - **MemorySearchTool**: the `search_memory` tool for tool-enabled stages
//! - **MemoryStore**: file-backed and in-memory note storage

pub mod error;
pub mod note;
pub mod profile;
pub mod retrieval;
pub mod store;
pub mod tool;

pub use error::{MemoryError, MemoryResult};
pub use note::{
    extract_tags, FinalChoice, MemoryNote, NoteContent, NoteKind, PreferenceMap, UserPreference,
};
pub use profile::{aggregate_user_feel_profile, FeelProfile, TuningTendencies};
pub use retrieval::{MemoryContext, MemoryRetriever, RetrievalSettings};
pub use store::{validate_project_id, FileMemoryStore, InMemoryMemoryStore, MemoryStore};
pub use tool::{MemorySearchTool, NO_MEMORIES, SEARCH_MEMORY_TOOL};
