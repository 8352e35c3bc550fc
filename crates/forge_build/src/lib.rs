//! # forge_build - Artifact validation for Playforge
//!
//! Generated artifacts are plain file maps. This crate checks them for
//! structural and reference integrity, applies builder file operations and
//! moves file maps between memory and disk.

pub mod error;
pub mod files;
pub mod result;
pub mod validator;

pub use error::{BuildToolError, BuildToolResult};
pub use files::{
    apply_file_ops, content_type_for, from_artifact_files, normalize_path, read_file_map,
    to_artifact_files, write_file_map, ArtifactFile, FileMap, FileOp,
};
pub use result::BuildResult;
pub use validator::{check_structure, is_html, BuildValidator, OfflineRule, ROOT_DOCUMENT};
