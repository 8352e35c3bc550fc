//! Artifact file maps and file operations.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{BuildToolError, BuildToolResult};

/// Relative path to full file content. Ordered so versions and prompts
/// list files deterministically.
pub type FileMap = BTreeMap<String, String>;

/// One file mutation requested by a builder or fixer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FileOp {
    Write { file_path: String, content: String },
    Delete { file_path: String },
}

impl FileOp {
    pub fn path(&self) -> &str {
        match self {
            Self::Write { file_path, .. } | Self::Delete { file_path } => file_path,
        }
    }
}

/// A persisted file of a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub path: String,
    pub content: String,
    pub content_type: String,
}

impl ArtifactFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let content_type = content_type_for(&path).to_string();
        Self {
            path,
            content: content.into(),
            content_type,
        }
    }
}

/// Mime type by file extension; anything unknown is plain text.
pub fn content_type_for(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "application/javascript",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        _ => "text/plain",
    }
}

/// Normalize a relative artifact path. Leading `./` and `/` are dropped,
/// backslashes become slashes; parent-directory components are rejected.
pub fn normalize_path(path: &str) -> BuildToolResult<String> {
    let unified = path.trim().replace('\\', "/");
    let trimmed = unified.trim_start_matches("./").trim_start_matches('/');

    if trimmed.is_empty() {
        return Err(BuildToolError::InvalidPath(path.to_string()));
    }
    if Path::new(trimmed)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(BuildToolError::InvalidPath(path.to_string()));
    }

    Ok(trimmed.to_string())
}

/// Apply mutations in order. Returns the paths that changed.
pub fn apply_file_ops(files: &mut FileMap, ops: &[FileOp]) -> BuildToolResult<Vec<String>> {
    let mut touched = Vec::with_capacity(ops.len());
    for op in ops {
        let path = normalize_path(op.path())?;
        match op {
            FileOp::Write { content, .. } => {
                files.insert(path.clone(), content.clone());
            }
            FileOp::Delete { .. } => {
                files.remove(&path);
            }
        }
        touched.push(path);
    }
    Ok(touched)
}

/// Convert a file map into persisted version files.
pub fn to_artifact_files(files: &FileMap) -> Vec<ArtifactFile> {
    files
        .iter()
        .map(|(path, content)| ArtifactFile::new(path.clone(), content.clone()))
        .collect()
}

/// Convert version files back into a file map.
pub fn from_artifact_files(files: &[ArtifactFile]) -> FileMap {
    files
        .iter()
        .map(|f| (f.path.clone(), f.content.clone()))
        .collect()
}

/// Read every UTF-8 file under `dir` into a map keyed by relative path.
pub fn read_file_map(dir: &Path) -> BuildToolResult<FileMap> {
    let mut files = FileMap::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let relative = match entry.path().strip_prefix(dir) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        match fs::read_to_string(entry.path()) {
            Ok(content) => {
                files.insert(key, content);
            }
            Err(e) => debug!("Skipping unreadable file {:?}: {}", entry.path(), e),
        }
    }

    Ok(files)
}

/// Write a file map under `dir`, creating parent directories.
pub fn write_file_map(dir: &Path, files: &FileMap) -> BuildToolResult<()> {
    fs::create_dir_all(dir)?;
    for (path, content) in files {
        let relative = normalize_path(path)?;
        let target = dir.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)?;
        debug!("Wrote: {}", relative);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("index.html"), "text/html");
        assert_eq!(content_type_for("css/style.CSS"), "text/css");
        assert_eq!(content_type_for("game.js"), "application/javascript");
        assert_eq!(content_type_for("data.json"), "application/json");
        assert_eq!(content_type_for("logo.svg"), "image/svg+xml");
        assert_eq!(content_type_for("README"), "text/plain");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./js/game.js").unwrap(), "js/game.js");
        assert_eq!(normalize_path("/index.html").unwrap(), "index.html");
        assert_eq!(normalize_path("js\\util.js").unwrap(), "js/util.js");
        assert!(normalize_path("../secret").is_err());
        assert!(normalize_path("  ").is_err());
    }

    #[test]
    fn test_apply_file_ops() {
        let mut files = FileMap::new();
        files.insert("index.html".into(), "<html>".into());
        files.insert("old.js".into(), "x".into());

        let ops = vec![
            FileOp::Write {
                file_path: "./game.js".into(),
                content: "let y;".into(),
            },
            FileOp::Delete {
                file_path: "old.js".into(),
            },
        ];
        let touched = apply_file_ops(&mut files, &ops).unwrap();

        assert_eq!(touched, vec!["game.js", "old.js"]);
        assert!(files.contains_key("game.js"));
        assert!(!files.contains_key("old.js"));
    }

    #[test]
    fn test_file_op_serde_tag() {
        let op: FileOp = serde_json::from_str(
            r#"{"action": "write", "file_path": "index.html", "content": "<html>"}"#,
        )
        .unwrap();
        assert_eq!(op.path(), "index.html");

        let json = serde_json::to_value(FileOp::Delete {
            file_path: "a.js".into(),
        })
        .unwrap();
        assert_eq!(json["action"], "delete");
    }
}
