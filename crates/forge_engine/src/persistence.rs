//! Workspace persistence.
//!
//! Everything lives under the workspace's `.forge/` directory:
//!
//! ```text
//! .forge/
//! ├── config.toml
//! ├── projects/<projectId>/
//! │   ├── project.json        # Project record with the current-version pointer
//! │   ├── versions/<n>.json   # One file per version
//! │   ├── chat.jsonl          # Append-only chat log
//! │   └── memory/             # Notes and preference record (forge_memory)
//! ├── sessions/<sessionId>/
//! │   ├── session.json        # Exploration session
//! │   └── options.json        # Options produced by Map
//! └── cache/<key>.json        # Preview cache entries
//! ```
//!
//! Every record is written to a temporary file and renamed into place, so
//! a reader never sees a half-written file.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use forge_build::FileMap;
use forge_memory::validate_project_id;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::FORGE_DIR;
use crate::error::{EngineError, EngineResult};
use crate::model::{
    BuildStatus, CacheEntry, ChatTurn, ExplorationOption, ExplorationSession, Project, Version,
    VersionId, VersionSummary,
};

/// File name for a cache key.
fn cache_file_name(key: &str) -> String {
    let name: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.json", name)
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> EngineResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> EngineResult<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// File-backed store for projects, versions, sessions, chat and cache.
pub struct WorkspaceStore {
    root: PathBuf,
    version_lock: Mutex<()>,
}

impl WorkspaceStore {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            root: workspace_root.as_ref().join(FORGE_DIR),
            version_lock: Mutex::new(()),
        }
    }

    /// The `.forge` directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parent of every project directory; also the memory store root.
    pub fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    fn project_dir(&self, project_id: &str) -> EngineResult<PathBuf> {
        validate_project_id(project_id)?;
        Ok(self.projects_dir().join(project_id))
    }

    fn versions_dir(&self, project_id: &str) -> EngineResult<PathBuf> {
        Ok(self.project_dir(project_id)?.join("versions"))
    }

    fn session_dir(&self, session_id: Uuid) -> PathBuf {
        self.root.join("sessions").join(session_id.to_string())
    }

    // ========================================================================
    // Projects
    // ========================================================================

    /// Load a project, creating it on first use.
    pub fn ensure_project(&self, project_id: &str) -> EngineResult<Project> {
        let path = self.project_dir(project_id)?.join("project.json");
        if path.exists() {
            return read_json(&path);
        }
        let project = Project::new(project_id, project_id);
        write_json_atomic(&path, &project)?;
        debug!(project = %project_id, "Created project");
        Ok(project)
    }

    pub fn load_project(&self, project_id: &str) -> EngineResult<Project> {
        let path = self.project_dir(project_id)?.join("project.json");
        if !path.exists() {
            return Err(EngineError::ProjectNotFound(project_id.to_string()));
        }
        read_json(&path)
    }

    pub fn save_project(&self, project: &Project) -> EngineResult<()> {
        let path = self.project_dir(&project.id)?.join("project.json");
        write_json_atomic(&path, project)
    }

    /// Every project, sorted by id.
    pub fn list_projects(&self) -> EngineResult<Vec<Project>> {
        let dir = self.projects_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut projects = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path().join("project.json");
            if path.exists() {
                match read_json::<Project>(&path) {
                    Ok(project) => projects.push(project),
                    Err(e) => warn!("Skipping unreadable project {:?}: {}", path, e),
                }
            }
        }
        projects.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(projects)
    }

    // ========================================================================
    // Versions
    // ========================================================================

    fn version_ids(&self, project_id: &str) -> EngineResult<Vec<VersionId>> {
        let dir = self.versions_dir(project_id)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<VersionId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Persist a new version and point the project at it.
    pub fn create_version(
        &self,
        project_id: &str,
        files: &FileMap,
        build_status: BuildStatus,
        build_log: Option<String>,
    ) -> EngineResult<Version> {
        let _guard = self.version_lock.lock();

        let mut project = self.ensure_project(project_id)?;
        let next = self.version_ids(project_id)?.last().copied().unwrap_or(0) + 1;
        let version = Version::new(next, project_id, files, build_status, build_log);

        let path = self.versions_dir(project_id)?.join(format!("{}.json", next));
        write_json_atomic(&path, &version)?;

        project.current_version = Some(next);
        project.updated_at = Utc::now();
        self.save_project(&project)?;

        debug!(project = %project_id, version = next, status = build_status.as_str(), "Created version");
        Ok(version)
    }

    pub fn load_version(&self, project_id: &str, version_id: VersionId) -> EngineResult<Version> {
        let path = self
            .versions_dir(project_id)?
            .join(format!("{}.json", version_id));
        if !path.exists() {
            return Err(EngineError::VersionNotFound {
                project: project_id.to_string(),
                version: version_id,
            });
        }
        read_json(&path)
    }

    /// Version summaries, newest first.
    pub fn list_versions(&self, project_id: &str) -> EngineResult<Vec<VersionSummary>> {
        let mut summaries = Vec::new();
        for id in self.version_ids(project_id)?.into_iter().rev() {
            summaries.push(self.load_version(project_id, id)?.summary());
        }
        Ok(summaries)
    }

    /// The project's current version, if it has one.
    pub fn current_version(&self, project_id: &str) -> EngineResult<Option<Version>> {
        let path = self.project_dir(project_id)?.join("project.json");
        if !path.exists() {
            return Ok(None);
        }
        let project: Project = read_json(&path)?;
        match project.current_version {
            Some(id) => Ok(Some(self.load_version(project_id, id)?)),
            None => Ok(None),
        }
    }

    /// Files of the current version; empty when there is none.
    pub fn current_files(&self, project_id: &str) -> EngineResult<FileMap> {
        Ok(self
            .current_version(project_id)?
            .map(|v| v.file_map())
            .unwrap_or_default())
    }

    // ========================================================================
    // Exploration sessions
    // ========================================================================

    pub fn save_session(&self, session: &ExplorationSession) -> EngineResult<()> {
        write_json_atomic(&self.session_dir(session.id).join("session.json"), session)
    }

    pub fn load_session(&self, session_id: Uuid) -> EngineResult<ExplorationSession> {
        let path = self.session_dir(session_id).join("session.json");
        if !path.exists() {
            return Err(EngineError::SessionNotFound(session_id));
        }
        read_json(&path)
    }

    pub fn save_options(&self, session_id: Uuid, options: &[ExplorationOption]) -> EngineResult<()> {
        write_json_atomic(&self.session_dir(session_id).join("options.json"), options)
    }

    pub fn load_options(&self, session_id: Uuid) -> EngineResult<Vec<ExplorationOption>> {
        let path = self.session_dir(session_id).join("options.json");
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_json(&path)
    }

    /// Sessions of one project, newest first.
    pub fn list_sessions(&self, project_id: &str) -> EngineResult<Vec<ExplorationSession>> {
        let dir = self.root.join("sessions");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path().join("session.json");
            if !path.exists() {
                continue;
            }
            match read_json::<ExplorationSession>(&path) {
                Ok(session) if session.project_id == project_id => sessions.push(session),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable session {:?}: {}", path, e),
            }
        }
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    // ========================================================================
    // Chat log
    // ========================================================================

    pub fn append_chat(&self, project_id: &str, turn: &ChatTurn) -> EngineResult<()> {
        let dir = self.project_dir(project_id)?;
        fs::create_dir_all(&dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("chat.jsonl"))?;
        writeln!(file, "{}", serde_json::to_string(turn)?)?;
        Ok(())
    }

    /// Chat turns, oldest first. With `limit`, only the newest `limit`.
    pub fn chat_history(&self, project_id: &str, limit: Option<usize>) -> EngineResult<Vec<ChatTurn>> {
        let path = self.project_dir(project_id)?.join("chat.jsonl");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(&path)?);
        let mut turns = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ChatTurn>(&line) {
                Ok(turn) => turns.push(turn),
                Err(e) => warn!("Skipping unreadable chat turn in {:?}: {}", path, e),
            }
        }
        if let Some(limit) = limit {
            let skip = turns.len().saturating_sub(limit);
            turns.drain(..skip);
        }
        Ok(turns)
    }

    // ========================================================================
    // Cache
    // ========================================================================

    /// Raw cache entry, expired or not.
    pub fn load_cache(&self, key: &str) -> EngineResult<Option<CacheEntry>> {
        let path = self.root.join("cache").join(cache_file_name(key));
        if !path.exists() {
            return Ok(None);
        }
        let entry: CacheEntry = read_json(&path)?;
        Ok((entry.key == key).then_some(entry))
    }

    pub fn save_cache(&self, entry: &CacheEntry) -> EngineResult<()> {
        let path = self.root.join("cache").join(cache_file_name(&entry.key));
        write_json_atomic(&path, entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CacheMeta, Decomposition};
    use chrono::Duration;
    use tempfile::tempdir;

    fn files(html: &str) -> FileMap {
        let mut files = FileMap::new();
        files.insert("index.html".to_string(), html.to_string());
        files
    }

    #[test]
    fn test_versions_allocate_and_move_pointer() {
        let temp = tempdir().unwrap();
        let store = WorkspaceStore::new(temp.path());

        let v1 = store
            .create_version("arcade", &files("<html>1</html>"), BuildStatus::Success, None)
            .unwrap();
        let v2 = store
            .create_version("arcade", &files("<html>2</html>"), BuildStatus::Failed, Some("err".into()))
            .unwrap();

        assert_eq!((v1.id, v2.id), (1, 2));
        assert_eq!(store.load_project("arcade").unwrap().current_version, Some(2));
        assert_eq!(store.current_files("arcade").unwrap()["index.html"], "<html>2</html>");

        let listed: Vec<_> = store.list_versions("arcade").unwrap().iter().map(|v| v.id).collect();
        assert_eq!(listed, vec![2, 1]);
        assert_eq!(v2.files[0].content_type, "text/html");
    }

    #[test]
    fn test_missing_records_are_domain_errors() {
        let temp = tempdir().unwrap();
        let store = WorkspaceStore::new(temp.path());

        assert!(matches!(store.load_project("nope"), Err(EngineError::ProjectNotFound(_))));
        assert!(matches!(
            store.load_version("nope", 4),
            Err(EngineError::VersionNotFound { version: 4, .. })
        ));
        assert!(matches!(
            store.load_session(Uuid::new_v4()),
            Err(EngineError::SessionNotFound(_))
        ));
        assert!(store.ensure_project("../escape").unwrap_err().is_client_fault());
    }

    #[test]
    fn test_sessions_filtered_by_project() {
        let temp = tempdir().unwrap();
        let store = WorkspaceStore::new(temp.path());

        let a = ExplorationSession::new("arcade", "a runner", Decomposition::default());
        let b = ExplorationSession::new("puzzles", "a match-3", Decomposition::default());
        store.save_session(&a).unwrap();
        store.save_session(&b).unwrap();

        let sessions = store.list_sessions("arcade").unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, a.id);
        assert!(store.load_options(a.id).unwrap().is_empty());
    }

    #[test]
    fn test_chat_history_limit_keeps_newest() {
        let temp = tempdir().unwrap();
        let store = WorkspaceStore::new(temp.path());
        for i in 0..4 {
            store.append_chat("arcade", &ChatTurn::user(format!("m{}", i))).unwrap();
        }

        let recent = store.chat_history("arcade", Some(2)).unwrap();
        let contents: Vec<_> = recent.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3"]);
        assert_eq!(store.chat_history("arcade", None).unwrap().len(), 4);
    }

    #[test]
    fn test_cache_round_trip() {
        let temp = tempdir().unwrap();
        let store = WorkspaceStore::new(temp.path());
        let session_id = Uuid::new_v4();
        let key = format!("preview:{}:opt_1", session_id);
        let entry = CacheEntry::new(
            &key,
            "<html></html>",
            CacheMeta {
                session_id,
                option_id: "opt_1".into(),
                fix_attempts: 1,
                last_errors: vec!["boom".into()],
            },
            Duration::minutes(30),
        );

        assert!(store.load_cache(&key).unwrap().is_none());
        store.save_cache(&entry).unwrap();
        let loaded = store.load_cache(&key).unwrap().unwrap();
        assert_eq!(loaded.meta.fix_attempts, 1);
        assert_eq!(loaded.value, "<html></html>");
    }
}
