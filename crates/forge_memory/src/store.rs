//! Note and preference storage.
//!
//! File layout under the projects directory:
//! ```text
//! <projects>/<projectId>/memory/
//! ├── notes.jsonl        # Append-only note log
//! └── preference.json    # Project preference record
//! ```

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::error::{MemoryError, MemoryResult};
use crate::note::{MemoryNote, PreferenceMap, UserPreference};

/// Persistent home of memory notes and preference records.
///
/// Listing methods return newest first.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn append_note(&self, note: &MemoryNote) -> MemoryResult<()>;

    /// Notes of one project, newest first, at most `limit` when given.
    async fn project_notes(
        &self,
        project_id: &str,
        limit: Option<usize>,
    ) -> MemoryResult<Vec<MemoryNote>>;

    /// Newest notes across every project.
    async fn recent_notes(&self, limit: usize) -> MemoryResult<Vec<MemoryNote>>;

    async fn preference(&self, project_id: &str) -> MemoryResult<Option<UserPreference>>;

    /// Replace the project's preference record.
    async fn upsert_preference(
        &self,
        project_id: &str,
        preferences: PreferenceMap,
    ) -> MemoryResult<UserPreference>;

    /// Most recently updated preference records across every project.
    async fn recent_preferences(&self, limit: usize) -> MemoryResult<Vec<UserPreference>>;
}

/// Reject ids that would escape the projects directory.
pub fn validate_project_id(project_id: &str) -> MemoryResult<()> {
    let valid = !project_id.is_empty()
        && project_id != "."
        && project_id != ".."
        && project_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(MemoryError::InvalidProject(project_id.to_string()))
    }
}

fn newest_first(notes: &mut [MemoryNote]) {
    notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// File-backed store.
pub struct FileMemoryStore {
    projects_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileMemoryStore {
    pub fn new(projects_dir: impl AsRef<Path>) -> Self {
        Self {
            projects_dir: projects_dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn memory_dir(&self, project_id: &str) -> MemoryResult<PathBuf> {
        validate_project_id(project_id)?;
        Ok(self.projects_dir.join(project_id).join("memory"))
    }

    fn load_notes_file(path: &Path) -> MemoryResult<Vec<MemoryNote>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(path)?);
        let mut notes = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MemoryNote>(&line) {
                Ok(note) => notes.push(note),
                Err(e) => warn!("Skipping unreadable note in {:?}: {}", path, e),
            }
        }
        Ok(notes)
    }

    fn load_preference_file(path: &Path) -> MemoryResult<Option<UserPreference>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn project_ids(&self) -> MemoryResult<Vec<String>> {
        if !self.projects_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.projects_dir)? {
            let entry = entry?;
            if entry.path().is_dir() {
                if let Some(id) = entry.file_name().to_str() {
                    if validate_project_id(id).is_ok() {
                        ids.push(id.to_string());
                    }
                }
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn append_note(&self, note: &MemoryNote) -> MemoryResult<()> {
        let dir = self.memory_dir(&note.project_id)?;
        let json = serde_json::to_string(note)?;

        let _guard = self.write_lock.lock();
        fs::create_dir_all(&dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("notes.jsonl"))?;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    async fn project_notes(
        &self,
        project_id: &str,
        limit: Option<usize>,
    ) -> MemoryResult<Vec<MemoryNote>> {
        let path = self.memory_dir(project_id)?.join("notes.jsonl");
        let mut notes = Self::load_notes_file(&path)?;
        newest_first(&mut notes);
        if let Some(limit) = limit {
            notes.truncate(limit);
        }
        Ok(notes)
    }

    async fn recent_notes(&self, limit: usize) -> MemoryResult<Vec<MemoryNote>> {
        let mut notes = Vec::new();
        for id in self.project_ids()? {
            notes.extend(Self::load_notes_file(
                &self.memory_dir(&id)?.join("notes.jsonl"),
            )?);
        }
        newest_first(&mut notes);
        notes.truncate(limit);
        Ok(notes)
    }

    async fn preference(&self, project_id: &str) -> MemoryResult<Option<UserPreference>> {
        Self::load_preference_file(&self.memory_dir(project_id)?.join("preference.json"))
    }

    async fn upsert_preference(
        &self,
        project_id: &str,
        preferences: PreferenceMap,
    ) -> MemoryResult<UserPreference> {
        let dir = self.memory_dir(project_id)?;
        let record = UserPreference::new(project_id, preferences);
        let content = serde_json::to_string_pretty(&record)?;

        let _guard = self.write_lock.lock();
        fs::create_dir_all(&dir)?;
        let path = dir.join("preference.json");
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;
        Ok(record)
    }

    async fn recent_preferences(&self, limit: usize) -> MemoryResult<Vec<UserPreference>> {
        let mut records = Vec::new();
        for id in self.project_ids()? {
            let path = self.memory_dir(&id)?.join("preference.json");
            match Self::load_preference_file(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable preferences in {:?}: {}", path, e),
            }
        }
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        records.truncate(limit);
        Ok(records)
    }
}

/// Process-local store for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    notes: RwLock<Vec<MemoryNote>>,
    preferences: RwLock<HashMap<String, UserPreference>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn append_note(&self, note: &MemoryNote) -> MemoryResult<()> {
        self.notes.write().push(note.clone());
        Ok(())
    }

    async fn project_notes(
        &self,
        project_id: &str,
        limit: Option<usize>,
    ) -> MemoryResult<Vec<MemoryNote>> {
        let mut notes: Vec<_> = self
            .notes
            .read()
            .iter()
            .filter(|n| n.project_id == project_id)
            .cloned()
            .collect();
        newest_first(&mut notes);
        if let Some(limit) = limit {
            notes.truncate(limit);
        }
        Ok(notes)
    }

    async fn recent_notes(&self, limit: usize) -> MemoryResult<Vec<MemoryNote>> {
        let mut notes = self.notes.read().clone();
        newest_first(&mut notes);
        notes.truncate(limit);
        Ok(notes)
    }

    async fn preference(&self, project_id: &str) -> MemoryResult<Option<UserPreference>> {
        Ok(self.preferences.read().get(project_id).cloned())
    }

    async fn upsert_preference(
        &self,
        project_id: &str,
        preferences: PreferenceMap,
    ) -> MemoryResult<UserPreference> {
        let record = UserPreference::new(project_id, preferences);
        self.preferences
            .write()
            .insert(project_id.to_string(), record.clone());
        Ok(record)
    }

    async fn recent_preferences(&self, limit: usize) -> MemoryResult<Vec<UserPreference>> {
        let mut records: Vec<_> = self.preferences.read().values().cloned().collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::{NoteContent, NoteKind};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use tempfile::tempdir;

    fn note_at(project: &str, title: &str, minutes_ago: i64) -> MemoryNote {
        let mut note = MemoryNote::new(project, NoteKind::Manual, NoteContent::fact(title));
        note.created_at = Utc::now() - Duration::minutes(minutes_ago);
        note
    }

    #[tokio::test]
    async fn test_file_store_notes_newest_first() {
        let temp = tempdir().unwrap();
        let store = FileMemoryStore::new(temp.path());

        store.append_note(&note_at("arcade", "old", 10)).await.unwrap();
        store.append_note(&note_at("arcade", "new", 1)).await.unwrap();
        store.append_note(&note_at("other", "elsewhere", 5)).await.unwrap();

        let notes = store.project_notes("arcade", None).await.unwrap();
        let titles: Vec<_> = notes.iter().map(|n| n.content.title.as_str()).collect();
        assert_eq!(titles, vec!["new", "old"]);

        let limited = store.project_notes("arcade", Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);

        let all = store.recent_notes(2).await.unwrap();
        let titles: Vec<_> = all.iter().map(|n| n.content.title.as_str()).collect();
        assert_eq!(titles, vec!["new", "elsewhere"]);
    }

    #[tokio::test]
    async fn test_file_store_preference_upsert() {
        let temp = tempdir().unwrap();
        let store = FileMemoryStore::new(temp.path());

        assert!(store.preference("arcade").await.unwrap().is_none());

        let prefs = json!({"platform": "mobile"}).as_object().cloned().unwrap();
        store.upsert_preference("arcade", prefs).await.unwrap();
        let prefs = json!({"platform": "desktop"}).as_object().cloned().unwrap();
        store.upsert_preference("arcade", prefs).await.unwrap();

        let record = store.preference("arcade").await.unwrap().unwrap();
        assert_eq!(record.get_str("platform"), Some("desktop"));
        assert_eq!(store.recent_preferences(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_torn_preference_file_is_skipped() {
        let temp = tempdir().unwrap();
        let store = FileMemoryStore::new(temp.path());

        let prefs = json!({"platform": "mobile"}).as_object().cloned().unwrap();
        store.upsert_preference("good", prefs).await.unwrap();

        let bad_dir = temp.path().join("bad").join("memory");
        fs::create_dir_all(&bad_dir).unwrap();
        fs::write(bad_dir.join("preference.json"), r#"{"project_id": "ba"#).unwrap();

        let records = store.recent_preferences(10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].project_id, "good");
    }

    #[tokio::test]
    async fn test_preference_write_leaves_no_temp_file() {
        let temp = tempdir().unwrap();
        let store = FileMemoryStore::new(temp.path());
        let prefs = json!({"pace": "fast"}).as_object().cloned().unwrap();
        store.upsert_preference("arcade", prefs).await.unwrap();

        let dir = temp.path().join("arcade").join("memory");
        assert!(dir.join("preference.json").exists());
        assert!(!dir.join("preference.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_invalid_project_id_rejected() {
        let temp = tempdir().unwrap();
        let store = FileMemoryStore::new(temp.path());
        let result = store.project_notes("../escape", None).await;
        assert!(matches!(result, Err(MemoryError::InvalidProject(_))));
    }

    #[tokio::test]
    async fn test_in_memory_store_scopes_projects() {
        let store = InMemoryMemoryStore::new();
        store.append_note(&note_at("a", "one", 2)).await.unwrap();
        store.append_note(&note_at("b", "two", 1)).await.unwrap();

        assert_eq!(store.project_notes("a", None).await.unwrap().len(), 1);
        assert_eq!(store.recent_notes(10).await.unwrap()[0].content.title, "two");
    }
}
