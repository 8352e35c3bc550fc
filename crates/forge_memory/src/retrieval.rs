//! Retrieval-augmented context for pipeline stages.
//!
//! Memory is an optimization: every read path here that feeds a prompt
//! degrades to "no context" instead of failing the caller.

use std::sync::Arc;

use forge_llm::{cosine_similarity, Embedder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::MemoryResult;
use crate::note::{MemoryNote, NoteContent, NoteKind, PreferenceMap};
use crate::profile::{aggregate_user_feel_profile, FeelProfile};
use crate::store::MemoryStore;
use crate::tool::MemorySearchTool;

/// Retrieval limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalSettings {
    pub max_injected_chars: usize,
    pub search_limit: usize,
    pub profile_note_window: usize,
    pub profile_preference_window: usize,
    pub tool_scan_limit: usize,
    pub tool_result_limit: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            max_injected_chars: 4000,
            search_limit: 10,
            profile_note_window: 50,
            profile_preference_window: 10,
            tool_scan_limit: 20,
            tool_result_limit: 10,
        }
    }
}

const CONTEXT_NOTE_WINDOW: usize = 5;
const PATTERNS_PER_NOTE: usize = 3;

/// Preferences and patterns used to bias option generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryContext {
    pub relevant_preferences: PreferenceMap,
    pub recurring_patterns: Vec<String>,
    pub warnings: Vec<String>,
    pub suggested_direction_bias: Option<PreferenceMap>,
}

impl MemoryContext {
    pub fn is_empty(&self) -> bool {
        self.relevant_preferences.is_empty()
            && self.recurring_patterns.is_empty()
            && self.warnings.is_empty()
            && self.suggested_direction_bias.is_none()
    }
}

/// Front door to the memory subsystem.
#[derive(Clone)]
pub struct MemoryRetriever {
    store: Arc<dyn MemoryStore>,
    embedder: Arc<dyn Embedder>,
    settings: RetrievalSettings,
}

impl MemoryRetriever {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        embedder: Arc<dyn Embedder>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Embed and persist a note. An embedding failure stores the note
    /// without a vector; it then only shows up in keyword searches.
    pub async fn remember(&self, mut note: MemoryNote) -> MemoryResult<MemoryNote> {
        match self.embedder.embed(&note.retrieval_text()).await {
            Ok(vector) => note.embedding = Some(vector),
            Err(e) => warn!(project = %note.project_id, "Note embedding failed: {}", e),
        }
        self.store.append_note(&note).await?;
        debug!(project = %note.project_id, kind = %note.kind, "Stored memory note");
        Ok(note)
    }

    /// Store a single plain-text fact.
    pub async fn remember_fact(
        &self,
        project_id: &str,
        text: &str,
        kind: NoteKind,
        source_version: Option<u64>,
    ) -> MemoryResult<MemoryNote> {
        let note = MemoryNote::new(project_id, kind, NoteContent::fact(text))
            .with_sources(None, source_version);
        self.remember(note).await
    }

    /// Notes most similar to `query`, best first.
    pub async fn search(&self, project_id: &str, query: &str) -> MemoryResult<Vec<MemoryNote>> {
        let query_vector = self.embedder.embed(query).await?;
        let notes = self.store.project_notes(project_id, None).await?;

        let mut scored: Vec<(f32, MemoryNote)> = notes
            .into_iter()
            .filter_map(|note| {
                let score = cosine_similarity(&query_vector, note.embedding.as_deref()?);
                Some((score, note))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.settings.search_limit);

        Ok(scored.into_iter().map(|(_, note)| note).collect())
    }

    /// Prompt block of the notes most relevant to `query`, capped at the
    /// injected-character budget. Empty when nothing fits or on failure.
    pub async fn relevant_context(&self, project_id: &str, query: &str) -> String {
        let notes = match self.search(project_id, query).await {
            Ok(notes) => notes,
            Err(e) => {
                warn!(project = %project_id, "Memory retrieval failed: {}", e);
                return String::new();
            }
        };

        let mut lines = Vec::new();
        let mut total = 0;
        for note in &notes {
            let line = format!("- {}", note.retrieval_text());
            let len = line.chars().count();
            if total + len > self.settings.max_injected_chars {
                break;
            }
            total += len;
            lines.push(line);
        }

        if lines.is_empty() {
            return String::new();
        }
        format!(
            "## Project Memory\nRelevant context from previous interactions:\n{}",
            lines.join("\n")
        )
    }

    /// Preference record plus patterns and warnings from the newest notes.
    pub async fn memory_context(&self, project_id: &str) -> MemoryResult<MemoryContext> {
        let notes = self
            .store
            .project_notes(project_id, Some(CONTEXT_NOTE_WINDOW))
            .await?;
        let preference = self.store.preference(project_id).await?;

        let mut context = MemoryContext {
            relevant_preferences: preference.map(|p| p.preferences).unwrap_or_default(),
            ..Default::default()
        };
        for note in &notes {
            let c = &note.content;
            context
                .recurring_patterns
                .extend(c.validated_hypotheses.iter().take(PATTERNS_PER_NOTE).cloned());
            context
                .warnings
                .extend(c.pitfalls_and_guards.iter().take(PATTERNS_PER_NOTE).cloned());
            if context.suggested_direction_bias.is_none() && !c.user_preferences.is_empty() {
                context.suggested_direction_bias = Some(c.user_preferences.clone());
            }
        }
        Ok(context)
    }

    /// Cross-project feel profile over the configured windows.
    pub async fn feel_profile(&self) -> MemoryResult<FeelProfile> {
        let notes = self
            .store
            .recent_notes(self.settings.profile_note_window)
            .await?;
        let preferences = self
            .store
            .recent_preferences(self.settings.profile_preference_window)
            .await?;
        Ok(aggregate_user_feel_profile(&notes, &preferences))
    }

    /// Replace a project's preference record.
    pub async fn update_preferences(
        &self,
        project_id: &str,
        preferences: PreferenceMap,
    ) -> MemoryResult<()> {
        self.store.upsert_preference(project_id, preferences).await?;
        Ok(())
    }

    /// Notes of one project, newest first.
    pub async fn list_notes(&self, project_id: &str) -> MemoryResult<Vec<MemoryNote>> {
        self.store.project_notes(project_id, None).await
    }

    /// Notes written for one exploration session.
    pub async fn session_notes(
        &self,
        project_id: &str,
        session_id: Uuid,
    ) -> MemoryResult<Vec<MemoryNote>> {
        Ok(self
            .list_notes(project_id)
            .await?
            .into_iter()
            .filter(|n| n.source_session_id == Some(session_id))
            .collect())
    }

    /// The `search_memory` tool bound to one project.
    pub fn search_tool(&self, project_id: &str) -> MemorySearchTool {
        MemorySearchTool::new(
            self.store.clone(),
            project_id,
            self.settings.tool_scan_limit,
            self.settings.tool_result_limit,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryMemoryStore;
    use forge_llm::HashEmbedder;
    use serde_json::json;

    fn retriever(settings: RetrievalSettings) -> MemoryRetriever {
        MemoryRetriever::new(
            Arc::new(InMemoryMemoryStore::new()),
            Arc::new(HashEmbedder::default()),
            settings,
        )
    }

    #[tokio::test]
    async fn test_relevant_context_ranks_and_formats() {
        let memory = retriever(RetrievalSettings::default());
        memory
            .remember_fact("arcade", "Dark neon palette for backgrounds", NoteKind::AutoExtracted, Some(1))
            .await
            .unwrap();
        memory
            .remember_fact("arcade", "Player jump should feel snappy and short", NoteKind::AutoExtracted, Some(1))
            .await
            .unwrap();

        let context = memory.relevant_context("arcade", "make the jump snappy").await;
        assert!(context.starts_with("## Project Memory\nRelevant context from previous interactions:\n"));
        let first_line = context.lines().nth(2).unwrap();
        assert_eq!(first_line, "- Player jump should feel snappy and short");
    }

    #[tokio::test]
    async fn test_relevant_context_respects_budget() {
        let memory = retriever(RetrievalSettings {
            max_injected_chars: 10,
            ..Default::default()
        });
        memory
            .remember_fact("arcade", "A fact that is far longer than ten characters", NoteKind::Manual, None)
            .await
            .unwrap();

        assert_eq!(memory.relevant_context("arcade", "fact").await, "");
    }

    #[tokio::test]
    async fn test_relevant_context_empty_project() {
        let memory = retriever(RetrievalSettings::default());
        assert_eq!(memory.relevant_context("nothing", "query").await, "");
    }

    #[tokio::test]
    async fn test_memory_context_collects_patterns() {
        let memory = retriever(RetrievalSettings::default());
        let content = NoteContent {
            title: "Finished runner".into(),
            validated_hypotheses: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            pitfalls_and_guards: vec!["x".into()],
            user_preferences: json!({"pace": "fast"}).as_object().cloned().unwrap(),
            ..Default::default()
        };
        memory
            .remember(MemoryNote::new("arcade", NoteKind::ExplorationFinish, content))
            .await
            .unwrap();
        memory
            .update_preferences("arcade", json!({"platform": "mobile"}).as_object().cloned().unwrap())
            .await
            .unwrap();

        let context = memory.memory_context("arcade").await.unwrap();
        assert_eq!(context.recurring_patterns, vec!["a", "b", "c"]);
        assert_eq!(context.warnings, vec!["x"]);
        assert_eq!(context.relevant_preferences["platform"], "mobile");
        assert_eq!(context.suggested_direction_bias.unwrap()["pace"], "fast");
    }
}
