//! Memory notes and preference records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Free-form preference signals (platform, input, pace, ...).
pub type PreferenceMap = Map<String, Value>;

/// Where a note came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    /// Written when an option is selected.
    DesignDecision,
    /// Consolidated note written when an exploration finishes.
    ExplorationFinish,
    /// Fact extracted automatically after a successful build.
    AutoExtracted,
    /// Added by hand.
    Manual,
}

impl NoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DesignDecision => "design_decision",
            Self::ExplorationFinish => "exploration_finish",
            Self::AutoExtracted => "auto_extracted",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "design_decision" => Some(Self::DesignDecision),
            "exploration_finish" => Some(Self::ExplorationFinish),
            "auto_extracted" => Some(Self::AutoExtracted),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    pub fn default_confidence(&self) -> f64 {
        match self {
            Self::DesignDecision => 0.6,
            Self::ExplorationFinish => 0.8,
            Self::AutoExtracted => 0.5,
            Self::Manual => 1.0,
        }
    }

    /// Whether notes of this kind carry a `type:` tag.
    fn tagged(&self) -> bool {
        matches!(self, Self::DesignDecision | Self::AutoExtracted)
    }
}

impl std::fmt::Display for NoteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The option a session settled on and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalChoice {
    pub option_id: String,
    #[serde(default)]
    pub why: String,
}

/// Structured body of a note.
///
/// Known fields are typed; anything else a writer adds is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, deserialize_with = "object_or_empty")]
    pub user_preferences: PreferenceMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_choice: Option<FinalChoice>,
    #[serde(default, deserialize_with = "string_list")]
    pub validated_hypotheses: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub rejected_hypotheses: Vec<String>,
    #[serde(default, deserialize_with = "value_list")]
    pub key_decisions: Vec<Value>,
    #[serde(default, deserialize_with = "string_list")]
    pub pitfalls_and_guards: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub dimensions: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub hard_constraints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feel_spec: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Accept any JSON array and keep only its string items.
fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

fn value_list<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    })
}

/// Accept any JSON value; anything but an object becomes empty.
fn object_or_empty<'de, D>(deserializer: D) -> Result<PreferenceMap, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Object(map)) => map,
        _ => PreferenceMap::new(),
    })
}

impl NoteContent {
    /// A single plain-text fact.
    pub fn fact(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            title: text.clone(),
            summary: text,
            ..Default::default()
        }
    }
}

/// A persisted, append-only memory note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryNote {
    pub id: Uuid,
    pub project_id: String,
    pub kind: NoteKind,
    pub content: NoteContent,
    pub tags: Vec<String>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_session_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_version_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl MemoryNote {
    pub fn new(project_id: impl Into<String>, kind: NoteKind, content: NoteContent) -> Self {
        let mut tags = extract_tags(&content);
        if kind.tagged() {
            tags.push(format!("type:{}", kind));
        }
        let confidence = content.confidence.unwrap_or_else(|| kind.default_confidence());

        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            kind,
            content,
            tags,
            confidence,
            source_session_id: None,
            source_version_id: None,
            embedding: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_sources(mut self, session: Option<Uuid>, version: Option<u64>) -> Self {
        self.source_session_id = session;
        self.source_version_id = version;
        self
    }

    /// Text used for embedding and prompt injection.
    pub fn retrieval_text(&self) -> String {
        let title = self.content.title.trim();
        let summary = self.content.summary.trim();
        match (title.is_empty(), summary.is_empty()) {
            (_, true) => title.to_string(),
            (true, false) => summary.to_string(),
            (false, false) if title == summary => summary.to_string(),
            (false, false) => format!("{}: {}", title, summary),
        }
    }

    /// Lowercase JSON rendering of the content, for keyword matching.
    pub fn search_text(&self) -> String {
        serde_json::to_string(&self.content)
            .unwrap_or_default()
            .to_lowercase()
    }
}

/// Preference record of one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreference {
    pub project_id: String,
    pub preferences: PreferenceMap,
    pub updated_at: DateTime<Utc>,
}

impl UserPreference {
    pub fn new(project_id: impl Into<String>, preferences: PreferenceMap) -> Self {
        Self {
            project_id: project_id.into(),
            preferences,
            updated_at: Utc::now(),
        }
    }

    /// String value of one preference key.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.preferences
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Tags derived from preferences and the final choice.
pub fn extract_tags(content: &NoteContent) -> Vec<String> {
    let mut tags = Vec::new();
    for key in ["platform", "input", "pace"] {
        if let Some(value) = content
            .user_preferences
            .get(key)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
        {
            tags.push(format!("{}:{}", key, value));
        }
    }
    if let Some(choice) = content.final_choice.as_ref().filter(|c| !c.option_id.is_empty()) {
        tags.push(format!("chosen:{}", choice.option_id));
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tags_from_content() {
        let content: NoteContent = serde_json::from_value(json!({
            "title": "Runner",
            "user_preferences": { "platform": "mobile", "input": "tap", "pace": "" },
            "final_choice": { "option_id": "opt_2", "why": "Recommended by system" }
        }))
        .unwrap();

        let note = MemoryNote::new("arcade", NoteKind::DesignDecision, content);
        assert_eq!(
            note.tags,
            vec!["platform:mobile", "input:tap", "chosen:opt_2", "type:design_decision"]
        );
        assert_eq!(note.confidence, 0.6);
    }

    #[test]
    fn test_finish_note_has_no_type_tag() {
        let note = MemoryNote::new("p", NoteKind::ExplorationFinish, NoteContent::default());
        assert!(note.tags.is_empty());
        assert_eq!(note.confidence, 0.8);
    }

    #[test]
    fn test_lenient_string_lists_and_extra_fields() {
        let content: NoteContent = serde_json::from_value(json!({
            "title": "t",
            "validated_hypotheses": ["short runs", 3, {"x": 1}],
            "pitfalls_and_guards": null,
            "user_preferences": null,
            "user_input": "make a runner",
            "confidence": 0.9
        }))
        .unwrap();

        assert_eq!(content.validated_hypotheses, vec!["short runs"]);
        assert!(content.pitfalls_and_guards.is_empty());
        assert_eq!(content.extra["user_input"], "make a runner");

        let note = MemoryNote::new("p", NoteKind::ExplorationFinish, content);
        assert_eq!(note.confidence, 0.9);
    }

    #[test]
    fn test_retrieval_text() {
        let fact = MemoryNote::new("p", NoteKind::AutoExtracted, NoteContent::fact("Uses 800x600 canvas"));
        assert_eq!(fact.retrieval_text(), "Uses 800x600 canvas");

        let mut content = NoteContent::fact("Design Decision: Sky Hopper");
        content.summary = "Selected from 3 options".into();
        let note = MemoryNote::new("p", NoteKind::DesignDecision, content);
        assert_eq!(note.retrieval_text(), "Design Decision: Sky Hopper: Selected from 3 options");
    }
}
