//! Engine data model.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use forge_build::{from_artifact_files, to_artifact_files, ArtifactFile, FileMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::feel::Archetype;

/// Version numbers are allocated per project, starting at 1.
pub type VersionId = u64;

/// A project owning versions, sessions, chat and memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub current_version: Option<VersionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            current_version: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Success,
    Failed,
}

impl BuildStatus {
    pub fn from_success(success: bool) -> Self {
        if success {
            Self::Success
        } else {
            Self::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// One runnable artifact: an ordered set of files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub project_id: String,
    pub files: Vec<ArtifactFile>,
    pub build_status: BuildStatus,
    pub build_log: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Version {
    pub fn new(
        id: VersionId,
        project_id: impl Into<String>,
        files: &FileMap,
        build_status: BuildStatus,
        build_log: Option<String>,
    ) -> Self {
        Self {
            id,
            project_id: project_id.into(),
            files: to_artifact_files(files),
            build_status,
            build_log,
            created_at: Utc::now(),
        }
    }

    pub fn file_map(&self) -> FileMap {
        from_artifact_files(&self.files)
    }

    pub fn summary(&self) -> VersionSummary {
        VersionSummary {
            id: self.id,
            build_status: self.build_status,
            build_log: self.build_log.clone(),
            file_count: self.files.len(),
            created_at: self.created_at,
        }
    }
}

/// Listing view of a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub id: VersionId,
    pub build_status: BuildStatus,
    pub build_log: Option<String>,
    pub file_count: usize,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Exploration
// ============================================================================

/// Exploration session states.
///
/// `explore_options -> committed -> iterating (repeatable) -> stable`.
/// `stable` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    ExploreOptions,
    Committed,
    Iterating,
    Stable,
}

/// Actions that move a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Select,
    Iterate,
    Finish,
}

impl SessionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "select_option",
            Self::Iterate => "iterate",
            Self::Finish => "finish",
        }
    }

    /// States the action may start from.
    pub fn allowed_from(&self) -> &'static [SessionState] {
        match self {
            Self::Select => &[SessionState::ExploreOptions],
            Self::Iterate => &[SessionState::Committed, SessionState::Iterating],
            Self::Finish => &[
                SessionState::ExploreOptions,
                SessionState::Committed,
                SessionState::Iterating,
            ],
        }
    }
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExploreOptions => "explore_options",
            Self::Committed => "committed",
            Self::Iterating => "iterating",
            Self::Stable => "stable",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stable)
    }

    /// Target state of `action`, or `None` when the edge does not exist.
    pub fn transition(self, action: SessionAction) -> Option<SessionState> {
        if !action.allowed_from().contains(&self) {
            return None;
        }
        Some(match action {
            SessionAction::Select => Self::Committed,
            SessionAction::Iterate => Self::Iterating,
            SessionAction::Finish => Self::Stable,
        })
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One uncertain design dimension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    #[serde(default)]
    pub candidates: Vec<String>,
    #[serde(default)]
    pub confidence: String,
    #[serde(default)]
    pub signals: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenQuestion {
    #[serde(default)]
    pub dimension: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub why_it_matters: String,
}

/// Decisions an existing game already made.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockedDecisions {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub items: Vec<String>,
}

/// Ambiguity map produced by Decompose.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub dimensions: BTreeMap<String, Dimension>,
    #[serde(default)]
    pub hard_constraints: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<OpenQuestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<LockedDecisions>,
}

impl Decomposition {
    /// Summary-only map used when the reply is unusable.
    pub fn summary_only(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    pub fn dimension_keys(&self) -> Vec<String> {
        self.dimensions.keys().cloned().collect()
    }
}

/// One internally consistent set of dimension choices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    #[serde(default)]
    pub branch_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub player_fantasy: String,
    #[serde(default)]
    pub gameplay_hook: String,
    #[serde(default)]
    pub core_mechanics: Vec<String>,
    #[serde(default)]
    pub picked: BTreeMap<String, String>,
    #[serde(default)]
    pub why_this_branch: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub what_to_validate: Vec<String>,
}

fn default_engine() -> String {
    "Phaser".to_string()
}

fn default_complexity() -> String {
    "medium".to_string()
}

fn default_mobile_fit() -> String {
    "good".to_string()
}

/// A user-facing candidate design.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationOption {
    #[serde(default)]
    pub option_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub core_loop: String,
    #[serde(default)]
    pub controls: String,
    #[serde(default)]
    pub mechanics: Vec<String>,
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default)]
    pub game_type: Archetype,
    #[serde(default = "default_complexity")]
    pub complexity: String,
    #[serde(default = "default_mobile_fit")]
    pub mobile_fit: String,
    #[serde(default)]
    pub assumptions_to_validate: Vec<String>,
    #[serde(default)]
    pub is_recommended: bool,
}

impl ExplorationOption {
    /// Design fields handed to Feel-Spec and Generate.
    pub fn design_spec(&self) -> Value {
        serde_json::json!({
            "title": self.title,
            "core_loop": self.core_loop,
            "controls": self.controls,
            "mechanics": self.mechanics,
            "complexity": self.complexity,
            "mobile_fit": self.mobile_fit,
        })
    }
}

/// Facts gathered while a session runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HypothesisLedger {
    #[serde(default)]
    pub validated: Vec<String>,
    #[serde(default)]
    pub rejected: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feel_spec: Option<Value>,
}

/// One user-initiated design conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationSession {
    pub id: Uuid,
    pub project_id: String,
    pub user_input: String,
    pub decomposition: Decomposition,
    pub state: SessionState,
    pub selected_option_id: Option<String>,
    pub hypothesis_ledger: HypothesisLedger,
    pub iteration_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExplorationSession {
    pub fn new(
        project_id: impl Into<String>,
        user_input: impl Into<String>,
        decomposition: Decomposition,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            user_input: user_input.into(),
            decomposition,
            state: SessionState::ExploreOptions,
            selected_option_id: None,
            hypothesis_ledger: HypothesisLedger::default(),
            iteration_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// Chat and cache
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One message of a project's chat log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn role_name(&self) -> &'static str {
        match self.role {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// Metadata of a preview cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub session_id: Uuid,
    pub option_id: String,
    #[serde(default)]
    pub fix_attempts: u32,
    #[serde(default)]
    pub last_errors: Vec<String>,
}

/// A key/value entry with lazy expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub meta: CacheMeta,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>, meta: CacheMeta, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            value: value.into(),
            meta,
            expires_at: Some(now + ttl),
            updated_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at < now)
    }
}

/// A runtime error reported by the client running a preview.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeErrorReport {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub line: Option<u64>,
    #[serde(default)]
    pub column: Option<u64>,
    #[serde(default)]
    pub stack: Option<String>,
}

impl RuntimeErrorReport {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn message_or_default(&self) -> &str {
        self.message
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or("unknown error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        use SessionAction::*;
        use SessionState::*;

        assert_eq!(ExploreOptions.transition(Select), Some(Committed));
        assert_eq!(Committed.transition(Iterate), Some(Iterating));
        assert_eq!(Iterating.transition(Iterate), Some(Iterating));
        assert_eq!(Iterating.transition(Finish), Some(Stable));
        assert_eq!(ExploreOptions.transition(Finish), Some(Stable));
    }

    #[test]
    fn test_rejected_transitions() {
        use SessionAction::*;
        use SessionState::*;

        assert_eq!(ExploreOptions.transition(Iterate), None);
        assert_eq!(Committed.transition(Select), None);
        assert_eq!(Iterating.transition(Select), None);
        for action in [Select, Iterate, Finish] {
            assert_eq!(Stable.transition(action), None);
        }
    }

    #[test]
    fn test_option_defaults_and_unknown_archetype() {
        let option: ExplorationOption = serde_json::from_value(serde_json::json!({
            "option_id": "opt_1",
            "title": "Sky Hopper",
            "game_type": "rhythm_roguelike"
        }))
        .unwrap();

        assert_eq!(option.engine, "Phaser");
        assert_eq!(option.complexity, "medium");
        assert_eq!(option.mobile_fit, "good");
        assert_eq!(option.game_type, Archetype::Custom);
        assert!(!option.is_recommended);
    }

    #[test]
    fn test_cache_expiry() {
        let meta = CacheMeta {
            session_id: Uuid::new_v4(),
            option_id: "opt_1".into(),
            fix_attempts: 0,
            last_errors: Vec::new(),
        };
        let entry = CacheEntry::new("k", "<html>", meta, Duration::minutes(30));
        assert!(!entry.is_expired(Utc::now()));
        assert!(entry.is_expired(Utc::now() + Duration::minutes(31)));
    }

    #[test]
    fn test_runtime_error_default_message() {
        assert_eq!(RuntimeErrorReport::default().message_or_default(), "unknown error");
        assert_eq!(RuntimeErrorReport::new("boom").message_or_default(), "boom");
    }
}
