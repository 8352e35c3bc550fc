//! Exploration session state machine.
//!
//! `explore` creates a session and its options; `select_option`, `iterate`
//! and `finish` move it along `explore_options -> committed -> iterating ->
//! stable`. Every operation on an existing session holds that session's
//! lock, so concurrent calls against one session run one after another.

use std::sync::Arc;

use chrono::Utc;
use forge_build::BuildResult;
use forge_memory::{FinalChoice, MemoryContext, MemoryNote, NoteContent, NoteKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::events::ProgressSink;
use crate::locks::KeyedLocks;
use crate::model::{
    Branch, BuildStatus, Decomposition, ExplorationOption, ExplorationSession, HypothesisLedger,
    SessionAction, SessionState, VersionSummary,
};
use crate::repair::build_fix_loop;
use crate::stages::design::decided_context;
use crate::stages::CurrentGame;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExploreOutcome {
    pub session: ExplorationSession,
    pub branches: Vec<Branch>,
    pub options: Vec<ExplorationOption>,
    /// Memory that biased the branches, when the project had preferences.
    pub memory_influence: Option<MemoryContext>,
}

impl ExploreOutcome {
    pub fn decomposition(&self) -> &Decomposition {
        &self.session.decomposition
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectOutcome {
    pub session_id: Uuid,
    pub option_id: String,
    pub version: VersionSummary,
    pub state: SessionState,
    pub feel_spec: Value,
    pub build: BuildResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterateOutcome {
    pub session_id: Uuid,
    pub version: VersionSummary,
    pub iteration_count: u32,
    pub hypothesis_ledger: HypothesisLedger,
    pub state: SessionState,
    pub build: BuildResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishOutcome {
    pub session_id: Uuid,
    pub note: MemoryNote,
    pub state: SessionState,
}

/// The newest unfinished session of a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSession {
    pub session: ExplorationSession,
    pub options: Vec<ExplorationOption>,
}

/// Runs exploration operations.
pub struct SessionManager {
    ctx: Arc<EngineContext>,
    locks: KeyedLocks<Uuid>,
}

fn check_transition(
    session: &ExplorationSession,
    action: SessionAction,
) -> EngineResult<SessionState> {
    session.state.transition(action).ok_or_else(|| {
        let expected: Vec<&str> = action.allowed_from().iter().map(|s| s.as_str()).collect();
        EngineError::InvalidState {
            operation: action.as_str().to_string(),
            current: session.state.to_string(),
            expected: expected.join("|"),
        }
    })
}

fn find_option(
    options: &[ExplorationOption],
    session_id: Uuid,
    option_id: &str,
) -> EngineResult<ExplorationOption> {
    options
        .iter()
        .find(|o| o.option_id == option_id)
        .cloned()
        .ok_or_else(|| EngineError::OptionNotFound {
            session: session_id,
            option: option_id.to_string(),
        })
}

/// Note recording which option was picked out of which.
fn design_decision_content(
    session: &ExplorationSession,
    option: &ExplorationOption,
    options: &[ExplorationOption],
    feel_spec: &Value,
    version_id: u64,
) -> NoteContent {
    let decomposition = &session.decomposition;
    let considered: Vec<Value> = options
        .iter()
        .map(|o| {
            json!({
                "option_id": o.option_id,
                "title": o.title,
                "core_loop": o.core_loop,
                "controls": o.controls,
                "is_recommended": o.is_recommended,
            })
        })
        .collect();

    let mut selected = option.design_spec();
    selected["option_id"] = json!(option.option_id);
    selected["assumptions_to_validate"] = json!(option.assumptions_to_validate);

    let mut content = NoteContent {
        title: format!("Design Decision: {}", option.title),
        summary: format!(
            "User requested: \"{}\". Decomposed into {} dimensions. Selected \"{}\" from {} options.",
            session.user_input,
            decomposition.dimensions.len(),
            option.title,
            options.len()
        ),
        final_choice: Some(FinalChoice {
            option_id: option.option_id.clone(),
            why: if option.is_recommended {
                "Recommended by system".to_string()
            } else {
                "User selected manually".to_string()
            },
        }),
        key_decisions: vec![json!({
            "decision": format!("Selected {}", option.title),
            "reason": format!("Core loop: {}", option.core_loop),
            "evidence": format!(
                "Controls: {}, Complexity: {}",
                option.controls, option.complexity
            ),
        })],
        dimensions: decomposition.dimension_keys(),
        hard_constraints: decomposition.hard_constraints.clone(),
        selected_option: Some(selected),
        feel_spec: Some(feel_spec.clone()),
        confidence: Some(NoteKind::DesignDecision.default_confidence()),
        ..Default::default()
    };
    content.extra.insert("user_input".into(), json!(session.user_input));
    content
        .extra
        .insert("decomposition_summary".into(), json!(decomposition.summary));
    content.extra.insert("locked".into(), json!(decomposition.locked));
    content
        .extra
        .insert("options_considered".into(), Value::Array(considered));
    content.extra.insert(
        "refs".into(),
        json!({
            "exploration_session_id": session.id,
            "stable_version_id": version_id,
        }),
    );
    content
}

impl SessionManager {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            locks: KeyedLocks::new(),
        }
    }

    /// Existing game and what its newest session decided, if any.
    fn current_game(&self, project_id: &str) -> EngineResult<Option<CurrentGame>> {
        let files = self.ctx.store.current_files(project_id)?;
        if files.is_empty() {
            return Ok(None);
        }

        let mut decided = None;
        if let Some(session) = self.ctx.store.list_sessions(project_id)?.into_iter().next() {
            let options = self.ctx.store.load_options(session.id)?;
            let selected = session
                .selected_option_id
                .as_deref()
                .and_then(|id| options.iter().find(|o| o.option_id == id));
            decided = decided_context(&session, selected);
        }
        Ok(Some(CurrentGame {
            files,
            decided_context: decided,
        }))
    }

    /// Decompose, branch and map a request into a new session.
    pub async fn explore(&self, project_id: &str, user_input: &str) -> EngineResult<ExploreOutcome> {
        self.ctx.store.ensure_project(project_id)?;
        let pipeline = &self.ctx.pipeline;
        let memory = &self.ctx.memory;

        let current = self.current_game(project_id)?;
        let memory_block = memory.relevant_context(project_id, user_input).await;
        let search = memory.search_tool(project_id);

        let decomposition = pipeline
            .decompose(user_input, current.as_ref(), &memory_block, &search)
            .await?;

        let memory_context = memory.memory_context(project_id).await.unwrap_or_else(|e| {
            warn!(project = %project_id, "Memory context unavailable: {}", e);
            MemoryContext::default()
        });
        let branches = pipeline
            .branch(&decomposition, &memory_context, &memory_block, &search)
            .await?;
        let options = pipeline.map_options(&branches, &decomposition).await?;

        let session = ExplorationSession::new(project_id, user_input, decomposition);
        self.ctx.store.save_session(&session)?;
        self.ctx.store.save_options(session.id, &options)?;
        info!(
            session = %session.id,
            branches = branches.len(),
            options = options.len(),
            "Exploration session created"
        );

        let memory_influence = if memory_context.relevant_preferences.is_empty() {
            None
        } else {
            Some(memory_context)
        };
        Ok(ExploreOutcome {
            session,
            branches,
            options,
            memory_influence,
        })
    }

    /// Commit to an option: feel spec, generation, validation, version.
    pub async fn select_option(&self, session_id: Uuid, option_id: &str) -> EngineResult<SelectOutcome> {
        let _guard = self.locks.lock(&session_id).await;
        let mut session = self.ctx.store.load_session(session_id)?;
        let next = check_transition(&session, SessionAction::Select)?;
        let options = self.ctx.store.load_options(session_id)?;
        let option = find_option(&options, session_id, option_id)?;

        let profile = self.ctx.memory.feel_profile().await.unwrap_or_else(|e| {
            warn!("Feel profile unavailable: {}", e);
            Default::default()
        });
        let pipeline = &self.ctx.pipeline;
        let feel_spec = pipeline.feel_spec(&option, &session.user_input, &profile).await?;
        let files = pipeline.generate(&option, &session.user_input, &feel_spec).await?;

        let repair = build_fix_loop(
            pipeline,
            &self.ctx.validator,
            files,
            self.ctx.config.limits.build_fix_ceiling,
            "",
            &ProgressSink::disabled(),
        )
        .await;
        let version = self.ctx.store.create_version(
            &session.project_id,
            &repair.files,
            BuildStatus::from_success(repair.success()),
            repair.result.error_log(),
        )?;

        session.selected_option_id = Some(option.option_id.clone());
        session.state = next;
        session.hypothesis_ledger = HypothesisLedger {
            feel_spec: Some(feel_spec.clone()),
            ..Default::default()
        };
        session.updated_at = Utc::now();
        self.ctx.store.save_session(&session)?;

        let content = design_decision_content(&session, &option, &options, &feel_spec, version.id);
        let note = MemoryNote::new(&session.project_id, NoteKind::DesignDecision, content)
            .with_sources(Some(session.id), Some(version.id));
        if let Err(e) = self.ctx.memory.remember(note).await {
            warn!(session = %session.id, "Design decision note not stored: {}", e);
        }

        info!(
            session = %session.id,
            option = %option.option_id,
            version = version.id,
            build_ok = repair.success(),
            "Option selected"
        );
        Ok(SelectOutcome {
            session_id,
            option_id: option.option_id,
            version: version.summary(),
            state: session.state,
            feel_spec,
            build: repair.result,
        })
    }

    /// Apply a refinement request to the project's current version.
    pub async fn iterate(&self, session_id: Uuid, user_input: &str) -> EngineResult<IterateOutcome> {
        let _guard = self.locks.lock(&session_id).await;
        let mut session = self.ctx.store.load_session(session_id)?;
        let next = check_transition(&session, SessionAction::Iterate)?;
        let current = self
            .ctx
            .store
            .current_version(&session.project_id)?
            .ok_or_else(|| EngineError::NoCurrentVersion(session.project_id.clone()))?;

        let pipeline = &self.ctx.pipeline;
        let files = pipeline
            .iterate(
                &current.file_map(),
                session.hypothesis_ledger.feel_spec.as_ref(),
                user_input,
            )
            .await?;
        let repair = build_fix_loop(
            pipeline,
            &self.ctx.validator,
            files,
            self.ctx.config.limits.build_fix_ceiling,
            "",
            &ProgressSink::disabled(),
        )
        .await;
        let version = self.ctx.store.create_version(
            &session.project_id,
            &repair.files,
            BuildStatus::from_success(repair.success()),
            repair.result.error_log(),
        )?;

        session.iteration_count += 1;
        session.state = next;
        session
            .hypothesis_ledger
            .open_questions
            .push(user_input.to_string());
        session.updated_at = Utc::now();
        self.ctx.store.save_session(&session)?;

        info!(
            session = %session.id,
            iteration = session.iteration_count,
            version = version.id,
            "Iteration applied"
        );
        Ok(IterateOutcome {
            session_id,
            version: version.summary(),
            iteration_count: session.iteration_count,
            hypothesis_ledger: session.hypothesis_ledger,
            state: session.state,
            build: repair.result,
        })
    }

    /// Write the consolidated note and freeze the session.
    pub async fn finish(&self, session_id: Uuid) -> EngineResult<FinishOutcome> {
        let _guard = self.locks.lock(&session_id).await;
        let mut session = self.ctx.store.load_session(session_id)?;
        let next = check_transition(&session, SessionAction::Finish)?;

        let options = self.ctx.store.load_options(session_id)?;
        let selected = session
            .selected_option_id
            .as_deref()
            .and_then(|id| options.iter().find(|o| o.option_id == id));
        let stable_version = self
            .ctx
            .store
            .current_version(&session.project_id)?
            .map(|v| v.id);

        let content = self
            .ctx
            .pipeline
            .finish_note(&session, selected, stable_version)
            .await?;
        let preferences = content.user_preferences.clone();
        let note = MemoryNote::new(&session.project_id, NoteKind::ExplorationFinish, content)
            .with_sources(Some(session.id), stable_version);
        let note = self.ctx.memory.remember(note).await?;
        if !preferences.is_empty() {
            self.ctx
                .memory
                .update_preferences(&session.project_id, preferences)
                .await?;
        }

        session.state = next;
        session.updated_at = Utc::now();
        self.ctx.store.save_session(&session)?;
        info!(session = %session.id, note = %note.id, "Exploration finished");

        Ok(FinishOutcome {
            session_id,
            note,
            state: session.state,
        })
    }

    pub fn session_state(&self, session_id: Uuid) -> EngineResult<ExplorationSession> {
        self.ctx.store.load_session(session_id)
    }

    pub fn options(&self, session_id: Uuid) -> EngineResult<Vec<ExplorationOption>> {
        self.ctx.store.load_options(session_id)
    }

    pub fn active_session(&self, project_id: &str) -> EngineResult<Option<ActiveSession>> {
        let session = self
            .ctx
            .store
            .list_sessions(project_id)?
            .into_iter()
            .find(|s| !s.state.is_terminal());
        match session {
            Some(session) => {
                let options = self.ctx.store.load_options(session.id)?;
                Ok(Some(ActiveSession { session, options }))
            }
            None => Ok(None),
        }
    }

    /// Memory notes of a project, newest first.
    pub async fn list_notes(&self, project_id: &str) -> EngineResult<Vec<MemoryNote>> {
        Ok(self.ctx.memory.list_notes(project_id).await?)
    }
}
