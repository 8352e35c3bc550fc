//! Chat-driven orchestrator.
//!
//! Intent -> (answer | plan -> build -> validate/fix -> version), streamed
//! as progress events. Runs for one project are serialized, and every run
//! ends with exactly one `done` event.

use std::sync::Arc;

use forge_build::{apply_file_ops, FileMap};
use forge_memory::NoteKind;
use tracing::{debug, info, warn};

use crate::engine::EngineContext;
use crate::events::ProgressSink;
use crate::locks::KeyedLocks;
use crate::model::{BuildStatus, ChatTurn, VersionId};
use crate::repair::build_fix_loop;

/// Turns of chat history handed to the intent and answer stages.
const HISTORY_WINDOW: usize = 10;

pub struct ChatOrchestrator {
    ctx: Arc<EngineContext>,
    locks: KeyedLocks<String>,
}

impl ChatOrchestrator {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            locks: KeyedLocks::new(),
        }
    }

    /// Handle one user message.
    pub async fn run(&self, project_id: &str, message: &str, sink: &ProgressSink) {
        let _guard = self.locks.lock(&project_id.to_string()).await;
        let version = self.execute(project_id, message, sink).await;
        sink.done(version);
    }

    /// The pipeline body. Failures are reported on the sink and end the
    /// run with no version.
    async fn execute(&self, project_id: &str, message: &str, sink: &ProgressSink) -> Option<VersionId> {
        let store = &self.ctx.store;
        let pipeline = &self.ctx.pipeline;

        let history = match store
            .ensure_project(project_id)
            .and_then(|_| store.chat_history(project_id, Some(HISTORY_WINDOW)))
        {
            Ok(history) => history,
            Err(e) => {
                sink.error(format!("Failed to load project: {}", e));
                return None;
            }
        };
        if let Err(e) = store.append_chat(project_id, &ChatTurn::user(message)) {
            sink.error(format!("Failed to save message: {}", e));
            return None;
        }
        let memory_block = self.ctx.memory.relevant_context(project_id, message).await;

        sink.stage("intent_parser");
        let intent = match pipeline.intent(message, &history, &memory_block).await {
            Ok(intent) => intent,
            Err(e) => {
                sink.error(format!("Intent parsing failed: {}", e));
                return None;
            }
        };
        sink.token(format!(
            "Intent: {} ({}) - {}",
            intent.intent_type.as_str(),
            intent.complexity,
            intent.summary
        ));

        if intent.is_question() {
            sink.stage("responding");
            match pipeline.answer(message, &history).await {
                Ok(answer) => {
                    sink.token(answer.clone());
                    if let Err(e) = store.append_chat(project_id, &ChatTurn::assistant(answer)) {
                        warn!(project = %project_id, "Answer not saved: {}", e);
                    }
                }
                Err(e) => sink.error(format!("Failed to respond: {}", e)),
            }
            return None;
        }

        let files = match store.current_files(project_id) {
            Ok(files) => files,
            Err(e) => {
                sink.error(format!("Failed to load project files: {}", e));
                return None;
            }
        };

        sink.stage("planner");
        let plan = match pipeline.plan(&intent, &files, &memory_block).await {
            Ok(plan) => plan,
            Err(e) => {
                sink.error(format!("Planning failed: {}", e));
                return None;
            }
        };
        if plan.is_empty() {
            sink.token("No file changes needed.");
            return None;
        }
        let summary = plan.summary();
        sink.token(format!("Plan: {}", summary));

        sink.stage("builder");
        let ops = match pipeline.build(&plan, &files, &memory_block, sink).await {
            Ok(ops) => ops,
            Err(e) => {
                sink.error(format!("Build execution failed: {}", e));
                return None;
            }
        };
        if ops.is_empty() {
            sink.token("No file changes were made.");
            return None;
        }

        let mut updated: FileMap = files;
        if let Err(e) = apply_file_ops(&mut updated, &ops) {
            sink.error(format!("Build execution failed: {}", e));
            return None;
        }

        let repair = build_fix_loop(
            pipeline,
            &self.ctx.validator,
            updated,
            self.ctx.config.limits.build_fix_ceiling,
            &memory_block,
            sink,
        )
        .await;

        if let Err(e) = store.append_chat(project_id, &ChatTurn::assistant(format!("Built: {}", summary))) {
            warn!(project = %project_id, "Build summary not saved: {}", e);
        }
        let version = match store.create_version(
            project_id,
            &repair.files,
            BuildStatus::from_success(repair.success()),
            repair.result.error_log(),
        ) {
            Ok(version) => version,
            Err(e) => {
                sink.error(format!("Failed to save version: {}", e));
                return None;
            }
        };
        info!(
            project = %project_id,
            version = version.id,
            build_ok = repair.success(),
            fix_attempts = repair.fix_attempts,
            "Chat build finished"
        );

        if repair.success() {
            self.remember_facts(project_id, message, &history, &repair.files, version.id)
                .await;
        }
        Some(version.id)
    }

    /// Store facts from the exchange. Failures are logged and dropped.
    async fn remember_facts(
        &self,
        project_id: &str,
        message: &str,
        history: &[ChatTurn],
        files: &FileMap,
        version_id: VersionId,
    ) {
        let facts = match self.ctx.pipeline.extract_facts(message, history, files).await {
            Ok(facts) => facts,
            Err(e) => {
                warn!(project = %project_id, "Fact extraction failed: {}", e);
                return;
            }
        };
        for fact in &facts {
            if let Err(e) = self
                .ctx
                .memory
                .remember_fact(project_id, fact, NoteKind::AutoExtracted, Some(version_id))
                .await
            {
                warn!(project = %project_id, "Fact not stored: {}", e);
            }
        }
        debug!(project = %project_id, facts = facts.len(), "Facts remembered");
    }
}
