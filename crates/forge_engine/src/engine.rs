//! Engine facade.
//!
//! Wires the reasoning service, memory, validator and workspace store
//! together and exposes every operation the routing layer or CLI calls.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use forge_build::{write_file_map, BuildValidator};
use forge_llm::{
    CallLog, CallRecord, ChatMessage, Completion, Embedder, HashEmbedder, LlmAdapter, LlmError,
    LlmResult, NoopCallLog, OpenAiEmbedder, ReasoningService, RingCallLog, SamplingOptions,
    ToolDefinition,
};
use forge_memory::{FeelProfile, FileMemoryStore, MemoryNote, MemoryRetriever};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{EmbeddingBackend, EngineConfig};
use crate::error::EngineResult;
use crate::events::ProgressSink;
use crate::exploration::{
    ActiveSession, ExploreOutcome, FinishOutcome, IterateOutcome, SelectOutcome, SessionManager,
};
use crate::model::{
    ChatTurn, ExplorationOption, ExplorationSession, RuntimeErrorReport, Version, VersionId,
    VersionSummary,
};
use crate::orchestrator::ChatOrchestrator;
use crate::persistence::WorkspaceStore;
use crate::preview::{PreviewCache, PreviewOutcome};
use crate::stages::StagePipeline;

/// Shared collaborators of every engine component.
pub struct EngineContext {
    pub config: EngineConfig,
    pub store: WorkspaceStore,
    pub pipeline: StagePipeline,
    pub memory: MemoryRetriever,
    pub validator: BuildValidator,
    pub call_log: Arc<dyn CallLog>,
}

/// Stand-in service when no API key is available. Every call fails with
/// [`LlmError::NotConfigured`], so read-only commands still work.
struct UnconfiguredService;

#[async_trait]
impl ReasoningService for UnconfiguredService {
    async fn complete(&self, _: &[ChatMessage], _: &SamplingOptions) -> LlmResult<Completion> {
        Err(LlmError::NotConfigured)
    }

    async fn complete_with_tools(
        &self,
        _: &[ChatMessage],
        _: &[ToolDefinition],
        _: &SamplingOptions,
    ) -> LlmResult<Completion> {
        Err(LlmError::NotConfigured)
    }

    fn model(&self) -> &str {
        "unconfigured"
    }
}

fn embedder_for(config: &EngineConfig) -> Arc<dyn Embedder> {
    match config.llm.embeddings {
        EmbeddingBackend::Hash => Arc::new(HashEmbedder::new(HashEmbedder::DEFAULT_DIMENSIONS)),
        EmbeddingBackend::Openai => {
            match OpenAiEmbedder::from_env(Some(config.llm.embedding_model.clone())) {
                Ok(embedder) => Arc::new(embedder),
                Err(e) => {
                    warn!("Falling back to hashed embeddings: {}", e);
                    Arc::new(HashEmbedder::new(HashEmbedder::DEFAULT_DIMENSIONS))
                }
            }
        }
    }
}

/// The Playforge engine.
pub struct Engine {
    ctx: Arc<EngineContext>,
    sessions: SessionManager,
    previews: PreviewCache,
    chat: ChatOrchestrator,
}

impl Engine {
    /// Build an engine over a workspace with explicit collaborators.
    pub fn new(
        workspace_root: impl AsRef<Path>,
        config: EngineConfig,
        service: Arc<dyn ReasoningService>,
        embedder: Arc<dyn Embedder>,
    ) -> EngineResult<Self> {
        let store = WorkspaceStore::new(workspace_root.as_ref());
        let call_log: Arc<dyn CallLog> = match config.observability.call_log_capacity {
            0 => Arc::new(NoopCallLog),
            capacity => Arc::new(RingCallLog::new(capacity)),
        };
        let pipeline = StagePipeline::new(service, call_log.clone(), config.limits)?;
        let memory = MemoryRetriever::new(
            Arc::new(FileMemoryStore::new(store.projects_dir())),
            embedder,
            config.memory.retrieval(),
        );
        let validator = BuildValidator::standard()?;

        let ctx = Arc::new(EngineContext {
            config,
            store,
            pipeline,
            memory,
            validator,
            call_log,
        });
        Ok(Self {
            sessions: SessionManager::new(ctx.clone()),
            previews: PreviewCache::new(ctx.clone()),
            chat: ChatOrchestrator::new(ctx.clone()),
            ctx,
        })
    }

    /// Build an engine from the workspace configuration and the environment.
    pub fn from_workspace(workspace_root: impl AsRef<Path>) -> EngineResult<Self> {
        let root = workspace_root.as_ref();
        let config = EngineConfig::load(root)?;
        let llm = &config.llm;

        let service: Arc<dyn ReasoningService> = match LlmAdapter::from_settings(
            llm.provider.as_deref(),
            llm.model.clone(),
            llm.base_url.clone(),
        ) {
            Ok(adapter) => {
                info!(provider = ?adapter.provider(), model = %adapter.model(), "Reasoning service ready");
                Arc::new(adapter)
            }
            Err(e) => {
                warn!("Reasoning service unavailable: {}", e);
                Arc::new(UnconfiguredService)
            }
        };
        let embedder = embedder_for(&config);
        Self::new(root, config, service, embedder)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn store(&self) -> &WorkspaceStore {
        &self.ctx.store
    }

    /// The `.forge` data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.ctx.store.root().to_path_buf()
    }

    // ========================================================================
    // Exploration
    // ========================================================================

    pub async fn explore(&self, project_id: &str, user_input: &str) -> EngineResult<ExploreOutcome> {
        self.sessions.explore(project_id, user_input).await
    }

    pub async fn select_option(&self, session_id: Uuid, option_id: &str) -> EngineResult<SelectOutcome> {
        self.sessions.select_option(session_id, option_id).await
    }

    pub async fn iterate(&self, session_id: Uuid, user_input: &str) -> EngineResult<IterateOutcome> {
        self.sessions.iterate(session_id, user_input).await
    }

    pub async fn finish(&self, session_id: Uuid) -> EngineResult<FinishOutcome> {
        self.sessions.finish(session_id).await
    }

    pub fn session_state(&self, session_id: Uuid) -> EngineResult<ExplorationSession> {
        self.sessions.session_state(session_id)
    }

    pub fn active_session(&self, project_id: &str) -> EngineResult<Option<ActiveSession>> {
        self.sessions.active_session(project_id)
    }

    pub fn session_options(&self, session_id: Uuid) -> EngineResult<Vec<ExplorationOption>> {
        self.sessions.options(session_id)
    }

    // ========================================================================
    // Preview
    // ========================================================================

    pub async fn preview(&self, session_id: Uuid, option_id: &str) -> EngineResult<PreviewOutcome> {
        self.previews.preview(session_id, option_id).await
    }

    pub async fn fix_preview(
        &self,
        session_id: Uuid,
        option_id: &str,
        errors: &[RuntimeErrorReport],
    ) -> EngineResult<PreviewOutcome> {
        self.previews.fix_preview(session_id, option_id, errors).await
    }

    // ========================================================================
    // Chat
    // ========================================================================

    /// Run one chat message. Progress goes to `sink`, which always ends
    /// with exactly one `done` event.
    pub async fn chat(&self, project_id: &str, message: &str, sink: &ProgressSink) {
        self.chat.run(project_id, message, sink).await
    }

    pub fn chat_history(&self, project_id: &str, limit: Option<usize>) -> EngineResult<Vec<ChatTurn>> {
        self.ctx.store.chat_history(project_id, limit)
    }

    // ========================================================================
    // Versions
    // ========================================================================

    pub fn list_versions(&self, project_id: &str) -> EngineResult<Vec<VersionSummary>> {
        self.ctx.store.list_versions(project_id)
    }

    pub fn load_version(&self, project_id: &str, version_id: VersionId) -> EngineResult<Version> {
        self.ctx.store.load_version(project_id, version_id)
    }

    /// Copy an old version into a new current one.
    pub fn rollback_to_version(&self, project_id: &str, version_id: VersionId) -> EngineResult<Version> {
        let old = self.ctx.store.load_version(project_id, version_id)?;
        let version = self.ctx.store.create_version(
            project_id,
            &old.file_map(),
            old.build_status,
            Some(format!("Rollback from version {}", version_id)),
        )?;
        info!(project = %project_id, from = version_id, to = version.id, "Rolled back");
        Ok(version)
    }

    /// Write a version's files under `dir`. Returns the number of files.
    pub fn export_version(
        &self,
        project_id: &str,
        version_id: VersionId,
        dir: &Path,
    ) -> EngineResult<usize> {
        let files = self.ctx.store.load_version(project_id, version_id)?.file_map();
        write_file_map(dir, &files)?;
        Ok(files.len())
    }

    // ========================================================================
    // Memory and observability
    // ========================================================================

    pub async fn list_notes(&self, project_id: &str) -> EngineResult<Vec<MemoryNote>> {
        self.sessions.list_notes(project_id).await
    }

    pub async fn search_memory(&self, project_id: &str, query: &str) -> EngineResult<Vec<MemoryNote>> {
        Ok(self.ctx.memory.search(project_id, query).await?)
    }

    pub async fn feel_profile(&self) -> EngineResult<FeelProfile> {
        Ok(self.ctx.memory.feel_profile().await?)
    }

    /// Recent reasoning calls, oldest first.
    pub fn recent_calls(&self) -> Vec<CallRecord> {
        self.ctx.call_log.list()
    }
}
