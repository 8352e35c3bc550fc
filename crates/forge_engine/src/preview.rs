//! Preview cache and runtime-fix loop.
//!
//! A preview is the generated root document of one option, cached under
//! `preview:{session}:{option}` with a TTL. Expired entries count as
//! missing. Fixes are bounded per entry by `limits.preview_fix_ceiling`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use forge_build::ROOT_DOCUMENT;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::locks::KeyedLocks;
use crate::model::{CacheEntry, CacheMeta, ExplorationOption, RuntimeErrorReport};

/// Errors kept in the entry metadata after a fix.
const KEPT_ERRORS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewOutcome {
    pub session_id: Uuid,
    pub option_id: String,
    pub html: String,
    /// Whether the content came from the cache.
    pub cached: bool,
    pub fix_attempts: u32,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PreviewOutcome {
    fn from_entry(entry: CacheEntry, cached: bool) -> Self {
        Self {
            session_id: entry.meta.session_id,
            option_id: entry.meta.option_id,
            html: entry.value,
            cached,
            fix_attempts: entry.meta.fix_attempts,
            expires_at: entry.expires_at,
        }
    }
}

pub fn cache_key(session_id: Uuid, option_id: &str) -> String {
    format!("preview:{}:{}", session_id, option_id)
}

pub struct PreviewCache {
    ctx: Arc<EngineContext>,
    locks: KeyedLocks<String>,
}

impl PreviewCache {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            locks: KeyedLocks::new(),
        }
    }

    fn ttl(&self) -> Duration {
        Duration::minutes(self.ctx.config.preview.ttl_minutes)
    }

    /// Entry under `key` unless it is absent or expired.
    fn live_entry(&self, key: &str) -> EngineResult<Option<CacheEntry>> {
        Ok(self
            .ctx
            .store
            .load_cache(key)?
            .filter(|entry| !entry.is_expired(Utc::now())))
    }

    fn option(&self, session_id: Uuid, option_id: &str) -> EngineResult<ExplorationOption> {
        let options = self.ctx.store.load_options(session_id)?;
        options
            .into_iter()
            .find(|o| o.option_id == option_id)
            .ok_or_else(|| EngineError::OptionNotFound {
                session: session_id,
                option: option_id.to_string(),
            })
    }

    /// Cached preview, or a freshly generated one on a miss.
    pub async fn preview(&self, session_id: Uuid, option_id: &str) -> EngineResult<PreviewOutcome> {
        let key = cache_key(session_id, option_id);
        let _guard = self.locks.lock(&key).await;

        if let Some(entry) = self.live_entry(&key)? {
            debug!(key = %key, "Preview cache hit");
            return Ok(PreviewOutcome::from_entry(entry, true));
        }

        let session = self.ctx.store.load_session(session_id)?;
        let option = self.option(session_id, option_id)?;
        let profile = self.ctx.memory.feel_profile().await.unwrap_or_default();

        let pipeline = &self.ctx.pipeline;
        let feel_spec = pipeline.feel_spec(&option, &session.user_input, &profile).await?;
        let files = pipeline.generate(&option, &session.user_input, &feel_spec).await?;
        let html = files
            .get(ROOT_DOCUMENT)
            .filter(|content| !content.trim().is_empty())
            .cloned()
            .ok_or_else(|| {
                EngineError::contract("preview", "Game generation failed: no index.html produced")
            })?;

        let entry = CacheEntry::new(
            key.as_str(),
            html,
            CacheMeta {
                session_id,
                option_id: option_id.to_string(),
                fix_attempts: 0,
                last_errors: Vec::new(),
            },
            self.ttl(),
        );
        self.ctx.store.save_cache(&entry)?;
        info!(key = %key, "Preview generated");
        Ok(PreviewOutcome::from_entry(entry, false))
    }

    /// Repair a cached preview from client-reported runtime errors.
    pub async fn fix_preview(
        &self,
        session_id: Uuid,
        option_id: &str,
        errors: &[RuntimeErrorReport],
    ) -> EngineResult<PreviewOutcome> {
        let key = cache_key(session_id, option_id);
        let _guard = self.locks.lock(&key).await;

        let mut entry = self
            .live_entry(&key)?
            .ok_or_else(|| EngineError::PreviewMissing(key.clone()))?;
        let ceiling = self.ctx.config.limits.preview_fix_ceiling;
        if entry.meta.fix_attempts >= ceiling {
            return Err(EngineError::FixLimitReached {
                key,
                attempts: entry.meta.fix_attempts,
            });
        }

        let fixed = self.ctx.pipeline.fix_runtime(&entry.value, errors).await?;

        let now = Utc::now();
        entry.value = fixed;
        entry.expires_at = Some(now + self.ttl());
        entry.updated_at = now;
        entry.meta.fix_attempts += 1;
        entry.meta.last_errors = errors
            .iter()
            .take(KEPT_ERRORS)
            .map(|e| e.message_or_default().to_string())
            .collect();
        self.ctx.store.save_cache(&entry)?;

        info!(key = %key, attempt = entry.meta.fix_attempts, "Preview fixed");
        Ok(PreviewOutcome::from_entry(entry, false))
    }
}
