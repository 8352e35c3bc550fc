//! Engine configuration.
//!
//! Read from `<workspace>/.forge/config.toml`, then overridden by
//! environment variables. Every field has a default, so an absent file is
//! a valid configuration. API keys never live here.

use std::path::{Path, PathBuf};

use forge_memory::RetrievalSettings;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Workspace data directory.
pub const FORGE_DIR: &str = ".forge";

/// Configuration file inside [`FORGE_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

/// Which embedder backs memory retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Offline hashed bag-of-words.
    #[default]
    Hash,
    /// Hosted embeddings endpoint.
    Openai,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// `openai` or `anthropic`; picked from the available key when unset.
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub embeddings: EmbeddingBackend,
    pub embedding_model: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            base_url: None,
            embeddings: EmbeddingBackend::default(),
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }
}

/// Retry ceilings and stage bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub build_fix_ceiling: u32,
    pub preview_fix_ceiling: u32,
    /// Memory tool rounds per Decompose/Branch call.
    pub tool_rounds: u32,
    /// File tool rounds per builder or fixer call.
    pub build_tool_rounds: u32,
    pub min_branches: usize,
    pub max_branches: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            build_fix_ceiling: 3,
            preview_fix_ceiling: 2,
            tool_rounds: 3,
            build_tool_rounds: 8,
            min_branches: 2,
            max_branches: 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSettings {
    pub ttl_minutes: i64,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self { ttl_minutes: 30 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    pub max_injected_chars: usize,
    pub search_limit: usize,
    pub profile_note_window: usize,
    pub profile_preference_window: usize,
    pub tool_scan_limit: usize,
    pub tool_result_limit: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        let retrieval = RetrievalSettings::default();
        Self {
            max_injected_chars: retrieval.max_injected_chars,
            search_limit: retrieval.search_limit,
            profile_note_window: retrieval.profile_note_window,
            profile_preference_window: retrieval.profile_preference_window,
            tool_scan_limit: retrieval.tool_scan_limit,
            tool_result_limit: retrieval.tool_result_limit,
        }
    }
}

impl MemorySettings {
    pub fn retrieval(&self) -> RetrievalSettings {
        RetrievalSettings {
            max_injected_chars: self.max_injected_chars,
            search_limit: self.search_limit,
            profile_note_window: self.profile_note_window,
            profile_preference_window: self.profile_preference_window,
            tool_scan_limit: self.tool_scan_limit,
            tool_result_limit: self.tool_result_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilitySettings {
    /// Recent calls kept in the call log; 0 disables it.
    pub call_log_capacity: usize,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            call_log_capacity: 50,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub llm: LlmSettings,
    pub limits: Limits,
    pub preview: PreviewSettings,
    pub memory: MemorySettings,
    pub observability: ObservabilitySettings,
}

impl EngineConfig {
    /// Path of the configuration file for a workspace.
    pub fn path(workspace_root: &Path) -> PathBuf {
        workspace_root.join(FORGE_DIR).join(CONFIG_FILE)
    }

    /// Load the workspace file (if any) and apply environment overrides.
    pub fn load(workspace_root: &Path) -> EngineResult<Self> {
        let mut config = Self::from_file(&Self::path(workspace_root))?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Parse a configuration file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> EngineResult<Self> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> EngineResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(provider) = var("FORGE_LLM_PROVIDER") {
            self.llm.provider = Some(provider);
        }
        if let Some(model) = var("FORGE_LLM_MODEL") {
            self.llm.model = Some(model);
        }
        if let Some(model) = var("FORGE_EMBEDDING_MODEL") {
            self.llm.embedding_model = model;
        }
        if let Some(value) = var("FORGE_BUILD_FIX_CEILING") {
            self.limits.build_fix_ceiling = parse_number("FORGE_BUILD_FIX_CEILING", &value)?;
        }
        if let Some(value) = var("FORGE_PREVIEW_FIX_CEILING") {
            self.limits.preview_fix_ceiling = parse_number("FORGE_PREVIEW_FIX_CEILING", &value)?;
        }
        if let Some(value) = var("FORGE_PREVIEW_TTL_MINUTES") {
            self.preview.ttl_minutes = parse_number("FORGE_PREVIEW_TTL_MINUTES", &value)?;
        }
        if let Some(value) = var("FORGE_MEMORY_MAX_CHARS") {
            self.memory.max_injected_chars = parse_number("FORGE_MEMORY_MAX_CHARS", &value)?;
        }
        Ok(())
    }

    /// Write the configuration as TOML.
    pub fn save(&self, workspace_root: &Path) -> EngineResult<()> {
        let path = Self::path(workspace_root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> EngineResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EngineError::Config(format!("{} must be a number, got {:?}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.limits.build_fix_ceiling, 3);
        assert_eq!(config.limits.preview_fix_ceiling, 2);
        assert_eq!(config.limits.tool_rounds, 3);
        assert_eq!(config.preview.ttl_minutes, 30);
        assert_eq!(config.memory.max_injected_chars, 4000);
        assert_eq!(config.observability.call_log_capacity, 50);
        assert_eq!(config.llm.embeddings, EmbeddingBackend::Hash);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [limits]
            build_fix_ceiling = 5

            [llm]
            provider = "anthropic"
            "#,
        )
        .unwrap();

        assert_eq!(config.limits.build_fix_ceiling, 5);
        assert_eq!(config.limits.preview_fix_ceiling, 2);
        assert_eq!(config.llm.provider.as_deref(), Some("anthropic"));
        assert_eq!(config.llm.embedding_model, "text-embedding-3-small");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FORGE_PREVIEW_TTL_MINUTES", "5"),
            ("FORGE_PREVIEW_FIX_CEILING", "4"),
            ("FORGE_LLM_MODEL", "gpt-test"),
            ("FORGE_LLM_PROVIDER", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.preview.ttl_minutes, 5);
        assert_eq!(config.limits.preview_fix_ceiling, 4);
        assert_eq!(config.llm.model.as_deref(), Some("gpt-test"));
        assert_eq!(config.llm.provider, None);
    }

    #[test]
    fn test_bad_override_is_config_error() {
        let mut config = EngineConfig::default();
        let result = config.apply_overrides(|name| {
            (name == "FORGE_BUILD_FIX_CEILING").then(|| "three".to_string())
        });
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp = tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.limits.max_branches = 4;
        config.save(temp.path()).unwrap();

        let loaded = EngineConfig::from_file(&EngineConfig::path(temp.path())).unwrap();
        assert_eq!(loaded.limits.max_branches, 4);
    }
}
