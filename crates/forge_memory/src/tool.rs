//! The `search_memory` tool offered to the reasoning service.

use std::sync::Arc;

use async_trait::async_trait;
use forge_llm::{ToolCall, ToolDefinition, ToolHandler};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::MemoryResult;
use crate::note::{MemoryNote, NoteKind};
use crate::store::MemoryStore;

pub const SEARCH_MEMORY_TOOL: &str = "search_memory";

/// Returned when a search has nothing to show.
pub const NO_MEMORIES: &str = "No relevant memories found for this project.";

/// Keyword and type filtered search over one project's notes.
pub struct MemorySearchTool {
    store: Arc<dyn MemoryStore>,
    project_id: String,
    scan_limit: usize,
    result_limit: usize,
}

impl MemorySearchTool {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        project_id: impl Into<String>,
        scan_limit: usize,
        result_limit: usize,
    ) -> Self {
        Self {
            store,
            project_id: project_id.into(),
            scan_limit,
            result_limit,
        }
    }

    /// Tool definition advertised to the service.
    pub fn definition() -> ToolDefinition {
        ToolDefinition::new(
            SEARCH_MEMORY_TOOL,
            "Search past exploration memories for relevant strategy paths, design decisions, \
             user preferences, validated/rejected hypotheses, and lessons learned from \
             previous game explorations.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to search for, e.g. 'runner game controls', \
                                        'mobile tap games', 'what was rejected before'"
                    },
                    "filter_type": {
                        "type": "string",
                        "enum": ["all", "design_decision", "exploration_finish"],
                        "description": "Filter by memory type. 'all' returns everything."
                    }
                },
                "required": ["query"]
            }),
        )
    }

    /// Run a search and render the result block.
    pub async fn search(&self, query: &str, filter_type: Option<&str>) -> MemoryResult<String> {
        let filter = match filter_type {
            None | Some("all") | Some("") => None,
            Some(other) => Some(NoteKind::parse(other)),
        };
        let accepts = |note: &MemoryNote| match filter {
            None => true,
            Some(kind) => kind == Some(note.kind),
        };

        let notes = self
            .store
            .project_notes(&self.project_id, Some(self.scan_limit))
            .await?;
        let preference = self.store.preference(&self.project_id).await?;

        let query = query.to_lowercase();
        let terms: Vec<&str> = query.split_whitespace().collect();

        let mut matched: Vec<&MemoryNote> = notes
            .iter()
            .filter(|n| accepts(n))
            .filter(|n| {
                if terms.is_empty() {
                    return true;
                }
                let text = n.search_text();
                terms.iter().any(|t| text.contains(t))
            })
            .collect();

        if matched.is_empty() {
            // Nothing matched: fall back to the newest notes.
            matched = notes
                .iter()
                .take(self.result_limit)
                .filter(|n| accepts(n))
                .collect();
        }

        let mut parts = Vec::new();
        if let Some(pref) = preference {
            parts.push(format!(
                "User Preferences: {}",
                Value::Object(pref.preferences)
            ));
        }
        for (i, note) in matched.iter().take(self.result_limit).enumerate() {
            parts.push(render_note(i + 1, note));
        }

        debug!(
            project = %self.project_id,
            matched = matched.len(),
            "Memory search"
        );

        if parts.is_empty() {
            Ok(NO_MEMORIES.to_string())
        } else {
            Ok(parts.join("\n"))
        }
    }
}

fn render_note(index: usize, note: &MemoryNote) -> String {
    let c = &note.content;
    let title = if c.title.is_empty() { "Untitled" } else { &c.title };
    let mut entry = format!("\n--- Memory #{}: {} ---", index, title);

    if !c.summary.is_empty() {
        entry.push_str(&format!("\nSummary: {}", c.summary));
    }
    entry.push_str(&format!("\nType: {}", note.kind));
    if let Some(selected) = &c.selected_option {
        entry.push_str(&format!("\nSelected: {}", selected));
    }
    if !c.validated_hypotheses.is_empty() {
        entry.push_str(&format!("\nValidated: {}", json!(c.validated_hypotheses)));
    }
    if !c.rejected_hypotheses.is_empty() {
        entry.push_str(&format!("\nRejected: {}", json!(c.rejected_hypotheses)));
    }
    if !c.key_decisions.is_empty() {
        entry.push_str(&format!("\nKey decisions: {}", json!(c.key_decisions)));
    }
    if !c.pitfalls_and_guards.is_empty() {
        entry.push_str(&format!("\nPitfalls: {}", json!(c.pitfalls_and_guards)));
    }
    if !c.dimensions.is_empty() {
        entry.push_str(&format!("\nDimensions explored: {}", json!(c.dimensions)));
    }
    if !c.hard_constraints.is_empty() {
        entry.push_str(&format!("\nConstraints: {}", json!(c.hard_constraints)));
    }
    if !c.user_preferences.is_empty() {
        entry.push_str(&format!("\nPreferences: {}", json!(c.user_preferences)));
    }
    entry
}

#[async_trait]
impl ToolHandler for MemorySearchTool {
    async fn handle(&self, call: &ToolCall) -> String {
        if call.name != SEARCH_MEMORY_TOOL {
            return format!("Unknown tool: {}", call.name);
        }

        let query = call.string_argument("query").unwrap_or_default();
        let filter = call.string_argument("filter_type");
        match self.search(&query, filter.as_deref()).await {
            Ok(result) => result,
            Err(e) => {
                warn!(project = %self.project_id, "Memory search failed: {}", e);
                NO_MEMORIES.to_string()
            }
        }
    }
}
