//! Artifact stages: Feel-Spec, Generate, Iterate, Finish and runtime fixes.

use forge_build::{check_structure, is_html, normalize_path, FileMap, ROOT_DOCUMENT};
use forge_llm::{ChatMessage, SamplingOptions};
use forge_memory::{FeelProfile, FinalChoice, NoteContent};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::contracts::Contract;
use super::prompts::{self, fill};
use super::{decode, degrade, pretty, truncate_chars, StagePipeline};
use crate::error::{EngineError, EngineResult};
use crate::feel;
use crate::model::{ExplorationOption, ExplorationSession, RuntimeErrorReport, VersionId};

const FILE_EXCERPT_CHARS: usize = 3000;
const MAX_REPORTED_ERRORS: usize = 5;
const STACK_LINES: usize = 3;

/// Render client-reported runtime errors for the fix prompt.
pub fn format_runtime_errors(errors: &[RuntimeErrorReport]) -> String {
    let mut lines = Vec::new();
    for error in errors.iter().take(MAX_REPORTED_ERRORS) {
        let line = error
            .line
            .map(|l| l.to_string())
            .unwrap_or_else(|| "?".to_string());
        lines.push(format!("- Line {}: {}", line, error.message_or_default()));
        if let Some(stack) = error.stack.as_deref().filter(|s| !s.is_empty()) {
            let preview: Vec<&str> = stack.lines().take(STACK_LINES).collect();
            lines.push(format!("  Stack: {}", preview.join("\n")));
        }
    }
    lines.join("\n")
}

/// Keep only entries whose path is safe to write.
fn sanitize_file_map(stage: &str, raw: FileMap) -> FileMap {
    let mut files = FileMap::new();
    for (path, content) in raw {
        match normalize_path(&path) {
            Ok(path) => {
                files.insert(path, content);
            }
            Err(e) => warn!(stage, path = %path, "Skipping returned file: {}", e),
        }
    }
    files
}

/// Whether `after` lost a structural section `before` had.
fn loses_structure(before: &str, after: &str) -> bool {
    let old_errors = check_structure(before).errors;
    check_structure(after)
        .errors
        .iter()
        .any(|e| !old_errors.contains(e))
}

/// Note assembled from session data when the memory writer fails.
fn fallback_finish_note(
    session: &ExplorationSession,
    selected: Option<&ExplorationOption>,
) -> NoteContent {
    let ledger = &session.hypothesis_ledger;
    let title = match selected {
        Some(opt) => format!("Exploration: {}", opt.title),
        None => format!("Exploration: {}", truncate_chars(&session.user_input, 60)),
    };
    let summary = format!(
        "User requested: \"{}\". Finished after {} iteration(s){}.",
        session.user_input,
        session.iteration_count,
        selected
            .map(|o| format!(" with \"{}\"", o.title))
            .unwrap_or_default()
    );

    NoteContent {
        title,
        summary,
        final_choice: selected.map(|o| FinalChoice {
            option_id: o.option_id.clone(),
            why: "Selected during exploration".to_string(),
        }),
        validated_hypotheses: ledger.validated.clone(),
        rejected_hypotheses: ledger.rejected.clone(),
        pitfalls_and_guards: ledger.open_questions.clone(),
        dimensions: session.decomposition.dimension_keys(),
        hard_constraints: session.decomposition.hard_constraints.clone(),
        feel_spec: ledger.feel_spec.clone(),
        ..Default::default()
    }
}

impl StagePipeline {
    /// Feel micro-spec for one option, seeded from its archetype baseline.
    pub async fn feel_spec(
        &self,
        option: &ExplorationOption,
        user_input: &str,
        profile: &FeelProfile,
    ) -> EngineResult<Value> {
        const LABEL: &str = "D:feel_spec";

        let archetype = option.game_type.baseline_archetype();
        let baseline = feel::baseline(archetype);
        let mechanics = serde_json::to_string(&option.mechanics).unwrap_or_default();
        let system = fill(
            prompts::FEEL_SPEC,
            &[
                ("game_type", archetype.as_str()),
                ("game_type_defaults", &pretty(&baseline)),
                ("user_profile", &pretty(profile)),
                ("title", &option.title),
                ("core_loop", &option.core_loop),
                ("controls", &option.controls),
                ("mechanics", &mechanics),
                ("complexity", &option.complexity),
                ("mobile_fit", &option.mobile_fit),
                ("user_input", user_input),
            ],
        );
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user("Generate feel micro-spec"),
        ];
        let result = self
            .json(LABEL, Contract::FeelSpec, messages, SamplingOptions::new(0.7, 4000), None)
            .await;
        degrade(LABEL, result, || baseline)
    }

    /// Full artifact for an option, written from scratch.
    pub async fn generate(
        &self,
        option: &ExplorationOption,
        user_input: &str,
        feel_spec: &Value,
    ) -> EngineResult<FileMap> {
        const LABEL: &str = "E:generate";

        let mechanics = serde_json::to_string(&option.mechanics).unwrap_or_default();
        let system = fill(
            prompts::GENERATE,
            &[
                ("feel_policy", prompts::GAME_FEEL_POLICY),
                ("title", &option.title),
                ("core_loop", &option.core_loop),
                ("controls", &option.controls),
                ("mechanics", &mechanics),
                ("complexity", &option.complexity),
                ("mobile_fit", &option.mobile_fit),
                ("feel_spec", &pretty(feel_spec)),
                ("user_input", user_input),
            ],
        );
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user("Generate game code"),
        ];
        let result = self
            .json(LABEL, Contract::FileMap, messages, SamplingOptions::new(0.7, 12000), None)
            .await
            .and_then(|value| decode::<FileMap>(LABEL, value));

        let files = sanitize_file_map(LABEL, degrade(LABEL, result, FileMap::new)?);
        info!(files = files.len(), "Generated artifact");
        Ok(files)
    }

    /// Apply a refinement request to the current files.
    ///
    /// Every existing path survives. A returned HTML file that drops a
    /// structural section its previous content had is ignored.
    pub async fn iterate(
        &self,
        current: &FileMap,
        feel_spec: Option<&Value>,
        user_input: &str,
    ) -> EngineResult<FileMap> {
        const LABEL: &str = "iterate";

        let excerpts: FileMap = current
            .iter()
            .map(|(path, content)| {
                (path.clone(), truncate_chars(content, FILE_EXCERPT_CHARS).to_string())
            })
            .collect();
        let feel_text = feel_spec
            .filter(|spec| spec.as_object().map_or(true, |m| !m.is_empty()))
            .map(pretty)
            .unwrap_or_else(|| prompts::NO_FEEL_SPEC.to_string());
        let system = fill(
            prompts::ITERATE,
            &[
                ("feel_policy", prompts::GAME_FEEL_POLICY),
                ("feel_spec", &feel_text),
                ("current_files", &pretty(&excerpts)),
                ("user_input", user_input),
            ],
        );
        let messages = vec![ChatMessage::system(system), ChatMessage::user(user_input)];
        let result = self
            .json(LABEL, Contract::FileMap, messages, SamplingOptions::new(0.7, 8000), None)
            .await
            .and_then(|value| decode::<FileMap>(LABEL, value));
        let changes = sanitize_file_map(LABEL, degrade(LABEL, result, FileMap::new)?);

        let mut files = current.clone();
        let mut changed = 0;
        for (path, content) in changes {
            if is_html(&path) {
                if let Some(before) = current.get(&path) {
                    if loses_structure(before, &content) {
                        warn!(path = %path, "Ignoring change that drops document structure");
                        continue;
                    }
                }
            }
            files.insert(path, content);
            changed += 1;
        }
        info!(changed, "Iterated artifact");
        Ok(files)
    }

    /// Consolidated memory note for a finished session.
    pub async fn finish_note(
        &self,
        session: &ExplorationSession,
        selected: Option<&ExplorationOption>,
        stable_version: Option<VersionId>,
    ) -> EngineResult<NoteContent> {
        const LABEL: &str = "finish_exploration";

        let selected_json = selected
            .map(|o| {
                json!({
                    "option_id": o.option_id,
                    "title": o.title,
                    "core_loop": o.core_loop,
                    "game_type": o.game_type,
                })
            })
            .unwrap_or(Value::Null);
        let system = fill(
            prompts::MEMORY_WRITER,
            &[
                ("user_input", &session.user_input),
                ("selected_option", &selected_json.to_string()),
                ("iteration_count", &session.iteration_count.to_string()),
                (
                    "hypothesis_ledger",
                    &serde_json::to_string(&session.hypothesis_ledger).unwrap_or_default(),
                ),
                (
                    "ambiguity_json",
                    &serde_json::to_string(&session.decomposition).unwrap_or_default(),
                ),
            ],
        );
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user("Generate structured memory"),
        ];
        let result = self
            .json(LABEL, Contract::MemoryNote, messages, SamplingOptions::new(0.7, 4000), None)
            .await
            .and_then(|value| decode::<NoteContent>(LABEL, value));

        let mut note = degrade(LABEL, result, || fallback_finish_note(session, selected))?;
        note.extra.insert(
            "refs".to_string(),
            json!({
                "exploration_session_id": session.id,
                "stable_version_id": stable_version,
            }),
        );
        Ok(note)
    }

    /// Corrected root document for a preview that failed at runtime.
    ///
    /// There is no fallback: a reply without a root document is an error.
    pub async fn fix_runtime(&self, code: &str, errors: &[RuntimeErrorReport]) -> EngineResult<String> {
        const LABEL: &str = "fix_preview";

        let system = fill(
            prompts::FIX_PREVIEW,
            &[("errors", &format_runtime_errors(errors)), ("code", code)],
        );
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user("Fix the runtime errors"),
        ];
        let value = self
            .json(LABEL, Contract::FileMap, messages, SamplingOptions::new(0.7, 8000), None)
            .await?;
        let files: FileMap = decode(LABEL, value)?;

        files
            .get(ROOT_DOCUMENT)
            .filter(|html| !html.trim().is_empty())
            .cloned()
            .ok_or_else(|| EngineError::contract(LABEL, "Fix reply contains no index.html"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Decomposition;

    const PAGE: &str = "<!DOCTYPE html><html><head></head><body></body></html>";

    #[test]
    fn test_runtime_error_formatting() {
        let mut with_stack = RuntimeErrorReport::new("x is undefined");
        with_stack.line = Some(42);
        with_stack.stack = Some("at a\nat b\nat c\nat d".into());
        let errors = vec![with_stack, RuntimeErrorReport::default()];

        assert_eq!(
            format_runtime_errors(&errors),
            "- Line 42: x is undefined\n  Stack: at a\nat b\nat c\n- Line ?: unknown error"
        );
    }

    #[test]
    fn test_at_most_five_errors() {
        let errors: Vec<_> = (0..8).map(|i| RuntimeErrorReport::new(format!("e{}", i))).collect();
        let text = format_runtime_errors(&errors);
        assert_eq!(text.lines().count(), 5);
        assert!(!text.contains("e5"));
    }

    #[test]
    fn test_structure_loss_detection() {
        assert!(loses_structure(PAGE, "<html><body></body></html>"));
        assert!(!loses_structure(PAGE, PAGE));
        assert!(!loses_structure("<body></body>", "<body>still no head</body>"));
    }

    #[test]
    fn test_unsafe_paths_are_dropped() {
        let mut raw = FileMap::new();
        raw.insert("./index.html".into(), PAGE.into());
        raw.insert("../escape.js".into(), "x".into());
        let files = sanitize_file_map("E:generate", raw);
        assert_eq!(files.keys().collect::<Vec<_>>(), vec!["index.html"]);
    }

    #[test]
    fn test_fallback_note_uses_session_data() {
        let mut session = ExplorationSession::new("p1", "a tiny runner", Decomposition::default());
        session.iteration_count = 2;
        session.hypothesis_ledger.validated.push("tap to jump works".into());

        let note = fallback_finish_note(&session, None);
        assert_eq!(note.title, "Exploration: a tiny runner");
        assert!(note.summary.contains("2 iteration(s)"));
        assert_eq!(note.validated_hypotheses, vec!["tap to jump works"]);
        assert!(note.final_choice.is_none());
    }
}
