//! Design stages: Decompose, Branch and Map.

use std::collections::{BTreeMap, HashSet};

use forge_build::FileMap;
use forge_llm::{ChatMessage, SamplingOptions, ToolDefinition, ToolHandler};
use forge_memory::{MemoryContext, MemorySearchTool};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::contracts::Contract;
use super::prompts::{self, fill};
use super::{decode, degrade, pretty, truncate_chars, with_memory, StagePipeline, ToolUse};
use crate::error::EngineResult;
use crate::model::{Branch, Decomposition, Dimension, ExplorationOption, ExplorationSession};

const MAX_CANDIDATES: usize = 4;
const CODE_EXCERPT_CHARS: usize = 3000;
const LEDGER_ITEMS: usize = 5;

/// The project's existing game, for contextual decomposition.
#[derive(Debug, Clone, Default)]
pub struct CurrentGame {
    pub files: FileMap,
    pub decided_context: Option<String>,
}

/// Summarize what an earlier session already settled.
pub fn decided_context(
    session: &ExplorationSession,
    selected: Option<&ExplorationOption>,
) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(opt) = selected {
        parts.push(format!("Game: {}", opt.title));
        parts.push(format!("Core loop: {}", opt.core_loop));
        parts.push(format!("Controls: {}", opt.controls));
        parts.push(format!("Mechanics: {}", opt.mechanics.join(", ")));
        parts.push(format!("Complexity: {}", opt.complexity));
        parts.push(format!("Mobile fit: {}", opt.mobile_fit));
    }
    if session.iteration_count > 0 {
        parts.push(format!("Iterations done: {}", session.iteration_count));
    }
    let ledger = &session.hypothesis_ledger;
    if !ledger.validated.is_empty() {
        let items: Vec<&str> = ledger.validated.iter().take(LEDGER_ITEMS).map(String::as_str).collect();
        parts.push(format!("Validated: {}", items.join(", ")));
    }
    if !ledger.rejected.is_empty() {
        let items: Vec<&str> = ledger.rejected.iter().take(LEDGER_ITEMS).map(String::as_str).collect();
        parts.push(format!("Rejected: {}", items.join(", ")));
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

/// Lowercase snake_case form of a dimension name.
fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.trim().chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// First `{prefix}{n}` not taken yet, counting from `n`.
fn fresh_id(prefix: &str, mut n: usize, taken: &HashSet<String>) -> String {
    loop {
        let id = format!("{}{}", prefix, n);
        if !taken.contains(&id) {
            return id;
        }
        n += 1;
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    let value = value.trim();
    if !value.is_empty() && !list.iter().any(|v| v.eq_ignore_ascii_case(value)) {
        list.push(value.to_string());
    }
}

/// Enforce the ambiguity map's shape: snake_case keys, 2 to 4 distinct
/// candidates per dimension. Single-candidate dimensions are not open, so
/// they move to the hard constraints.
fn normalize_decomposition(raw: Decomposition) -> Decomposition {
    let mut merged: BTreeMap<String, Dimension> = BTreeMap::new();
    for (name, dim) in raw.dimensions {
        let key = snake_case(&name);
        if key.is_empty() {
            continue;
        }
        let entry = merged.entry(key).or_default();
        for candidate in &dim.candidates {
            push_unique(&mut entry.candidates, candidate);
        }
        for signal in &dim.signals {
            push_unique(&mut entry.signals, signal);
        }
        if entry.confidence.is_empty() {
            entry.confidence = dim.confidence;
        }
    }

    let mut hard_constraints = Vec::new();
    for constraint in &raw.hard_constraints {
        push_unique(&mut hard_constraints, constraint);
    }

    let mut dimensions = BTreeMap::new();
    for (key, mut dim) in merged {
        match dim.candidates.len() {
            0 => debug!(dimension = %key, "Dropping dimension without candidates"),
            1 => push_unique(&mut hard_constraints, &format!("{}: {}", key, dim.candidates[0])),
            _ => {
                dim.candidates.truncate(MAX_CANDIDATES);
                dimensions.insert(key, dim);
            }
        }
    }

    Decomposition {
        summary: raw.summary.trim().to_string(),
        dimensions,
        hard_constraints,
        open_questions: raw.open_questions,
        locked: raw.locked,
    }
}

/// Keep branches that pick exactly one value for every open dimension and
/// differ from each other; give them unique ids.
fn normalize_branches(raw: Vec<Branch>, decomposition: &Decomposition, max: usize) -> Vec<Branch> {
    let keys = decomposition.dimension_keys();
    let mut seen_shapes = HashSet::new();
    let mut seen_ids = HashSet::new();
    let mut branches = Vec::new();

    for mut branch in raw {
        let picked: BTreeMap<String, String> = branch
            .picked
            .iter()
            .map(|(k, v)| (snake_case(k), v.trim().to_string()))
            .filter(|(k, v)| keys.contains(k) && !v.is_empty())
            .collect();
        if picked.len() != keys.len() {
            debug!(branch = %branch.branch_id, "Dropping branch with incomplete picks");
            continue;
        }
        branch.picked = picked;

        let mut mechanics = branch.core_mechanics.clone();
        mechanics.sort();
        let shape = (
            branch.picked.clone(),
            mechanics,
            branch.gameplay_hook.trim().to_lowercase(),
        );
        if !seen_shapes.insert(shape) {
            debug!(branch = %branch.branch_id, "Dropping duplicate branch");
            continue;
        }

        if branch.branch_id.trim().is_empty() || seen_ids.contains(&branch.branch_id) {
            branch.branch_id = fresh_id("B", branches.len() + 1, &seen_ids);
        }
        seen_ids.insert(branch.branch_id.clone());
        branches.push(branch);

        if branches.len() == max {
            break;
        }
    }
    branches
}

#[derive(Deserialize)]
struct OptionsReply {
    #[serde(default)]
    options: Vec<Value>,
    #[serde(default)]
    recommended_option_id: Option<String>,
}

/// Unique ids, explicit archetypes and exactly one recommendation.
fn normalize_options(
    reply: OptionsReply,
    max: usize,
    stage: &str,
) -> EngineResult<Vec<ExplorationOption>> {
    let mut options = Vec::new();
    let mut seen_ids = HashSet::new();

    for mut value in reply.options.into_iter().take(max) {
        if let Value::Object(map) = &mut value {
            if !map.contains_key("game_type") {
                if let Some(template) = map.remove("template_id") {
                    map.insert("game_type".to_string(), template);
                }
            }
        }
        let mut option: ExplorationOption = decode(stage, value)?;
        if option.option_id.trim().is_empty() || seen_ids.contains(&option.option_id) {
            option.option_id = fresh_id("opt_", options.len() + 1, &seen_ids);
        }
        if option.title.trim().is_empty() {
            option.title = "Untitled".to_string();
        }
        seen_ids.insert(option.option_id.clone());
        options.push(option);
    }

    let recommended = reply
        .recommended_option_id
        .filter(|id| options.iter().any(|o| &o.option_id == id))
        .or_else(|| options.iter().find(|o| o.is_recommended).map(|o| o.option_id.clone()))
        .or_else(|| options.first().map(|o| o.option_id.clone()));
    for option in &mut options {
        option.is_recommended = recommended.as_deref() == Some(option.option_id.as_str());
    }
    Ok(options)
}

fn design_context(decomposition: &Decomposition) -> String {
    let mut parts = Vec::new();
    if !decomposition.summary.is_empty() {
        parts.push(format!("Summary: {}", decomposition.summary));
    }
    if !decomposition.hard_constraints.is_empty() {
        parts.push(format!(
            "Hard constraints: {}",
            serde_json::to_string(&decomposition.hard_constraints).unwrap_or_default()
        ));
    }
    if let Some(locked) = &decomposition.locked {
        parts.push(format!(
            "Locked decisions: {}",
            serde_json::to_string(locked).unwrap_or_default()
        ));
    }
    if parts.is_empty() {
        "No additional context.".to_string()
    } else {
        parts.join("\n")
    }
}

impl StagePipeline {
    fn memory_tool<'a>(
        &self,
        search: &'a dyn ToolHandler,
        tools: &'a [ToolDefinition],
    ) -> ToolUse<'a> {
        ToolUse {
            tools,
            handler: search,
            max_rounds: self.limits.tool_rounds,
        }
    }

    /// Decompose a request into open dimensions and hard constraints.
    pub async fn decompose(
        &self,
        user_input: &str,
        current: Option<&CurrentGame>,
        memory_block: &str,
        search: &dyn ToolHandler,
    ) -> EngineResult<Decomposition> {
        let (label, system) = match current {
            Some(game) if !game.files.is_empty() => {
                let mut code = String::new();
                for (path, content) in &game.files {
                    code.push_str(&format!(
                        "--- {} ---\n{}\n\n",
                        path,
                        truncate_chars(content, CODE_EXCERPT_CHARS)
                    ));
                }
                let decided = game
                    .decided_context
                    .as_deref()
                    .unwrap_or("No prior decisions recorded.");
                (
                    "A:decompose(contextual)",
                    fill(
                        prompts::DECOMPOSE_CONTEXTUAL,
                        &[("current_code", &code), ("decided_context", decided)],
                    ),
                )
            }
            _ => ("A:decompose(fresh)", prompts::DECOMPOSE_FRESH.to_string()),
        };

        let messages = with_memory(
            vec![ChatMessage::system(system), ChatMessage::user(user_input)],
            memory_block,
        );
        let tools = [MemorySearchTool::definition()];
        let result = self
            .json(
                label,
                Contract::Decompose,
                messages,
                SamplingOptions::new(0.7, 4000),
                Some(self.memory_tool(search, &tools)),
            )
            .await
            .and_then(|value| decode::<Decomposition>(label, value));

        let decomposition = degrade(label, result, || Decomposition::summary_only(user_input))?;
        let decomposition = normalize_decomposition(decomposition);
        info!(
            dimensions = decomposition.dimensions.len(),
            constraints = decomposition.hard_constraints.len(),
            "Decomposed request"
        );
        Ok(decomposition)
    }

    /// Synthesize distinct branches over the open dimensions.
    pub async fn branch(
        &self,
        decomposition: &Decomposition,
        memory: &MemoryContext,
        memory_block: &str,
        search: &dyn ToolHandler,
    ) -> EngineResult<Vec<Branch>> {
        const LABEL: &str = "B:branches";

        let locked_context = decomposition
            .locked
            .as_ref()
            .map(|locked| format!("Locked decisions (do NOT change these):\n{}", pretty(locked)))
            .unwrap_or_default();
        let system = fill(
            prompts::BRANCH,
            &[
                ("memory_context", &pretty(memory)),
                ("dimensions_json", &pretty(&decomposition.dimensions)),
                ("locked_context", &locked_context),
            ],
        );

        let messages = with_memory(
            vec![ChatMessage::system(system), ChatMessage::user("Synthesize branches")],
            memory_block,
        );
        let tools = [MemorySearchTool::definition()];
        let result = self
            .json(
                LABEL,
                Contract::Branches,
                messages,
                SamplingOptions::new(0.7, 4000),
                Some(self.memory_tool(search, &tools)),
            )
            .await
            .and_then(|value| decode::<Vec<Branch>>(LABEL, value["branches"].clone()));

        let raw = degrade(LABEL, result, Vec::new)?;
        let received = raw.len();
        let branches = normalize_branches(raw, decomposition, self.limits.max_branches);
        if branches.len() < self.limits.min_branches {
            warn!(
                received,
                usable = branches.len(),
                min = self.limits.min_branches,
                "Too few usable branches"
            );
            return Ok(Vec::new());
        }
        info!(branches = branches.len(), "Synthesized branches");
        Ok(branches)
    }

    /// Turn branches into option cards. No branches means no call.
    pub async fn map_options(
        &self,
        branches: &[Branch],
        decomposition: &Decomposition,
    ) -> EngineResult<Vec<ExplorationOption>> {
        const LABEL: &str = "C:mapper";

        if branches.is_empty() {
            return Ok(Vec::new());
        }

        let system = fill(
            prompts::MAP_OPTIONS,
            &[
                ("branches_json", &pretty(&branches)),
                ("design_context", &design_context(decomposition)),
            ],
        );
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user("Map branches to options"),
        ];
        let result = self
            .json(LABEL, Contract::Options, messages, SamplingOptions::new(0.7, 4000), None)
            .await
            .and_then(|value| decode::<OptionsReply>(LABEL, value))
            .and_then(|reply| normalize_options(reply, branches.len(), LABEL));

        let options = degrade(LABEL, result, Vec::new)?;
        info!(options = options.len(), "Mapped options");
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feel::Archetype;
    use serde_json::json;

    fn dims(keys: &[&str]) -> Decomposition {
        let mut d = Decomposition::summary_only("test");
        for key in keys {
            d.dimensions.insert(
                key.to_string(),
                Dimension {
                    candidates: vec!["a".into(), "b".into()],
                    ..Default::default()
                },
            );
        }
        d
    }

    fn branch(id: &str, picks: &[(&str, &str)], hook: &str) -> Branch {
        Branch {
            branch_id: id.into(),
            gameplay_hook: hook.into(),
            picked: picks.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("Enemy Behavior"), "enemy_behavior");
        assert_eq!(snake_case("  power-up types "), "power_up_types");
        assert_eq!(snake_case("tone"), "tone");
        assert_eq!(snake_case("--"), "");
    }

    #[test]
    fn test_decomposition_shape_is_enforced() {
        let raw: Decomposition = serde_json::from_value(json!({
            "summary": " a runner ",
            "dimensions": {
                "Controls": {"candidates": ["tap", "swipe"]},
                "controls": {"candidates": ["Tap", "tilt", "keys", "mouse", "voice"]},
                "platform": {"candidates": ["mobile"]},
                "tone": {"candidates": []}
            },
            "hard_constraints": ["endless"]
        }))
        .unwrap();

        let d = normalize_decomposition(raw);
        assert_eq!(d.summary, "a runner");
        assert_eq!(d.dimension_keys(), vec!["controls".to_string()]);
        assert_eq!(d.dimensions["controls"].candidates, vec!["tap", "swipe", "tilt", "keys"]);
        assert_eq!(d.hard_constraints, vec!["endless", "platform: mobile"]);
    }

    #[test]
    fn test_branches_cover_every_dimension() {
        let d = dims(&["controls", "tone"]);
        let raw = vec![
            branch("B1", &[("controls", "tap"), ("tone", "retro")], "dash"),
            branch("B2", &[("controls", "tap")], "missing tone"),
            branch("B1", &[("controls", "swipe"), ("tone", "cute"), ("extra", "x")], "glide"),
            branch("B4", &[("controls", "tap"), ("tone", "retro")], "Dash"),
        ];

        let branches = normalize_branches(raw, &d, 6);
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0].branch_id, "B1");
        assert_eq!(branches[1].branch_id, "B2");
        for b in &branches {
            assert_eq!(b.picked.len(), 2);
        }
    }

    #[test]
    fn test_branch_cap() {
        let d = dims(&["tone"]);
        let raw = (0..9)
            .map(|i| branch(&format!("B{}", i), &[("tone", "retro")], &format!("hook {}", i)))
            .collect();
        assert_eq!(normalize_branches(raw, &d, 6).len(), 6);
    }

    #[test]
    fn test_exactly_one_recommended() {
        let reply = OptionsReply {
            options: vec![
                json!({"option_id": "opt_1", "title": "Hop", "is_recommended": true}),
                json!({"option_id": "opt_1", "title": "Dash", "is_recommended": true}),
                json!({"title": "", "template_id": "runner_endless"}),
            ],
            recommended_option_id: Some("nope".into()),
        };
        let options = normalize_options(reply, 3, "C:mapper").unwrap();
        let ids: Vec<&str> = options.iter().map(|o| o.option_id.as_str()).collect();
        assert_eq!(ids, vec!["opt_1", "opt_2", "opt_3"]);
        assert_eq!(options.iter().filter(|o| o.is_recommended).count(), 1);
        assert!(options[0].is_recommended);
        assert_eq!(options[2].title, "Untitled");
        assert_eq!(options[2].game_type, Archetype::Runner);
    }

    #[test]
    fn test_named_recommendation_wins() {
        let reply = OptionsReply {
            options: vec![
                json!({"option_id": "opt_1", "title": "Hop", "is_recommended": true}),
                json!({"option_id": "opt_2", "title": "Dash"}),
            ],
            recommended_option_id: Some("opt_2".into()),
        };
        let options = normalize_options(reply, 5, "C:mapper").unwrap();
        assert!(!options[0].is_recommended);
        assert!(options[1].is_recommended);
    }

    #[test]
    fn test_decided_context_lists_choices() {
        let mut session = ExplorationSession::new("p1", "a runner", Decomposition::default());
        assert!(decided_context(&session, None).is_none());

        session.iteration_count = 2;
        session.hypothesis_ledger.validated = (0..7).map(|i| format!("v{}", i)).collect();
        let text = decided_context(&session, None).unwrap();
        assert!(text.contains("Iterations done: 2"));
        assert!(text.contains("Validated: v0, v1, v2, v3, v4"));
        assert!(!text.contains("v5"));
    }

    #[test]
    fn test_design_context_fallback() {
        assert_eq!(design_context(&Decomposition::default()), "No additional context.");
        let mut d = Decomposition::summary_only("A runner");
        d.hard_constraints.push("endless".into());
        assert_eq!(design_context(&d), "Summary: A runner\nHard constraints: [\"endless\"]");
    }
}
