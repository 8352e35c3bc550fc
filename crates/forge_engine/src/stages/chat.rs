//! Chat stages: Intent, Answer, Plan, Build, Fix and fact extraction.

use async_trait::async_trait;
use forge_build::{normalize_path, FileMap, FileOp};
use forge_llm::{ChatMessage, SamplingOptions, ToolCall, ToolDefinition, ToolHandler};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::contracts::Contract;
use super::prompts;
use super::{decode, degrade, pretty, truncate_chars, with_memory, StagePipeline, ToolUse};
use crate::error::EngineResult;
use crate::events::ProgressSink;
use crate::model::{ChatRole, ChatTurn};

pub const WRITE_FILE_TOOL: &str = "write_file";
pub const DELETE_FILE_TOOL: &str = "delete_file";

const INTENT_HISTORY: usize = 10;
const FACTS_HISTORY: usize = 6;
const FACTS_TURN_CHARS: usize = 500;
const MAX_FACTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Create,
    Modify,
    Delete,
    Question,
    Other,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
            Self::Question => "question",
            Self::Other => "other",
        }
    }
}

/// Classified chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub intent_type: IntentType,
    #[serde(default = "default_complexity")]
    pub complexity: String,
    #[serde(default)]
    pub affected_areas: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

fn default_complexity() -> String {
    "simple".to_string()
}

impl Intent {
    /// Used when the classifier reply is unusable.
    pub fn fallback(message: &str) -> Self {
        Self {
            intent_type: IntentType::Other,
            complexity: default_complexity(),
            affected_areas: Vec::new(),
            summary: message.to_string(),
        }
    }

    pub fn is_question(&self) -> bool {
        self.intent_type == IntentType::Question
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedFile {
    pub action: String,
    pub file_path: String,
    #[serde(default)]
    pub description: String,
}

/// File operations the builder should carry out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub files: Vec<PlannedFile>,
    #[serde(default)]
    pub execution_order: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

impl Plan {
    pub fn fallback() -> Self {
        Self {
            notes: "Failed to parse plan".to_string(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// `create index.html, modify game.js`
    pub fn summary(&self) -> String {
        self.files
            .iter()
            .map(|f| format!("{} {}", f.action, f.file_path))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Tool handler for `write_file` and `delete_file`.
///
/// Calls are recorded, not applied: the caller applies the collected
/// operations once the service is done.
pub struct FileOpRecorder {
    ops: Mutex<Vec<FileOp>>,
    sink: ProgressSink,
}

impl FileOpRecorder {
    pub fn new(sink: ProgressSink) -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            sink,
        }
    }

    pub fn definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                WRITE_FILE_TOOL,
                "Write complete content to a file. Creates the file if it does not exist, \
                 overwrites it if it does.",
                json!({
                    "type": "object",
                    "properties": {
                        "file_path": {
                            "type": "string",
                            "description": "Relative file path, e.g. 'index.html' or 'script.js'"
                        },
                        "content": {
                            "type": "string",
                            "description": "The complete file content"
                        }
                    },
                    "required": ["file_path", "content"]
                }),
            ),
            ToolDefinition::new(
                DELETE_FILE_TOOL,
                "Delete a file from the project.",
                json!({
                    "type": "object",
                    "properties": {
                        "file_path": {
                            "type": "string",
                            "description": "Relative file path to delete"
                        }
                    },
                    "required": ["file_path"]
                }),
            ),
        ]
    }

    /// Recorded operations, in call order.
    pub fn take_ops(&self) -> Vec<FileOp> {
        std::mem::take(&mut *self.ops.lock())
    }
}

#[async_trait]
impl ToolHandler for FileOpRecorder {
    async fn handle(&self, call: &ToolCall) -> String {
        let raw_path = call.string_argument("file_path").unwrap_or_default();
        self.sink.tool_call(&call.name, json!({ "file_path": raw_path }));

        let file_path = match call.name.as_str() {
            WRITE_FILE_TOOL | DELETE_FILE_TOOL => match normalize_path(&raw_path) {
                Ok(path) => path,
                Err(e) => return format!("Rejected: {}", e),
            },
            other => return format!("Unknown tool: {}", other),
        };

        let (op, reply) = if call.name == WRITE_FILE_TOOL {
            let content = call.string_argument("content").unwrap_or_default();
            (
                FileOp::Write {
                    file_path: file_path.clone(),
                    content,
                },
                format!("File written: {}", file_path),
            )
        } else {
            (
                FileOp::Delete {
                    file_path: file_path.clone(),
                },
                format!("File deleted: {}", file_path),
            )
        };
        debug!(tool = %call.name, path = %file_path, "Recorded file operation");
        self.ops.lock().push(op);
        reply
    }
}

fn history_messages(history: &[ChatTurn], window: usize) -> Vec<ChatMessage> {
    let skip = history.len().saturating_sub(window);
    history[skip..]
        .iter()
        .map(|turn| match turn.role {
            ChatRole::User => ChatMessage::user(&turn.content),
            ChatRole::Assistant => ChatMessage::assistant(&turn.content),
        })
        .collect()
}

fn file_contents(files: &FileMap) -> String {
    let mut out = String::new();
    for (path, content) in files {
        out.push_str(&format!("\n--- {} ---\n{}\n", path, content));
    }
    out
}

impl StagePipeline {
    async fn run_file_tools(
        &self,
        label: &str,
        messages: Vec<ChatMessage>,
        sink: &ProgressSink,
    ) -> EngineResult<Vec<FileOp>> {
        let recorder = FileOpRecorder::new(sink.clone());
        let tools = FileOpRecorder::definitions();
        let text = self
            .runner
            .call_text(
                label,
                messages,
                SamplingOptions::new(0.1, 16000),
                Some(ToolUse {
                    tools: &tools,
                    handler: &recorder,
                    max_rounds: self.limits.build_tool_rounds,
                }),
            )
            .await?;
        if !text.trim().is_empty() {
            sink.token(text);
        }
        let ops = recorder.take_ops();
        info!(stage = label, ops = ops.len(), "File tools finished");
        Ok(ops)
    }

    /// Classify a chat message.
    pub async fn intent(
        &self,
        message: &str,
        history: &[ChatTurn],
        memory_block: &str,
    ) -> EngineResult<Intent> {
        const LABEL: &str = "intent_parser";

        let mut messages = vec![ChatMessage::system(prompts::INTENT)];
        messages.extend(history_messages(history, INTENT_HISTORY));
        messages.push(ChatMessage::user(message));
        let messages = with_memory(messages, memory_block);

        let result = self
            .json(LABEL, Contract::Intent, messages, SamplingOptions::new(0.1, 500), None)
            .await
            .and_then(|value| decode::<Intent>(LABEL, value));
        degrade(LABEL, result, || Intent::fallback(message))
    }

    /// Direct answer to a question intent.
    pub async fn answer(&self, message: &str, history: &[ChatTurn]) -> EngineResult<String> {
        let mut messages = vec![ChatMessage::system(prompts::ANSWER)];
        messages.extend(history_messages(history, INTENT_HISTORY));
        messages.push(ChatMessage::user(message));

        self.runner
            .call_text("responding", messages, SamplingOptions::new(0.7, 1000), None)
            .await
    }

    /// Decide which files to create, modify or delete.
    pub async fn plan(
        &self,
        intent: &Intent,
        files: &FileMap,
        memory_block: &str,
    ) -> EngineResult<Plan> {
        const LABEL: &str = "planner";

        let summary: Vec<String> = files
            .iter()
            .map(|(path, content)| format!("- {} ({} chars)", path, content.chars().count()))
            .collect();
        let user = format!(
            "Current project files:\n{}\n\nUser intent:\n{}\n\nCreate the file operations plan.",
            summary.join("\n"),
            pretty(intent)
        );
        let messages = with_memory(
            vec![ChatMessage::system(prompts::PLANNER), ChatMessage::user(user)],
            memory_block,
        );

        let result = self
            .json(LABEL, Contract::Plan, messages, SamplingOptions::new(0.2, 1000), None)
            .await
            .and_then(|value| decode::<Plan>(LABEL, value));
        degrade(LABEL, result, Plan::fallback)
    }

    /// Execute a plan through the file tools. Returns the recorded
    /// operations without applying them.
    pub async fn build(
        &self,
        plan: &Plan,
        files: &FileMap,
        memory_block: &str,
        sink: &ProgressSink,
    ) -> EngineResult<Vec<FileOp>> {
        let user = format!(
            "File plan to execute:\n{}\n\nCurrent file contents:\n{}\n\n\
             Execute the plan by calling write_file for each file that needs to be created or \
             modified, and delete_file for any files to remove. Write COMPLETE file contents.",
            pretty(plan),
            file_contents(files)
        );
        let messages = with_memory(
            vec![ChatMessage::system(prompts::BUILDER), ChatMessage::user(user)],
            memory_block,
        );
        self.run_file_tools("builder", messages, sink).await
    }

    /// Ask for minimal fixes of validation errors.
    pub async fn fix_build(
        &self,
        errors: &[String],
        files: &FileMap,
        memory_block: &str,
        sink: &ProgressSink,
    ) -> EngineResult<Vec<FileOp>> {
        let error_list: Vec<String> = errors.iter().map(|e| format!("- {}", e)).collect();
        let user = format!(
            "Build errors to fix:\n{}\n\nCurrent file contents:\n{}\n\n\
             Fix ONLY the reported errors with minimal changes.",
            error_list.join("\n"),
            file_contents(files)
        );
        let messages = with_memory(
            vec![ChatMessage::system(prompts::FIXER), ChatMessage::user(user)],
            memory_block,
        );
        self.run_file_tools("fix_agent", messages, sink).await
    }

    /// Up to five facts worth remembering from the latest exchange.
    pub async fn extract_facts(
        &self,
        message: &str,
        history: &[ChatTurn],
        files: &FileMap,
    ) -> EngineResult<Vec<String>> {
        const LABEL: &str = "memory_extraction";

        let skip = history.len().saturating_sub(FACTS_HISTORY);
        let recent: Vec<String> = history[skip..]
            .iter()
            .map(|turn| {
                format!(
                    "{}: {}",
                    turn.role_name(),
                    truncate_chars(&turn.content, FACTS_TURN_CHARS)
                )
            })
            .collect();
        let file_list: Vec<&str> = files.keys().map(String::as_str).collect();
        let user = format!(
            "Recent conversation (last 6 messages):\n{}\n\nLatest user message: {}\n\n\
             Project files: {}\n\nExtract memorable facts as a JSON array of strings:",
            recent.join("\n"),
            message,
            file_list.join(", ")
        );
        let messages = vec![
            ChatMessage::system(prompts::EXTRACT_FACTS),
            ChatMessage::user(user),
        ];

        let result = self
            .json(LABEL, Contract::Facts, messages, SamplingOptions::new(0.1, 500), None)
            .await
            .and_then(|value| decode::<Vec<String>>(LABEL, value));
        let mut facts = degrade(LABEL, result, Vec::new)?;
        facts.retain(|f| !f.trim().is_empty());
        facts.truncate(MAX_FACTS);
        Ok(facts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ProgressEvent;

    #[test]
    fn test_plan_summary_and_fallback() {
        let plan: Plan = serde_json::from_value(json!({
            "files": [
                {"action": "create", "file_path": "index.html"},
                {"action": "modify", "file_path": "game.js", "description": "ball"}
            ]
        }))
        .unwrap();
        assert_eq!(plan.summary(), "create index.html, modify game.js");
        assert!(Plan::fallback().is_empty());
        assert_eq!(Plan::fallback().notes, "Failed to parse plan");
    }

    #[test]
    fn test_intent_fallback() {
        let intent = Intent::fallback("make it blue");
        assert_eq!(intent.intent_type, IntentType::Other);
        assert_eq!(intent.complexity, "simple");
        assert_eq!(intent.summary, "make it blue");
    }

    #[test]
    fn test_history_window() {
        let history: Vec<ChatTurn> = (0..14).map(|i| ChatTurn::user(format!("m{}", i))).collect();
        let messages = history_messages(&history, 10);
        assert_eq!(messages.len(), 10);
        assert_eq!(messages[0].text(), "m4");
    }

    #[tokio::test]
    async fn test_recorder_collects_ops_and_emits_events() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let recorder = FileOpRecorder::new(ProgressSink::new(tx));

        let write = ToolCall::new(
            "c1",
            WRITE_FILE_TOOL,
            r#"{"file_path": "./index.html", "content": "<html></html>"}"#,
        );
        assert_eq!(recorder.handle(&write).await, "File written: index.html");

        let delete = ToolCall::new("c2", DELETE_FILE_TOOL, r#"{"file_path": "old.js"}"#);
        assert_eq!(recorder.handle(&delete).await, "File deleted: old.js");

        let unknown = ToolCall::new("c3", "rename_file", r#"{"file_path": "a.js"}"#);
        assert_eq!(recorder.handle(&unknown).await, "Unknown tool: rename_file");

        let escape = ToolCall::new("c4", WRITE_FILE_TOOL, r#"{"file_path": "../x", "content": ""}"#);
        assert!(recorder.handle(&escape).await.starts_with("Rejected"));

        let ops = recorder.take_ops();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].path(), "index.html");
        assert!(matches!(ops[1], FileOp::Delete { .. }));
        assert!(recorder.take_ops().is_empty());

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[0],
            ProgressEvent::ToolCall {
                tool: WRITE_FILE_TOOL.into(),
                args: json!({"file_path": "./index.html"}),
            }
        );
    }
}
