//! Streaming progress events for chat runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::model::VersionId;

/// One event of a chat run, in pipeline order. `Done` ends every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    StageChange { stage: String },
    Token { token: String },
    ToolCall { tool: String, args: Value },
    BuildStatus { success: bool, errors: Vec<String> },
    Error { message: String },
    Done { version_id: Option<VersionId> },
}

impl ProgressEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StageChange { .. } => "stage_change",
            Self::Token { .. } => "token",
            Self::ToolCall { .. } => "tool_call",
            Self::BuildStatus { .. } => "build_status",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    /// Server-sent-events frame: `event: <type>\ndata: <json>\n\n`.
    pub fn to_sse(&self) -> String {
        let mut data = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut data {
            map.remove("type");
        }
        format!("event: {}\ndata: {}\n\n", self.event_type(), data)
    }
}

/// Where a run sends its events. A disabled sink drops them.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Send an event. A closed receiver is ignored: the run keeps going
    /// after the client disconnects.
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn stage(&self, stage: &str) {
        self.emit(ProgressEvent::StageChange {
            stage: stage.to_string(),
        });
    }

    pub fn token(&self, token: impl Into<String>) {
        self.emit(ProgressEvent::Token {
            token: token.into(),
        });
    }

    pub fn tool_call(&self, tool: &str, args: Value) {
        self.emit(ProgressEvent::ToolCall {
            tool: tool.to_string(),
            args,
        });
    }

    pub fn build_status(&self, success: bool, errors: &[String]) {
        self.emit(ProgressEvent::BuildStatus {
            success,
            errors: errors.to_vec(),
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::Error {
            message: message.into(),
        });
    }

    pub fn done(&self, version_id: Option<VersionId>) {
        self.emit(ProgressEvent::Done { version_id });
    }
}
