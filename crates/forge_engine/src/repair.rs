//! Build-fix loop.
//!
//! Validate, hand the errors to the fixer, apply its file operations and
//! validate again, at most `ceiling` times. The outcome always carries the
//! last validation, whether or not it passed.

use forge_build::{apply_file_ops, BuildResult, BuildValidator, FileMap};
use tracing::{info, warn};

use crate::events::ProgressSink;
use crate::stages::StagePipeline;

/// Result of a build-fix loop run.
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub files: FileMap,
    /// The last validation performed.
    pub result: BuildResult,
    pub fix_attempts: u32,
}

impl RepairOutcome {
    pub fn success(&self) -> bool {
        self.result.success
    }
}

pub async fn build_fix_loop(
    pipeline: &StagePipeline,
    validator: &BuildValidator,
    mut files: FileMap,
    ceiling: u32,
    memory_block: &str,
    sink: &ProgressSink,
) -> RepairOutcome {
    let mut fix_attempts = 0;
    sink.stage("validation");

    loop {
        let result = validator.validate(&files);
        if result.success {
            sink.build_status(true, &[]);
            info!(fix_attempts, "Build validated");
            return RepairOutcome {
                files,
                result,
                fix_attempts,
            };
        }

        sink.build_status(false, &result.errors);
        if fix_attempts >= ceiling {
            warn!(fix_attempts, errors = result.errors.len(), "Fix ceiling reached");
            return RepairOutcome {
                files,
                result,
                fix_attempts,
            };
        }

        sink.stage("fix_agent");
        fix_attempts += 1;
        let ops = match pipeline
            .fix_build(&result.errors, &files, memory_block, sink)
            .await
        {
            Ok(ops) => ops,
            Err(e) => {
                sink.error(format!("Fix attempt failed: {}", e));
                return RepairOutcome {
                    files,
                    result,
                    fix_attempts,
                };
            }
        };
        if let Err(e) = apply_file_ops(&mut files, &ops) {
            sink.error(format!("Fix attempt failed: {}", e));
            return RepairOutcome {
                files,
                result,
                fix_attempts,
            };
        }
        sink.stage("validation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use forge_llm::{NoopCallLog, ScriptedReasoner, ScriptedReply, ToolCall};
    use serde_json::json;

    use crate::config::Limits;
    use crate::events::ProgressEvent;

    const GOOD: &str = "<!DOCTYPE html><html><head></head><body></body></html>";

    fn pipeline(service: &ScriptedReasoner) -> StagePipeline {
        StagePipeline::new(Arc::new(service.clone()), Arc::new(NoopCallLog), Limits::default())
            .unwrap()
    }

    fn write_call(path: &str, content: &str) -> ScriptedReply {
        ScriptedReply::tool_calls(vec![ToolCall::new(
            "c1",
            "write_file",
            json!({"file_path": path, "content": content}).to_string(),
        )])
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_valid_files_need_no_fix() {
        let service = ScriptedReasoner::new();
        let mut files = FileMap::new();
        files.insert("index.html".into(), GOOD.into());

        let outcome = build_fix_loop(
            &pipeline(&service),
            &BuildValidator::standard().unwrap(),
            files,
            3,
            "",
            &ProgressSink::disabled(),
        )
        .await;
        assert!(outcome.success());
        assert_eq!(outcome.fix_attempts, 0);
        assert_eq!(service.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fix_applies_operations() {
        let service = ScriptedReasoner::new()
            .reply(write_call("index.html", GOOD))
            .reply(ScriptedReply::text("Added the head section."));
        let mut files = FileMap::new();
        files.insert("index.html".into(), "<html><body></body></html>".into());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let outcome = build_fix_loop(
            &pipeline(&service),
            &BuildValidator::standard().unwrap(),
            files,
            3,
            "",
            &ProgressSink::new(tx),
        )
        .await;

        assert!(outcome.success());
        assert_eq!(outcome.fix_attempts, 1);
        assert_eq!(outcome.files["index.html"], GOOD);

        let kinds: Vec<&str> = drain(&mut rx).iter().map(|e| e.event_type()).collect();
        assert_eq!(
            kinds,
            vec![
                "stage_change",
                "build_status",
                "stage_change",
                "tool_call",
                "token",
                "stage_change",
                "build_status"
            ]
        );
    }

    #[tokio::test]
    async fn test_ceiling_bounds_fix_calls() {
        let service = ScriptedReasoner::new();
        for _ in 0..3 {
            service.push(ScriptedReply::text("I could not fix it."));
        }
        let mut files = FileMap::new();
        files.insert("index.html".into(), "<body>no head</body>".into());

        let outcome = build_fix_loop(
            &pipeline(&service),
            &BuildValidator::standard().unwrap(),
            files,
            3,
            "",
            &ProgressSink::disabled(),
        )
        .await;

        assert!(!outcome.success());
        assert_eq!(outcome.fix_attempts, 3);
        assert_eq!(service.call_count(), 3);
        assert!(outcome
            .result
            .errors
            .iter()
            .any(|e| e.contains("<head>")));
    }

    #[tokio::test]
    async fn test_fix_failure_stops_the_loop() {
        let service = ScriptedReasoner::new().reply(ScriptedReply::failure("timeout"));
        let mut files = FileMap::new();
        files.insert("index.html".into(), "<body></body>".into());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let outcome = build_fix_loop(
            &pipeline(&service),
            &BuildValidator::standard().unwrap(),
            files,
            3,
            "",
            &ProgressSink::new(tx),
        )
        .await;

        assert!(!outcome.success());
        assert_eq!(outcome.fix_attempts, 1);
        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::Error { message }) if message.starts_with("Fix attempt failed")
        ));
    }
}
