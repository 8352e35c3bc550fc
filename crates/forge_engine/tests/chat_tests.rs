//! Integration tests for the chat-driven orchestrator.

use std::sync::Arc;

use forge_engine::{ChatTurn, Engine, EngineConfig, ProgressEvent, ProgressSink};
use forge_llm::{HashEmbedder, ScriptedReasoner, ScriptedReply, ToolCall};
use forge_memory::NoteKind;
use serde_json::json;
use tempfile::{tempdir, TempDir};
use tokio::sync::mpsc;

const PAGE: &str = "<!DOCTYPE html><html><head></head><body><canvas></canvas></body></html>";

fn engine(service: &ScriptedReasoner) -> (TempDir, Engine) {
    let dir = tempdir().unwrap();
    let engine = Engine::new(
        dir.path(),
        EngineConfig::default(),
        Arc::new(service.clone()),
        Arc::new(HashEmbedder::new(64)),
    )
    .unwrap();
    (dir, engine)
}

async fn run_chat(engine: &Engine, project: &str, message: &str) -> Vec<ProgressEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.chat(project, message, &ProgressSink::new(tx)).await;
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn kinds(events: &[ProgressEvent]) -> Vec<&'static str> {
    events.iter().map(ProgressEvent::event_type).collect()
}

fn write_file(path: &str, content: &str) -> ScriptedReply {
    ScriptedReply::tool_calls(vec![ToolCall::new(
        "call_1",
        "write_file",
        json!({"file_path": path, "content": content}).to_string(),
    )])
}

#[tokio::test]
async fn test_question_is_answered_directly() {
    let service = ScriptedReasoner::new()
        .reply(ScriptedReply::json(json!({
            "intent_type": "question",
            "summary": "Asks about controls"
        })))
        .reply(ScriptedReply::text("Use the arrow keys."));
    let (_dir, engine) = engine(&service);

    let events = run_chat(&engine, "arcade", "How do I move?").await;
    assert_eq!(
        kinds(&events),
        vec!["stage_change", "token", "stage_change", "token", "done"]
    );
    assert_eq!(
        events[1],
        ProgressEvent::Token {
            token: "Intent: question (simple) - Asks about controls".to_string()
        }
    );
    assert_eq!(events.last(), Some(&ProgressEvent::Done { version_id: None }));

    let history = engine.chat_history("arcade", None).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "Use the arrow keys.");
}

#[tokio::test]
async fn test_build_flow_creates_version() {
    let service = ScriptedReasoner::new()
        .reply(ScriptedReply::json(json!({
            "intent_type": "create",
            "complexity": "moderate",
            "summary": "Create a game page"
        })))
        .reply(ScriptedReply::json(json!({
            "files": [{"action": "create", "file_path": "index.html", "description": "Game page"}],
            "execution_order": ["index.html"]
        })))
        .reply(write_file("index.html", PAGE))
        .reply(ScriptedReply::text("Created index.html."))
        .reply(ScriptedReply::json(json!(["User prefers canvas rendering"])));
    let (_dir, engine) = engine(&service);

    let events = run_chat(&engine, "arcade", "Make me a canvas game").await;
    assert_eq!(
        kinds(&events),
        vec![
            "stage_change",
            "token",
            "stage_change",
            "token",
            "stage_change",
            "tool_call",
            "token",
            "stage_change",
            "build_status",
            "done"
        ]
    );
    assert_eq!(
        events[3],
        ProgressEvent::Token {
            token: "Plan: create index.html".to_string()
        }
    );
    assert_eq!(
        events[8],
        ProgressEvent::BuildStatus {
            success: true,
            errors: vec![]
        }
    );
    assert_eq!(events.last(), Some(&ProgressEvent::Done { version_id: Some(1) }));

    assert_eq!(engine.store().current_files("arcade").unwrap()["index.html"], PAGE);
    let history: Vec<ChatTurn> = engine.chat_history("arcade", None).unwrap();
    assert_eq!(history.last().unwrap().content, "Built: create index.html");

    let notes = engine.list_notes("arcade").await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NoteKind::AutoExtracted);
    assert_eq!(service.remaining(), 0);
}

#[tokio::test]
async fn test_empty_plan_makes_no_version() {
    let service = ScriptedReasoner::new()
        .reply(ScriptedReply::json(json!({"intent_type": "modify", "summary": "Nothing to do"})))
        .reply(ScriptedReply::json(json!({"files": []})));
    let (_dir, engine) = engine(&service);

    let events = run_chat(&engine, "arcade", "Leave it as is").await;
    assert_eq!(
        events[events.len() - 2],
        ProgressEvent::Token {
            token: "No file changes needed.".to_string()
        }
    );
    assert_eq!(events.last(), Some(&ProgressEvent::Done { version_id: None }));
    assert!(engine.list_versions("arcade").unwrap().is_empty());
}

#[tokio::test]
async fn test_service_failure_reports_error_then_done() {
    let service = ScriptedReasoner::new().reply(ScriptedReply::failure("connection reset"));
    let (_dir, engine) = engine(&service);

    let events = run_chat(&engine, "arcade", "Add a score counter").await;
    assert_eq!(kinds(&events), vec!["stage_change", "error", "done"]);
    assert!(matches!(
        &events[1],
        ProgressEvent::Error { message } if message.starts_with("Intent parsing failed")
    ));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn test_unparseable_intent_falls_back_to_other() {
    let service = ScriptedReasoner::new()
        .reply(ScriptedReply::text("sure thing!"))
        .reply(ScriptedReply::json(json!({"files": []})));
    let (_dir, engine) = engine(&service);

    let events = run_chat(&engine, "arcade", "Do something").await;
    assert_eq!(
        events[1],
        ProgressEvent::Token {
            token: "Intent: other (simple) - Do something".to_string()
        }
    );
    assert_eq!(events.last(), Some(&ProgressEvent::Done { version_id: None }));
}
