//! Integration tests for exploration sessions.

use std::sync::Arc;

use async_trait::async_trait;
use forge_engine::{Engine, EngineConfig, EngineError, ErrorKind, SessionState};
use forge_llm::{Embedder, HashEmbedder, LlmError, LlmResult, ScriptedReasoner, ScriptedReply};
use forge_memory::NoteKind;
use mockall::mock;
use serde_json::json;
use tempfile::{tempdir, TempDir};

const GAME: &str = "<!DOCTYPE html><html><head><title>Jumper</title></head><body><canvas></canvas></body></html>";
const FASTER_GAME: &str = "<!DOCTYPE html><html><head><title>Jumper</title></head><body><canvas id=\"fast\"></canvas></body></html>";

mock! {
    pub FlakyEmbedder {}

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        async fn embed(&self, text: &str) -> LlmResult<Vec<f32>>;
    }
}

fn engine_with(service: &ScriptedReasoner, embedder: Arc<dyn Embedder>) -> (TempDir, Engine) {
    let dir = tempdir().unwrap();
    let engine = Engine::new(
        dir.path(),
        EngineConfig::default(),
        Arc::new(service.clone()),
        embedder,
    )
    .unwrap();
    (dir, engine)
}

fn engine(service: &ScriptedReasoner) -> (TempDir, Engine) {
    engine_with(service, Arc::new(HashEmbedder::new(64)))
}

fn script_exploration(service: &ScriptedReasoner) {
    service.push(ScriptedReply::json(json!({
        "summary": "A one-button platformer",
        "dimensions": {
            "movement": {"candidates": ["jump", "dash"], "confidence": "low"},
            "camera": {"candidates": ["side", "top-down"], "confidence": "medium"}
        },
        "hard_constraints": ["Plays on mobile"]
    })));
    service.push(ScriptedReply::json(json!({
        "branches": [
            {
                "branch_id": "B1",
                "name": "Leaper",
                "gameplay_hook": "Chain jumps",
                "core_mechanics": ["jump"],
                "picked": {"movement": "jump", "camera": "side"}
            },
            {
                "branch_id": "B2",
                "name": "Dasher",
                "gameplay_hook": "Dash through walls",
                "core_mechanics": ["dash"],
                "picked": {"movement": "dash", "camera": "top-down"}
            }
        ]
    })));
    service.push(ScriptedReply::json(json!({
        "options": [
            {
                "option_id": "opt_1",
                "branch_id": "B1",
                "title": "Neon Leaper",
                "core_loop": "Jump between platforms",
                "controls": "Tap to jump",
                "mechanics": ["jump"],
                "template_id": "platformer",
                "complexity": "low",
                "mobile_fit": "great"
            },
            {
                "option_id": "opt_2",
                "branch_id": "B2",
                "title": "Wall Dasher",
                "core_loop": "Dash through gaps",
                "controls": "Swipe to dash",
                "mechanics": ["dash"],
                "template_id": "runner"
            }
        ],
        "recommended_option_id": "opt_1"
    })));
}

#[tokio::test]
async fn test_full_exploration_lifecycle() {
    let service = ScriptedReasoner::new();
    let (_dir, engine) = engine(&service);

    script_exploration(&service);
    let explored = engine.explore("arcade", "a jumping game").await.unwrap();
    assert_eq!(explored.session.state, SessionState::ExploreOptions);
    assert_eq!(explored.branches.len(), 2);
    assert_eq!(explored.options.len(), 2);
    assert_eq!(explored.options.iter().filter(|o| o.is_recommended).count(), 1);
    assert!(explored.memory_influence.is_none());
    let session_id = explored.session.id;

    service.push(ScriptedReply::json(json!({"jump_model": {"gravity": 32.0}})));
    service.push(ScriptedReply::json(json!({"index.html": GAME})));
    let selected = engine.select_option(session_id, "opt_1").await.unwrap();
    assert_eq!(selected.state, SessionState::Committed);
    assert_eq!(selected.version.id, 1);
    assert!(selected.build.success);
    assert_eq!(selected.feel_spec["jump_model"]["gravity"], 32.0);

    let notes = engine.list_notes("arcade").await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NoteKind::DesignDecision);
    assert_eq!(notes[0].content.title, "Design Decision: Neon Leaper");
    assert_eq!(notes[0].source_session_id, Some(session_id));

    service.push(ScriptedReply::json(json!({"index.html": FASTER_GAME})));
    let iterated = engine.iterate(session_id, "make it faster").await.unwrap();
    assert_eq!(iterated.state, SessionState::Iterating);
    assert_eq!(iterated.iteration_count, 1);
    assert_eq!(iterated.version.id, 2);
    assert_eq!(iterated.hypothesis_ledger.open_questions, vec!["make it faster"]);
    let current = engine.store().current_files("arcade").unwrap();
    assert_eq!(current["index.html"], FASTER_GAME);

    service.push(ScriptedReply::json(json!({
        "title": "Neon Leaper",
        "summary": "Fast one-button platformer",
        "user_preferences": {"pace": "fast"}
    })));
    let finished = engine.finish(session_id).await.unwrap();
    assert_eq!(finished.state, SessionState::Stable);
    assert_eq!(finished.note.kind, NoteKind::ExplorationFinish);
    assert_eq!(finished.note.confidence, 0.8);
    assert_eq!(finished.note.source_version_id, Some(2));
    assert_eq!(finished.note.content.extra["refs"]["stable_version_id"], 2);

    assert_eq!(service.remaining(), 0);
    assert!(engine.active_session("arcade").unwrap().is_none());
    assert_eq!(engine.list_versions("arcade").unwrap()[0].id, 2);
}

#[tokio::test]
async fn test_stable_session_rejects_further_actions() {
    let service = ScriptedReasoner::new();
    let (_dir, engine) = engine(&service);

    script_exploration(&service);
    let session_id = engine.explore("arcade", "a jumping game").await.unwrap().session.id;
    service.push(ScriptedReply::json(json!({"title": "Nothing picked", "summary": "Abandoned"})));
    engine.finish(session_id).await.unwrap();
    let calls = service.call_count();

    let err = engine.iterate(session_id, "more").await.unwrap_err();
    assert!(matches!(
        &err,
        EngineError::InvalidState { current, .. } if current == "stable"
    ));
    assert!(err.is_client_fault());

    let err = engine.select_option(session_id, "opt_1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Domain);
    assert!(engine.finish(session_id).await.is_err());
    assert_eq!(service.call_count(), calls);
}

#[tokio::test]
async fn test_iterate_before_select_is_invalid() {
    let service = ScriptedReasoner::new();
    let (_dir, engine) = engine(&service);

    script_exploration(&service);
    let session_id = engine.explore("arcade", "a jumping game").await.unwrap().session.id;

    let err = engine.iterate(session_id, "faster").await.unwrap_err();
    match err {
        EngineError::InvalidState {
            operation,
            current,
            expected,
        } => {
            assert_eq!(operation, "iterate");
            assert_eq!(current, "explore_options");
            assert_eq!(expected, "committed|iterating");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_unknown_option_and_session() {
    let service = ScriptedReasoner::new();
    let (_dir, engine) = engine(&service);

    script_exploration(&service);
    let session_id = engine.explore("arcade", "a jumping game").await.unwrap().session.id;

    assert!(matches!(
        engine.select_option(session_id, "opt_9").await,
        Err(EngineError::OptionNotFound { .. })
    ));
    assert!(matches!(
        engine.finish(uuid::Uuid::new_v4()).await,
        Err(EngineError::SessionNotFound(_))
    ));
    assert_eq!(
        engine.session_state(session_id).unwrap().state,
        SessionState::ExploreOptions
    );
}

#[tokio::test]
async fn test_failed_build_is_still_versioned() {
    let service = ScriptedReasoner::new();
    let (_dir, engine) = engine(&service);

    script_exploration(&service);
    let session_id = engine.explore("arcade", "a jumping game").await.unwrap().session.id;

    service.push(ScriptedReply::json(json!({"jump_model": {}})));
    service.push(ScriptedReply::json(json!({"index.html": "<body>no head</body>"})));
    for _ in 0..3 {
        service.push(ScriptedReply::text("Could not fix it."));
    }
    let selected = engine.select_option(session_id, "opt_2").await.unwrap();

    assert!(!selected.build.success);
    assert_eq!(selected.state, SessionState::Committed);
    let versions = engine.list_versions("arcade").unwrap();
    assert_eq!(versions.len(), 1);
    assert!(versions[0].build_log.as_deref().unwrap().contains("<head>"));
    assert_eq!(service.remaining(), 0);
}

#[tokio::test]
async fn test_finish_preferences_bias_next_exploration() {
    let service = ScriptedReasoner::new();
    let (_dir, engine) = engine(&service);

    script_exploration(&service);
    let session_id = engine.explore("arcade", "a jumping game").await.unwrap().session.id;
    service.push(ScriptedReply::json(json!({
        "title": "Quick session",
        "summary": "User wants fast games",
        "user_preferences": {"pace": "fast", "platform": "mobile"}
    })));
    engine.finish(session_id).await.unwrap();

    script_exploration(&service);
    let explored = engine.explore("arcade", "another game").await.unwrap();
    let influence = explored.memory_influence.unwrap();
    assert_eq!(influence.relevant_preferences["pace"], "fast");
    assert!(engine
        .active_session("arcade")
        .unwrap()
        .is_some_and(|active| active.session.id == explored.session.id));
}

#[tokio::test]
async fn test_memory_outage_does_not_block_exploration() {
    let mut embedder = MockFlakyEmbedder::new();
    embedder
        .expect_embed()
        .returning(|_| Err(LlmError::Embedding("service down".to_string())));

    let service = ScriptedReasoner::new();
    let (_dir, engine) = engine_with(&service, Arc::new(embedder));

    script_exploration(&service);
    let explored = engine.explore("arcade", "a jumping game").await.unwrap();
    assert_eq!(explored.options.len(), 2);

    let decompose = &service.requests()[0];
    assert!(!decompose.system_prompt().contains("## Project Memory"));
}

#[tokio::test]
async fn test_decomposition_keys_are_stable_across_runs() {
    let service = ScriptedReasoner::new();
    let (_dir, engine) = engine(&service);

    script_exploration(&service);
    let first = engine.explore("arcade", "a jumping game").await.unwrap();

    // Same request, different prose and key spelling.
    service.push(ScriptedReply::json(json!({
        "summary": "Platformer with a single button",
        "dimensions": {
            "Movement": {"candidates": ["dash", "jump"], "confidence": "medium"},
            "camera": {"candidates": ["side scrolling", "top-down"], "confidence": "low"}
        },
        "hard_constraints": ["Mobile friendly"]
    })));
    service.push(ScriptedReply::json(json!({"branches": []})));
    let second = engine.explore("arcade", "a jumping game").await.unwrap();

    assert_eq!(
        first.decomposition().dimension_keys(),
        vec!["camera".to_string(), "movement".to_string()]
    );
    assert_eq!(
        first.decomposition().dimension_keys(),
        second.decomposition().dimension_keys()
    );
}

#[tokio::test]
async fn test_too_few_branches_yield_no_options() {
    let service = ScriptedReasoner::new();
    let (_dir, engine) = engine(&service);

    service.push(ScriptedReply::json(json!({
        "summary": "A one-button platformer",
        "dimensions": {"movement": {"candidates": ["jump", "dash"]}}
    })));
    service.push(ScriptedReply::json(json!({
        "branches": [{
            "branch_id": "B1",
            "name": "Leaper",
            "gameplay_hook": "Chain jumps",
            "picked": {"movement": "jump"}
        }]
    })));

    let explored = engine.explore("arcade", "a jumping game").await.unwrap();
    assert!(explored.branches.is_empty());
    assert!(explored.options.is_empty());
    // Map is never asked to turn an empty branch set into options.
    assert_eq!(service.call_count(), 2);
    assert_eq!(explored.session.state, SessionState::ExploreOptions);
}

#[tokio::test]
async fn test_repeated_iterate_keeps_document_structure() {
    let service = ScriptedReasoner::new();
    let (_dir, engine) = engine(&service);

    script_exploration(&service);
    let session_id = engine.explore("arcade", "a jumping game").await.unwrap().session.id;
    service.push(ScriptedReply::json(json!({"jump_model": {"gravity": 32.0}})));
    service.push(ScriptedReply::json(json!({"index.html": GAME})));
    engine.select_option(session_id, "opt_1").await.unwrap();

    let headless = "<html><body><canvas></canvas></body></html>";
    for round in 1..=2 {
        service.push(ScriptedReply::json(json!({"index.html": headless})));
        let iterated = engine.iterate(session_id, "tidy up").await.unwrap();
        assert!(iterated.build.success);
        assert_eq!(iterated.iteration_count, round);

        let current = engine.store().current_files("arcade").unwrap();
        assert_eq!(current["index.html"], GAME);
        assert!(current["index.html"].contains("<head>"));
    }
}

#[tokio::test]
async fn test_structure_guard_covers_htm_and_uppercase_extensions() {
    let service = ScriptedReasoner::new();
    let (_dir, engine) = engine(&service);
    let menu = "<!DOCTYPE html><html><head><title>Menu</title></head><body></body></html>";

    script_exploration(&service);
    let session_id = engine.explore("arcade", "a jumping game").await.unwrap().session.id;
    service.push(ScriptedReply::json(json!({"jump_model": {"gravity": 32.0}})));
    service.push(ScriptedReply::json(json!({
        "index.html": GAME,
        "levels/Menu.HTM": menu
    })));
    engine.select_option(session_id, "opt_1").await.unwrap();

    service.push(ScriptedReply::json(json!({
        "levels/Menu.HTM": "<html><body>menu</body></html>"
    })));
    engine.iterate(session_id, "simplify the menu").await.unwrap();

    let current = engine.store().current_files("arcade").unwrap();
    assert_eq!(current["levels/Menu.HTM"], menu);
}
