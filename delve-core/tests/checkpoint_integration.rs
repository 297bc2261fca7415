//! Checkpointing and resuming runs.

mod common;

use common::*;
use delve_core::interceptor::{InterceptorChain, PatchToolCalls};
use delve_core::tool::CallStatus;
use delve_core::{
    AgentBuilder, CheckpointError, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
    ModelError, ModelResponse, Phase, Role, RunError, RunOptions, RunOutcome, RunState,
    ScriptedModel,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_snapshot_round_trip_is_byte_identical() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let model = scripted(vec![
        ModelResponse::tool_calls(vec![call("c1", "echo", json!({"text": "hi"}))]),
        ModelResponse::final_answer("bye"),
    ]);
    let agent = AgentBuilder::new("saver", model)
        .with_tool(EchoTool::default())
        .with_checkpoints(store.clone())
        .build()
        .unwrap();

    let report = agent
        .run_with("hello", RunOptions::new().with_run_id("round-trip"))
        .await
        .unwrap();

    let record = store.latest("round-trip").await.unwrap().unwrap();
    let restored = RunState::from_snapshot(&record.snapshot).unwrap();
    assert_eq!(restored.to_snapshot().unwrap(), record.snapshot);
    assert_eq!(restored, report.state);
    assert_eq!(restored.phase(), Phase::Terminated);

    // Every intermediate snapshot restores to a consistent state too.
    for record in store.history("round-trip").await.unwrap() {
        let state = RunState::from_snapshot(&record.snapshot).unwrap();
        assert!(state.messages().is_consistent());
        assert_eq!(state.to_snapshot().unwrap(), record.snapshot);
    }
}

#[tokio::test]
async fn test_resume_after_fatal_model_error() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let first_echo = Arc::new(EchoTool::default());
    let failing = Arc::new(ScriptedModel::from_steps(vec![
        Ok(ModelResponse::tool_calls(vec![call(
            "c1",
            "echo",
            json!({"text": "before the crash"}),
        )])),
        Err(ModelError::InvalidResponse("garbled".into())),
    ]));
    let agent = AgentBuilder::new("crashy", failing)
        .with_tool_arc(first_echo.clone())
        .with_checkpoints(store.clone())
        .build()
        .unwrap();

    let err = agent
        .run_with("start", RunOptions::new().with_run_id("resume-test"))
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Model(_)));
    assert_eq!(first_echo.count(), 1);

    let second_echo = Arc::new(EchoTool::default());
    let recovering = scripted(vec![ModelResponse::final_answer("recovered")]);
    let resumed_agent = AgentBuilder::new("crashy", recovering.clone())
        .with_tool_arc(second_echo.clone())
        .with_checkpoints(store.clone())
        .build()
        .unwrap();

    let report = resumed_agent
        .resume("resume-test", RunOptions::new())
        .await
        .unwrap();

    assert_eq!(report.run_id, "resume-test");
    assert_eq!(report.final_answer(), Some("recovered"));
    assert_eq!(second_echo.count(), 0);
    assert_eq!(report.state.call("c1").unwrap().status(), CallStatus::Done);

    // The new model saw the history, including the earlier tool result.
    let seen = &recovering.requests()[0].messages;
    assert!(seen
        .iter()
        .any(|m| m.role() == Role::Tool && m.content() == "echo: before the crash"));
}

#[tokio::test]
async fn test_resume_terminated_run_returns_immediately() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let agent = AgentBuilder::new("done", scripted(vec![ModelResponse::final_answer("42")]))
        .with_checkpoints(store.clone())
        .build()
        .unwrap();
    agent
        .run_with("q", RunOptions::new().with_run_id("finished"))
        .await
        .unwrap();
    let saved = store.history("finished").await.unwrap().len();

    let idle_model = scripted(vec![]);
    let again = AgentBuilder::new("done", idle_model.clone())
        .with_checkpoints(store.clone())
        .build()
        .unwrap();
    let report = again.resume("finished", RunOptions::new()).await.unwrap();

    assert_eq!(report.final_answer(), Some("42"));
    assert!(idle_model.requests().is_empty());
    assert_eq!(store.history("finished").await.unwrap().len(), saved);
}

#[tokio::test]
async fn test_resume_patches_dangling_calls() {
    let source = Arc::new(MemoryCheckpointStore::new());
    let model = Arc::new(ScriptedModel::from_steps(vec![
        Ok(ModelResponse::tool_calls(vec![call("c1", "echo", json!({"text": "x"}))])),
        Ok(ModelResponse::final_answer("unused")),
    ]));
    let agent = AgentBuilder::new("interrupted", model)
        .with_tool(EchoTool::default())
        .with_checkpoints(source.clone())
        .build()
        .unwrap();
    agent
        .run_with("go", RunOptions::new().with_run_id("dangling"))
        .await
        .unwrap();

    // Pick the checkpoint taken right after the tool-call turn was recorded.
    let interrupted = source
        .history("dangling")
        .await
        .unwrap()
        .into_iter()
        .find(|record| {
            let state = RunState::from_snapshot(&record.snapshot).unwrap();
            state
                .call("c1")
                .is_some_and(|c| c.status() == CallStatus::Pending)
        })
        .expect("checkpoint with a pending call");

    let store = Arc::new(MemoryCheckpointStore::new());
    store
        .append("dangling", interrupted.snapshot)
        .await
        .unwrap();

    let echo = Arc::new(EchoTool::default());
    let model = scripted(vec![ModelResponse::final_answer("moved on")]);
    let resumed = AgentBuilder::new("interrupted", model.clone())
        .with_tool_arc(echo.clone())
        .with_interceptors(InterceptorChain::new().with(PatchToolCalls::new()))
        .with_checkpoints(store)
        .build()
        .unwrap();

    let report = resumed.resume("dangling", RunOptions::new()).await.unwrap();

    assert_eq!(report.final_answer(), Some("moved on"));
    assert_eq!(echo.count(), 0);
    assert_eq!(report.state.call("c1").unwrap().status(), CallStatus::Rejected);
    let patched = tool_message_for(&report, "c1");
    assert_eq!(patched.len(), 1);
    assert!(patched[0].content().contains("was cancelled"));
    assert_eq!(report.state.total_tokens(), report.state.messages().recount());
}

#[tokio::test]
async fn test_resume_errors() {
    let without_store = AgentBuilder::new("plain", scripted(vec![])).build().unwrap();
    let err = without_store
        .resume("anything", RunOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RunError::Checkpoint(CheckpointError::NotConfigured)
    ));

    let with_store = AgentBuilder::new("plain", scripted(vec![]))
        .with_checkpoints(Arc::new(MemoryCheckpointStore::new()))
        .build()
        .unwrap();
    let err = with_store
        .resume("missing", RunOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::RunNotFound(id) if id == "missing"));
}

#[tokio::test]
async fn test_file_store_records_every_step() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileCheckpointStore::new(dir.path().join("checkpoints")));
    let model = scripted(vec![
        ModelResponse::tool_calls(vec![call("c1", "echo", json!({"text": "persist"}))]),
        ModelResponse::final_answer("saved"),
    ]);
    let agent = AgentBuilder::new("durable", model)
        .with_tool(EchoTool::default())
        .with_checkpoints(store.clone())
        .build()
        .unwrap();

    agent
        .run_with("q", RunOptions::new().with_run_id("on-disk"))
        .await
        .unwrap();

    assert!(dir.path().join("checkpoints/on-disk.jsonl").exists());

    // A fresh store over the same directory sees the same history.
    let reopened = FileCheckpointStore::new(dir.path().join("checkpoints"));
    let history = reopened.history("on-disk").await.unwrap();
    assert!(history.len() >= 4);
    for (index, record) in history.iter().enumerate() {
        assert_eq!(record.sequence, index as u64 + 1);
        assert_eq!(record.run_id, "on-disk");
    }

    let latest = RunState::from_snapshot(&history.last().unwrap().snapshot).unwrap();
    assert_eq!(
        latest.outcome(),
        Some(&RunOutcome::Completed {
            answer: "saved".into()
        })
    );
}
