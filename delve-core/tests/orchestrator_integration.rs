//! End-to-end runs of the reasoning loop with scripted models.

mod common;

use common::*;
use delve_core::config::{
    ApprovalConfig, EvictionConfig, ModelRetryConfig, OnFailure, SummarizationConfig,
    ToolCallLimitConfig,
};
use delve_core::hooks::{HookSet, HumanInTheLoopHook, SummarizationHook, ToolCallLimitHook};
use delve_core::interceptor::{
    Filesystem, InterceptorChain, LargeResultEviction, PatchToolCalls, TodoList, ToolRetry,
};
use delve_core::tool::CallStatus;
use delve_core::update::{EVENT_RUN_COMPLETED, EVENT_RUN_STARTED, EVENT_TOOL_COMPLETED};
use delve_core::vfs::LARGE_RESULTS_DIR;
use delve_core::{
    AgentBuilder, ApprovalBroker, ApprovalDecision, ModelError, ModelResponse, Phase, Role,
    RunError, RunOptions, RunOutcome, ScriptedModel, ToolError,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_tool_call_limit_halts_batch() {
    let echo = Arc::new(EchoTool::default());
    let model = scripted(vec![ModelResponse::tool_calls(vec![
        call("c1", "echo", json!({"text": "one"})),
        call("c2", "echo", json!({"text": "two"})),
        call("c3", "echo", json!({"text": "three"})),
    ])]);
    let agent = AgentBuilder::new("limited", model)
        .with_tool_arc(echo.clone())
        .with_hooks(HookSet::new().with(ToolCallLimitHook::new(
            ToolCallLimitConfig::default().with_run_limit(2),
        )))
        .build()
        .unwrap();

    let report = agent.run("count to three").await.unwrap();

    assert!(matches!(report.outcome, RunOutcome::LimitReached { .. }));
    assert_eq!(echo.count(), 2);
    assert_eq!(tool_messages(&report).len(), 2);
    assert_eq!(report.state.tool_call_count(), 2);
    assert_eq!(report.state.call("c3").unwrap().status(), CallStatus::Rejected);

    let notice = report.state.messages().last().unwrap();
    assert_eq!(notice.role(), Role::System);
    assert!(notice.content().contains("echo (c3)"));
}

#[tokio::test]
async fn test_tool_call_limit_spans_turns() {
    let echo = Arc::new(EchoTool::default());
    let model = scripted(vec![
        ModelResponse::tool_calls(vec![call("c1", "echo", json!({"text": "one"}))]),
        ModelResponse::tool_calls(vec![call("c2", "echo", json!({"text": "two"}))]),
        ModelResponse::tool_calls(vec![call("c3", "echo", json!({"text": "three"}))]),
        ModelResponse::final_answer("never asked for"),
    ]);
    let agent = AgentBuilder::new("limited", model.clone())
        .with_tool_arc(echo.clone())
        .with_hooks(HookSet::new().with(ToolCallLimitHook::new(
            ToolCallLimitConfig::default().with_run_limit(2),
        )))
        .build()
        .unwrap();

    let report = agent.run("count to three, slowly").await.unwrap();

    assert!(matches!(report.outcome, RunOutcome::LimitReached { .. }));
    assert_eq!(echo.count(), 2);
    assert_eq!(tool_messages(&report).len(), 2);
    assert!(tool_message_for(&report, "c3").is_empty());
    assert_eq!(report.state.call("c3").unwrap().status(), CallStatus::Rejected);
    assert_eq!(model.requests().len(), 3);
    assert!(!model.is_exhausted());
}

#[tokio::test]
async fn test_large_result_evicted_to_virtual_fs() {
    let model = scripted(vec![
        ModelResponse::tool_calls(vec![call("c1", "big", json!({}))]),
        ModelResponse::final_answer("read it"),
    ]);
    let agent = AgentBuilder::new("evicting", model)
        .with_tool(BigTool { bytes: 25_600 })
        .with_interceptors(
            InterceptorChain::new().with(LargeResultEviction::new(EvictionConfig::default())),
        )
        .build()
        .unwrap();

    let report = agent.run("fetch everything").await.unwrap();

    let message = tool_message_for(&report, "c1")[0];
    assert!(message.content().contains("8000 tokens"));
    assert!(message.tokens() < 1000);

    let stored = agent.files().list(LARGE_RESULTS_DIR).unwrap();
    assert_eq!(stored.len(), 1);
    assert!(message.content().contains(&stored[0]));
    assert_eq!(agent.files().read(&stored[0]).unwrap().len(), 25_600);
    assert_eq!(report.state.total_tokens(), report.state.messages().recount());
}

#[tokio::test]
async fn test_approval_gates_execution() {
    let search = Arc::new(FakeSearch::default());
    let (broker, mut requests) = ApprovalBroker::new();
    let broker = Arc::new(broker);
    let model = scripted(vec![
        ModelResponse::tool_calls(vec![
            call("c1", "search_web", json!({"query": "first"})),
            call("c2", "search_web", json!({"query": "second"})),
        ]),
        ModelResponse::final_answer("done"),
    ]);
    let agent = Arc::new(
        AgentBuilder::new("gated", model)
            .with_tool_arc(search.clone())
            .with_hooks(HookSet::new().with(HumanInTheLoopHook::new(
                ApprovalConfig::default().approval_on("search_web", "Please approve the search."),
            )))
            .with_approvals(broker.clone())
            .build()
            .unwrap(),
    );

    let handle = tokio::spawn({
        let agent = Arc::clone(&agent);
        async move { agent.run("search twice").await }
    });

    let first = requests.recv().await.unwrap();
    assert_eq!(first.call_id, "c1");
    assert_eq!(first.message, "Please approve the search.");
    assert_eq!(search.count(), 0);
    broker.resolve(&first.run_id, "c1", ApprovalDecision::Approve);

    let second = requests.recv().await.unwrap();
    assert_eq!(second.call_id, "c2");
    assert_eq!(search.count(), 1);
    broker.resolve(&second.run_id, "c2", ApprovalDecision::deny("not needed"));

    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.final_answer(), Some("done"));
    assert_eq!(search.count(), 1);
    assert_eq!(report.state.tool_call_count(), 1);
    assert_eq!(report.state.call("c1").unwrap().status(), CallStatus::Done);
    assert_eq!(report.state.call("c2").unwrap().status(), CallStatus::Rejected);

    let rejected = tool_message_for(&report, "c2")[0];
    assert!(rejected.is_error());
    assert!(rejected.content().contains("not needed"));
    assert!(report
        .transitions
        .iter()
        .any(|t| t.from == Phase::AwaitApproval && t.to == Phase::ExecuteTool));
}

#[tokio::test]
async fn test_unapproved_call_denied_without_handler() {
    let search = Arc::new(FakeSearch::default());
    let model = scripted(vec![
        ModelResponse::tool_calls(vec![call("c1", "search_web", json!({"query": "q"}))]),
        ModelResponse::final_answer("gave up"),
    ]);
    let agent = AgentBuilder::new("gated", model)
        .with_tool_arc(search.clone())
        .with_hooks(HookSet::new().with(HumanInTheLoopHook::new(
            ApprovalConfig::default().approval_on("search_web", "approve?"),
        )))
        .build()
        .unwrap();

    let report = agent.run("q").await.unwrap();
    assert_eq!(search.count(), 0);
    assert_eq!(report.final_answer(), Some("gave up"));
    assert!(tool_message_for(&report, "c1")[0].is_error());
}

#[tokio::test]
async fn test_deterministic_failure_attempted_max_plus_one() {
    let flaky = Arc::new(FailingTool::default());
    let model = scripted(vec![
        ModelResponse::tool_calls(vec![call("c1", "flaky", json!({}))]),
        ModelResponse::final_answer("tool is down"),
    ]);
    let agent = AgentBuilder::new("retrying", model)
        .with_tool_arc(flaky.clone())
        .with_interceptors(
            InterceptorChain::new().with(ToolRetry::new(fast_retry(2, OnFailure::ReturnMessage))),
        )
        .build()
        .unwrap();

    let report = agent.run("try it").await.unwrap();

    assert_eq!(flaky.count(), 3);
    let ledger = report.state.call("c1").unwrap();
    assert_eq!(ledger.attempts(), 3);
    assert_eq!(ledger.status(), CallStatus::Retried);
    assert!(tool_message_for(&report, "c1")[0].is_error());
    assert_eq!(report.final_answer(), Some("tool is down"));
}

#[tokio::test]
async fn test_retry_exhaustion_can_abort_run() {
    let flaky = Arc::new(FailingTool::default());
    let model = scripted(vec![ModelResponse::tool_calls(vec![call("c1", "flaky", json!({}))])]);
    let agent = AgentBuilder::new("strict", model)
        .with_tool_arc(flaky.clone())
        .with_interceptors(
            InterceptorChain::new().with(ToolRetry::new(fast_retry(1, OnFailure::RaiseError))),
        )
        .build()
        .unwrap();

    let err = agent.run("try it").await.unwrap_err();
    assert_eq!(flaky.count(), 2);
    match err {
        RunError::Tool { tool, source } => {
            assert_eq!(tool, "flaky");
            assert!(matches!(source, ToolError::RetriesExhausted { attempts: 2, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_arguments_repaired_and_schema_errors_are_messages() {
    let search = Arc::new(FakeSearch::default());
    let model = scripted(vec![
        ModelResponse::tool_calls(vec![
            call(
                "c1",
                "search_web",
                json!("{\"query\": \"rust\", \"max_results\": \"5\", \"verbose\": true}"),
            ),
            call("c2", "search_web", json!({"max_results": 3})),
        ]),
        ModelResponse::final_answer("ok"),
    ]);
    let agent = AgentBuilder::new("patched", model)
        .with_tool_arc(search.clone())
        .with_interceptors(InterceptorChain::new().with(PatchToolCalls::new()))
        .build()
        .unwrap();

    let report = agent.run("search").await.unwrap();

    assert_eq!(search.count(), 1);
    assert_eq!(tool_message_for(&report, "c1")[0].content(), "results for rust");
    let invalid = tool_message_for(&report, "c2")[0];
    assert!(invalid.is_error());
    assert!(invalid.content().contains("query"));
    assert_eq!(report.final_answer(), Some("ok"));
}

#[tokio::test]
async fn test_virtual_tools_update_todos_and_files() {
    let model = scripted(vec![
        ModelResponse::tool_calls(vec![
            call(
                "c1",
                "write_todos",
                json!({"todos": [{"content": "survey sources", "status": "in_progress"}]}),
            ),
            call(
                "c2",
                "write_file",
                json!({"file_path": "/notes/plan.md", "content": "step one"}),
            ),
        ]),
        ModelResponse::final_answer("planned"),
    ]);
    let agent = AgentBuilder::new("planner", model)
        .with_interceptors(
            InterceptorChain::new()
                .with(TodoList::new())
                .with(Filesystem::new(Default::default())),
        )
        .build()
        .unwrap();

    let report = agent.run("plan").await.unwrap();

    assert_eq!(report.state.todos().len(), 1);
    assert_eq!(report.state.todos()[0].content, "survey sources");
    assert_eq!(agent.files().read("/notes/plan.md").unwrap(), "step one");
    assert_eq!(report.state.tool_call_count(), 2);
}

#[tokio::test]
async fn test_cancellation_stops_in_flight_tool() {
    let model = scripted(vec![ModelResponse::tool_calls(vec![call("c1", "slow", json!({}))])]);
    let agent = AgentBuilder::new("cancellable", model)
        .with_tool(SlowTool)
        .with_cancel_grace(Duration::from_millis(100))
        .build()
        .unwrap();

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        }
    });

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        agent.run_with("wait", RunOptions::new().with_cancellation(token)),
    )
    .await
    .expect("run should stop promptly")
    .unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert!(report.state.is_terminated());
    let message = tool_message_for(&report, "c1")[0];
    assert!(message.is_error());
    assert!(message.content().contains("cancelled"));
}

#[tokio::test]
async fn test_cancelled_tool_gets_to_clean_up() {
    let crawl = Arc::new(CleanupTool::default());
    let model = scripted(vec![ModelResponse::tool_calls(vec![call("c1", "crawl", json!({}))])]);
    let agent = AgentBuilder::new("cancellable", model)
        .with_tool_arc(crawl.clone())
        .build()
        .unwrap();

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        }
    });

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        agent.run_with("crawl", RunOptions::new().with_cancellation(token)),
    )
    .await
    .expect("run should stop within the grace period")
    .unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert!(crawl.cleaned_up());
    let messages = tool_message_for(&report, "c1");
    assert_eq!(messages.len(), 1);
    assert!(!messages[0].is_error());
    assert_eq!(messages[0].content(), "stopped early, 3 pages saved");
}

#[tokio::test]
async fn test_summarization_compacts_history() {
    let summarizer = Arc::new(ScriptedModel::from_responses(vec![ModelResponse::final_answer(
        "the user asked about tides",
    )]));
    let model = scripted(vec![
        ModelResponse::tool_calls(vec![call("c1", "echo", json!({"text": "moon"}))]),
        ModelResponse::final_answer("tides follow the moon"),
    ]);
    let agent = AgentBuilder::new("summarizing", model.clone())
        .with_system_prompt("You research tides.")
        .with_tool(EchoTool::default())
        .with_hooks(HookSet::new().with(SummarizationHook::new(
            SummarizationConfig::default()
                .with_max_tokens_before_summary(50)
                .with_messages_to_keep(2),
            summarizer.clone(),
        )))
        .build()
        .unwrap();

    let question = "Why are there two high tides a day? ".repeat(10);
    let report = agent.run(&question).await.unwrap();

    assert_eq!(report.final_answer(), Some("tides follow the moon"));
    assert_eq!(summarizer.requests().len(), 1);
    assert!(summarizer.requests()[0].messages[1]
        .content()
        .contains("two high tides"));

    let messages = report.state.messages().messages();
    assert_eq!(messages[0].content(), "You research tides.");
    assert!(messages[1].content().ends_with("the user asked about tides"));
    assert!(messages.iter().all(|m| m.content() != question));
    assert_eq!(report.state.total_tokens(), report.state.messages().recount());

    // The main model saw the compacted history on its second turn.
    let second_turn = &model.requests()[1];
    assert!(second_turn.messages[1].content().contains("summary"));
    assert!(report
        .transitions
        .iter()
        .any(|t| t.from == Phase::Summarize && t.to == Phase::AwaitModel));
}

#[tokio::test]
async fn test_model_failures_are_retried() {
    let model = Arc::new(ScriptedModel::from_steps(vec![
        Err(ModelError::Transport("connection reset".into())),
        Err(ModelError::RateLimited("429".into())),
        Ok(ModelResponse::final_answer("third time lucky")),
    ]));
    let agent = AgentBuilder::new("resilient", model.clone())
        .with_model_retry(ModelRetryConfig::default().with_base_delay(Duration::ZERO))
        .build()
        .unwrap();

    let report = agent.run("q").await.unwrap();
    assert_eq!(report.final_answer(), Some("third time lucky"));
    assert_eq!(model.requests().len(), 3);
}

#[tokio::test]
async fn test_model_failure_is_fatal_after_retries() {
    let model = Arc::new(ScriptedModel::from_steps(vec![
        Err(ModelError::Transport("down".into())),
        Err(ModelError::Transport("down".into())),
        Err(ModelError::Transport("down".into())),
    ]));
    let agent = AgentBuilder::new("fragile", model.clone())
        .with_model_retry(ModelRetryConfig::default().with_base_delay(Duration::ZERO))
        .build()
        .unwrap();

    let err = agent.run("q").await.unwrap_err();
    assert!(matches!(err, RunError::Model(ModelError::Transport(_))));
    assert_eq!(model.requests().len(), 3);
}

#[tokio::test]
async fn test_non_retryable_model_error_fails_immediately() {
    let model = Arc::new(ScriptedModel::from_steps(vec![Err(ModelError::InvalidResponse(
        "empty body".into(),
    ))]));
    let agent = AgentBuilder::new("fragile", model.clone()).build().unwrap();

    let err = agent.run("q").await.unwrap_err();
    assert!(matches!(err, RunError::Model(ModelError::InvalidResponse(_))));
    assert_eq!(model.requests().len(), 1);
}

#[tokio::test]
async fn test_updates_are_emitted() {
    let model = scripted(vec![
        ModelResponse::tool_calls(vec![call("c1", "echo", json!({"text": "hi"}))]),
        ModelResponse::final_answer("bye"),
    ]);
    let agent = AgentBuilder::new("chatty", model)
        .with_tool(EchoTool::default())
        .build()
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    agent
        .run_with("hello", RunOptions::new().with_updates(tx))
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(update) = rx.try_recv() {
        events.push(update.event_type);
    }
    assert_eq!(events.first().map(String::as_str), Some(EVENT_RUN_STARTED));
    assert_eq!(events.last().map(String::as_str), Some(EVENT_RUN_COMPLETED));
    assert!(events.iter().any(|e| e == EVENT_TOOL_COMPLETED));
}

#[tokio::test]
async fn test_token_total_matches_messages_after_run() {
    let model = scripted(vec![
        ModelResponse::tool_calls(vec![
            call("c1", "echo", json!({"text": "a"})),
            call("c2", "missing_tool", json!({})),
        ]),
        ModelResponse::final_answer("done"),
    ]);
    let agent = AgentBuilder::new("accounting", model)
        .with_tool(EchoTool::default())
        .build()
        .unwrap();

    let report = agent.run("q").await.unwrap();
    assert_eq!(report.state.total_tokens(), report.state.messages().recount());
    let missing = tool_message_for(&report, "c2")[0];
    assert!(missing.is_error());
    assert!(missing.content().contains("Tool not found"));
}
