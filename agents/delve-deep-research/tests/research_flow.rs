//! Scripted end-to-end run of the deep research agent.

use async_trait::async_trait;
use delve_core::tool::CallStatus;
use delve_core::{
    AutoApprove, ModelResponse, Role, ScriptedModel, Tool, ToolCallRequest, ToolContext,
    ToolError, ToolResult,
};
use delve_deep_research::{catalog, DeepResearch, CATALOG_NAME, RESEARCH_AGENT};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct FakeSearch {
    calls: AtomicU32,
}

#[async_trait]
impl Tool for FakeSearch {
    fn name(&self) -> &str {
        "search_web"
    }
    fn description(&self) -> &str {
        "Search the web"
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    }
    async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolResult::new(format!(
            "[1] Result for {}\nhttps://example.org",
            input["query"].as_str().unwrap_or_default()
        )))
    }
}

fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest::new(id, name, arguments)
}

#[tokio::test]
async fn test_research_flow_with_subagent() {
    // One model serves the lead and the sub-agent; with a single sub-agent
    // call the order of requests is fixed.
    let model = Arc::new(ScriptedModel::from_responses(vec![
        ModelResponse::tool_calls(vec![call(
            "c1",
            "write_file",
            json!({"file_path": "/question.txt", "content": "How do tides work?"}),
        )]),
        ModelResponse::tool_calls(vec![call(
            "c2",
            RESEARCH_AGENT,
            json!({"task": "Explain the role of the moon in tides"}),
        )]),
        ModelResponse::tool_calls(vec![call("s1", "search_web", json!({"query": "moon tides"}))]),
        ModelResponse::final_answer("The moon's gravity raises two tidal bulges."),
        ModelResponse::tool_calls(vec![call(
            "c3",
            "write_file",
            json!({"file_path": "/final_report.md", "content": "# Tides\n\nTwo bulges.\n\n### Sources\n[1] Example: https://example.org"}),
        )]),
        ModelResponse::final_answer("The report is in final_report.md."),
    ]));
    let search = Arc::new(FakeSearch::default());
    let workspace = std::env::temp_dir().join("delve-research-flow");

    let research = DeepResearch::new(model.clone(), search.clone(), workspace)
        .with_approvals(Arc::new(AutoApprove));
    let agent = catalog(research).load_agent(CATALOG_NAME).unwrap();

    let report = agent.run("How do tides work?").await.unwrap();

    assert_eq!(report.final_answer(), Some("The report is in final_report.md."));
    assert!(model.is_exhausted());
    assert_eq!(search.calls.load(Ordering::SeqCst), 1);
    assert_eq!(agent.files().read("/question.txt").unwrap(), "How do tides work?");
    assert!(agent
        .files()
        .read("/final_report.md")
        .unwrap()
        .starts_with("# Tides"));

    let delegated = report
        .state
        .messages_with_role(Role::Tool)
        .find(|m| m.tool_call_id() == Some("c2"))
        .unwrap();
    assert_eq!(delegated.content(), "The moon's gravity raises two tidal bulges.");
    assert_eq!(report.state.call("c2").unwrap().status(), CallStatus::Done);
    assert_eq!(report.state.tool_call_count(), 3);

    // The sub-agent saw only its own prompt and task.
    let child_request = &model.requests()[2];
    assert_eq!(child_request.messages.len(), 2);
    assert!(child_request.messages[0]
        .content()
        .starts_with("You are a dedicated researcher."));
    let child_tools: Vec<&str> = child_request.tools.iter().map(|t| t.name.as_str()).collect();
    assert!(child_tools.contains(&"search_web"));
    assert!(!child_tools.contains(&"shell"));
    assert!(!child_tools.contains(&RESEARCH_AGENT));
}

#[tokio::test]
async fn test_search_denied_without_approval_handler() {
    let model = Arc::new(ScriptedModel::from_responses(vec![
        ModelResponse::tool_calls(vec![call("c1", "search_web", json!({"query": "tides"}))]),
        ModelResponse::final_answer("Could not search."),
    ]));
    let search = Arc::new(FakeSearch::default());
    let agent = DeepResearch::new(model, search.clone(), std::env::temp_dir())
        .build()
        .unwrap();

    let report = agent.run("How do tides work?").await.unwrap();

    assert_eq!(search.calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.state.call("c1").unwrap().status(), CallStatus::Rejected);
    assert_eq!(report.final_answer(), Some("Could not search."));
}
