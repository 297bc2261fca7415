//! Shared test utilities for integration tests

// Each test file includes this module separately, so not every helper is
// used in every compilation unit.
#![allow(dead_code)]

use async_trait::async_trait;
use delve_core::config::{OnFailure, RetryConfig};
use delve_core::{
    Message, ModelResponse, Role, RunReport, ScriptedModel, Tool, ToolCallRequest, ToolContext,
    ToolError, ToolResult,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

pub fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest::new(id, name, arguments)
}

pub fn scripted(responses: Vec<ModelResponse>) -> Arc<ScriptedModel> {
    Arc::new(ScriptedModel::from_responses(responses))
}

/// Retry policy without backoff delays.
pub fn fast_retry(max_retries: u32, on_failure: OnFailure) -> RetryConfig {
    RetryConfig::new(max_retries, on_failure).with_backoff(Duration::ZERO, Duration::ZERO)
}

pub fn tool_messages(report: &RunReport) -> Vec<&Message> {
    report.state.messages_with_role(Role::Tool).collect()
}

pub fn tool_message_for<'a>(report: &'a RunReport, call_id: &str) -> Vec<&'a Message> {
    tool_messages(report)
        .into_iter()
        .filter(|m| m.tool_call_id() == Some(call_id))
        .collect()
}

// ============================================================================
// Test tools
// ============================================================================

/// Echoes its arguments and counts invocations.
#[derive(Debug, Default)]
pub struct EchoTool {
    pub calls: AtomicU32,
}

impl EchoTool {
    pub fn count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echo the input text"
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }
    async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolResult::new(format!(
            "echo: {}",
            input["text"].as_str().unwrap_or_default()
        )))
    }
}

/// Stand-in for the web search tool; counts invocations.
#[derive(Debug, Default)]
pub struct FakeSearch {
    pub calls: AtomicU32,
}

impl FakeSearch {
    pub fn count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
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
            "properties": {
                "query": { "type": "string" },
                "max_results": { "type": "integer" }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }
    async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolResult::with_metadata(
            format!("results for {}", input["query"].as_str().unwrap_or_default()),
            input,
        ))
    }
}

/// Returns a result of exactly `bytes` bytes.
#[derive(Debug)]
pub struct BigTool {
    pub bytes: usize,
}

#[async_trait]
impl Tool for BigTool {
    fn name(&self) -> &str {
        "big"
    }
    fn description(&self) -> &str {
        "Produce a large result"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _input: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::new("x".repeat(self.bytes)))
    }
}

/// Always fails with a transient error.
#[derive(Debug, Default)]
pub struct FailingTool {
    pub calls: AtomicU32,
}

impl FailingTool {
    pub fn count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "flaky"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _input: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ToolError::ExecutionFailed("upstream unavailable".into()))
    }
}

/// Sleeps for a long time and ignores cancellation.
#[derive(Debug)]
pub struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "Takes a long time"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _input: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(ToolResult::new("finally"))
    }
}

/// Waits for cancellation, then flushes its partial work before returning.
#[derive(Debug, Default)]
pub struct CleanupTool {
    cleaned_up: AtomicBool,
}

impl CleanupTool {
    pub fn cleaned_up(&self) -> bool {
        self.cleaned_up.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for CleanupTool {
    fn name(&self) -> &str {
        "crawl"
    }
    fn description(&self) -> &str {
        "Crawls until told to stop"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        ctx.cancellation.cancelled().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.cleaned_up.store(true, Ordering::SeqCst);
        Ok(ToolResult::new("stopped early, 3 pages saved"))
    }
}

/// Completes only once `parties` callers are inside it at the same time.
#[derive(Debug)]
pub struct RendezvousTool {
    barrier: Barrier,
}

impl RendezvousTool {
    pub fn new(parties: usize) -> Arc<Self> {
        Arc::new(Self {
            barrier: Barrier::new(parties),
        })
    }
}

#[async_trait]
impl Tool for RendezvousTool {
    fn name(&self) -> &str {
        "rendezvous"
    }
    fn description(&self) -> &str {
        "Wait for the other callers"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        self.barrier.wait().await;
        Ok(ToolResult::new(format!("met at {}", ctx.execution.path_string())))
    }
}
