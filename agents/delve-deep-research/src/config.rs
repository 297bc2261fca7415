//! Fixed configuration of the deep research agent.

use delve_core::config::{
    ApprovalConfig, ContextEditingConfig, EvictionConfig, FilesystemConfig, OnFailure,
    RetryConfig, ShellSandboxConfig, SummarizationConfig, ToolCallLimitConfig,
};
use delve_core::interceptor::WRITE_TODOS;
use delve_core::AgentConfig;
use std::path::Path;

/// Results above this many tokens go to the virtual filesystem.
pub const EVICTION_TOKEN_LIMIT: usize = 5000;

/// Failed tool calls are retried once, then reported to the model.
pub const TOOL_MAX_RETRIES: u32 = 1;

pub const SUMMARY_TRIGGER_TOKENS: usize = 120_000;
pub const SUMMARY_MESSAGES_TO_KEEP: usize = 6;

pub const RUN_TOOL_CALL_LIMIT: u64 = 25;

pub const CONTEXT_EDIT_TRIGGER: usize = 10_000;
pub const CONTEXT_EDIT_CLEAR_AT_LEAST: usize = 6000;
pub const CONTEXT_EDIT_KEEP: usize = 4;

/// Tool that needs operator approval, and the prompt shown for it.
pub const APPROVAL_TOOL: &str = "search_web";
pub const APPROVAL_DESCRIPTION: &str = "Please approve the search_web tool.";

/// Configuration for the lead researcher; `workspace` is where the shell
/// tool may run commands.
pub fn agent_config(workspace: &Path) -> AgentConfig {
    AgentConfig::new(RetryConfig::new(TOOL_MAX_RETRIES, OnFailure::ReturnMessage))
        .with_eviction(
            EvictionConfig::default()
                .with_token_limit(EVICTION_TOKEN_LIMIT)
                .with_exclude_filesystem_tools(true),
        )
        .with_filesystem(FilesystemConfig::default().with_read_only(false))
        .with_context_editing(
            ContextEditingConfig::default()
                .with_trigger(CONTEXT_EDIT_TRIGGER)
                .with_clear_at_least(CONTEXT_EDIT_CLEAR_AT_LEAST)
                .with_keep(CONTEXT_EDIT_KEEP)
                .with_excluded_tool(WRITE_TODOS),
        )
        .with_summarization(
            SummarizationConfig::default()
                .with_max_tokens_before_summary(SUMMARY_TRIGGER_TOKENS)
                .with_messages_to_keep(SUMMARY_MESSAGES_TO_KEEP),
        )
        .with_tool_call_limit(ToolCallLimitConfig::default().with_run_limit(RUN_TOOL_CALL_LIMIT))
        .with_approvals(ApprovalConfig::default().approval_on(APPROVAL_TOOL, APPROVAL_DESCRIPTION))
        .with_shell_sandbox(ShellSandboxConfig::default().with_workspace(workspace))
}
