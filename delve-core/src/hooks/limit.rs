//! Hard cap on tool calls per run.

use super::{Hook, HookDecision, HookError};
use crate::config::ToolCallLimitConfig;
use crate::message::ToolCallRequest;
use crate::state::RunState;
use async_trait::async_trait;

/// Halts the run once `run_limit` tool calls have been admitted. The call
/// that hits the limit is recorded as rejected and the run ends with
/// [`RunOutcome::LimitReached`](crate::RunOutcome::LimitReached).
#[derive(Debug, Default)]
pub struct ToolCallLimitHook {
    config: ToolCallLimitConfig,
}

impl ToolCallLimitHook {
    pub fn new(config: ToolCallLimitConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Hook for ToolCallLimitHook {
    fn name(&self) -> &str {
        "tool_call_limit"
    }

    async fn pre_tool_call(
        &self,
        _call: &ToolCallRequest,
        state: &RunState,
    ) -> Result<HookDecision, HookError> {
        if state.tool_call_count() >= self.config.run_limit {
            return Ok(HookDecision::Halt {
                reason: format!(
                    "Tool call limit reached: {} of {} calls used",
                    state.tool_call_count(),
                    self.config.run_limit
                ),
            });
        }
        Ok(HookDecision::Allow)
    }
}
