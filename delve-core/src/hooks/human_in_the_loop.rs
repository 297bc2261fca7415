//! Gates named tools behind operator approval.

use super::{Hook, HookDecision, HookError};
use crate::config::ApprovalConfig;
use crate::message::ToolCallRequest;
use crate::state::RunState;
use async_trait::async_trait;

/// Requests approval for every call to a configured tool. The orchestrator
/// then waits on its [`ApprovalHandler`](crate::approval::ApprovalHandler)
/// for that call id before executing anything.
#[derive(Debug, Default)]
pub struct HumanInTheLoopHook {
    config: ApprovalConfig,
}

impl HumanInTheLoopHook {
    pub fn new(config: ApprovalConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Hook for HumanInTheLoopHook {
    fn name(&self) -> &str {
        "human_in_the_loop"
    }

    async fn pre_tool_call(
        &self,
        call: &ToolCallRequest,
        _state: &RunState,
    ) -> Result<HookDecision, HookError> {
        Ok(match self.config.tools.get(&call.name) {
            Some(description) => HookDecision::RequestApproval {
                message: description.clone(),
            },
            None => HookDecision::Allow,
        })
    }
}
