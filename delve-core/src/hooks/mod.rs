//! Lifecycle hooks: policies that gate or reshape the run.
//!
//! Where an [`Interceptor`](crate::interceptor::Interceptor) wraps the
//! execution of a call, a [`Hook`] decides whether a call happens at all,
//! and whether the loop should take a detour before the next model turn.
//!
//! Hooks subscribe to lifecycle events by overriding the matching method:
//!
//! | Event | Method | Decision |
//! |-------|--------|----------|
//! | before a model turn | [`before_model`](Hook::before_model) | [`TurnDecision`] |
//! | before a tool call | [`pre_tool_call`](Hook::pre_tool_call) | [`HookDecision`] |
//! | after a tool call | [`post_tool_call`](Hook::post_tool_call) | observe only |
//! | summarize requested | [`summarize`](Hook::summarize) | summary text |
//!
//! # Combining decisions
//!
//! [`HookSet`] evaluates hooks in configuration order:
//! - `Halt` and `Deny` stop evaluation immediately
//! - `Transform` replaces the arguments seen by later hooks
//! - `RequestApproval` is remembered and evaluation continues, so a later
//!   hook can still deny or halt the call before anyone is asked

mod human_in_the_loop;
mod limit;
mod shell_sandbox;
mod summarization;

pub use human_in_the_loop::HumanInTheLoopHook;
pub use limit::ToolCallLimitHook;
pub use shell_sandbox::ShellSandboxHook;
pub use summarization::SummarizationHook;

use crate::message::{Message, ToolCallRequest};
use crate::state::RunState;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Hook Error
// ============================================================================

/// Errors that can occur during hook execution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HookError {
    /// Hook logic failed
    #[error("Hook execution failed: {0}")]
    ExecutionFailed(String),

    /// A model call made by the hook failed
    #[error("Hook model call failed: {0}")]
    Model(#[from] crate::error::ModelError),
}

// ============================================================================
// Decisions
// ============================================================================

/// Decision from [`Hook::pre_tool_call`].
#[derive(Debug, Clone, PartialEq)]
pub enum HookDecision {
    /// Continue with the current arguments
    Allow,

    /// Continue with replaced arguments
    Transform(Value),

    /// Ask the approval channel before executing
    RequestApproval {
        /// Shown to the approver
        message: String,
    },

    /// Skip the call; the model receives the reason as the tool result
    Deny { reason: String },

    /// Stop the run with a limit-reached outcome
    Halt { reason: String },
}

/// Decision from [`Hook::before_model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDecision {
    Continue,
    /// Compact the history, keeping the most recent `keep` messages.
    Summarize { keep: usize },
}

/// Combined result of every hook for one tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallVerdict {
    Proceed {
        arguments: Value,
        /// Approval messages, joined, when any hook asked for approval.
        approval: Option<String>,
    },
    Deny {
        reason: String,
    },
    Halt {
        reason: String,
    },
}

// ============================================================================
// Hook Trait
// ============================================================================

/// A lifecycle-event subscriber.
#[async_trait]
pub trait Hook: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    async fn before_model(&self, state: &RunState) -> Result<TurnDecision, HookError> {
        let _ = state;
        Ok(TurnDecision::Continue)
    }

    /// Called for every requested tool call, before approval and execution.
    ///
    /// An error is treated as a denial.
    async fn pre_tool_call(
        &self,
        call: &ToolCallRequest,
        state: &RunState,
    ) -> Result<HookDecision, HookError> {
        let _ = (call, state);
        Ok(HookDecision::Allow)
    }

    /// Called with the recorded result message. Errors are logged only.
    async fn post_tool_call(
        &self,
        call: &ToolCallRequest,
        result: &Message,
    ) -> Result<(), HookError> {
        let _ = (call, result);
        Ok(())
    }

    /// Produce a summary of `messages`. Only called on the hook whose
    /// `before_model` asked for summarization.
    async fn summarize(&self, messages: &[Message]) -> Result<Option<String>, HookError> {
        let _ = messages;
        Ok(None)
    }
}

// ============================================================================
// Hook Set
// ============================================================================

/// Ordered collection of hooks.
#[derive(Clone, Default)]
pub struct HookSet {
    hooks: Vec<Arc<dyn Hook>>,
}

impl fmt::Debug for HookSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSet")
            .field("hooks", &self.names())
            .finish()
    }
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(self, hook: impl Hook + 'static) -> Self {
        self.with_arc(Arc::new(hook))
    }

    #[must_use]
    pub fn with_arc(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    /// First hook asking to summarize, with the number of messages to keep.
    pub async fn before_model(&self, state: &RunState) -> Option<(Arc<dyn Hook>, usize)> {
        for hook in &self.hooks {
            match hook.before_model(state).await {
                Ok(TurnDecision::Continue) => continue,
                Ok(TurnDecision::Summarize { keep }) => return Some((Arc::clone(hook), keep)),
                Err(e) => log::warn!("Hook '{}' failed before model call: {}", hook.name(), e),
            }
        }
        None
    }

    /// Evaluate every hook for one call.
    pub async fn pre_tool_call(&self, call: &ToolCallRequest, state: &RunState) -> CallVerdict {
        let mut current = call.clone();
        let mut approvals: Vec<String> = Vec::new();

        for hook in &self.hooks {
            match hook.pre_tool_call(&current, state).await {
                Ok(HookDecision::Allow) => {}
                Ok(HookDecision::Transform(arguments)) => current.arguments = arguments,
                Ok(HookDecision::RequestApproval { message }) => approvals.push(message),
                Ok(HookDecision::Deny { reason }) => return CallVerdict::Deny { reason },
                Ok(HookDecision::Halt { reason }) => return CallVerdict::Halt { reason },
                Err(e) => {
                    log::warn!("Hook '{}' failed for {}: {}", hook.name(), call.name, e);
                    return CallVerdict::Deny {
                        reason: format!("Hook '{}' failed: {}", hook.name(), e),
                    };
                }
            }
        }

        CallVerdict::Proceed {
            arguments: current.arguments,
            approval: (!approvals.is_empty()).then(|| approvals.join("\n")),
        }
    }

    /// Notify every hook of a recorded result.
    pub async fn post_tool_call(&self, call: &ToolCallRequest, result: &Message) {
        for hook in &self.hooks {
            if let Err(e) = hook.post_tool_call(call, result).await {
                log::warn!("Post-call hook '{}' failed for {}: {}", hook.name(), call.name, e);
            }
        }
    }
}
