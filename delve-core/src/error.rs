//! Error types for delve-core.
//!
//! Each layer owns its error enum: tools fail with
//! [`ToolError`](crate::tool::ToolError), interceptors with
//! [`InterceptError`](crate::interceptor::InterceptError), hooks with
//! [`HookError`](crate::hooks::HookError). The types here cover the run as a
//! whole: model failures, configuration, checkpoints.

use crate::state::Phase;
use crate::tool::ToolError;
use thiserror::Error;

// ============================================================================
// Run Error
// ============================================================================

/// Fatal errors that end a run.
///
/// Recoverable conditions (denied approvals, schema errors, policy
/// violations, hitting the tool-call limit) never surface here; they are
/// recorded as messages and reflected in [`RunOutcome`](crate::RunOutcome).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunError {
    /// Model call failed after exhausting retries
    #[error("Model call failed: {0}")]
    Model(#[from] ModelError),

    /// A tool failure configured to abort the run
    #[error("Tool '{tool}' failed: {source}")]
    Tool {
        tool: String,
        #[source]
        source: ToolError,
    },

    /// Invalid agent configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Checkpoint persistence failed
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// No checkpoint exists for the requested run
    #[error("No checkpoint found for run '{0}'")]
    RunNotFound(String),

    /// The loop attempted a transition the state machine does not allow
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: Phase, to: Phase },
}

// ============================================================================
// Model Error
// ============================================================================

/// Errors returned by a [`ChatModel`](crate::model::ChatModel).
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum ModelError {
    /// Network or provider failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider rejected the request due to rate limiting
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The provider answered with something that is not a usable response
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A scripted model ran out of responses
    #[error("Scripted model exhausted after {0} responses")]
    Exhausted(usize),

    /// The call was cancelled before a response arrived
    #[error("Model call cancelled")]
    Cancelled,
}

impl ModelError {
    /// Whether the orchestrator should retry this failure with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Transport(_) | ModelError::RateLimited(_))
    }
}

// ============================================================================
// Config Error
// ============================================================================

/// Errors raised while validating configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A field has an unusable value
    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// Two tools (registered, virtual, or sub-agent) share a name
    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    /// Agent or sub-agent name is empty
    #[error("Agent name must not be empty")]
    EmptyName,
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Checkpoint Error
// ============================================================================

/// Errors raised by a [`CheckpointStore`](crate::checkpoint::CheckpointStore).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CheckpointError {
    #[error("Checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Run ids are used as file names and must be plain identifiers
    #[error("Invalid run id: '{0}'")]
    InvalidRunId(String),

    /// Stored snapshot does not satisfy run-state invariants
    #[error("Corrupt checkpoint for run '{run_id}': {reason}")]
    Corrupt { run_id: String, reason: String },

    /// Resume was requested on an agent without a checkpoint store
    #[error("No checkpoint store configured")]
    NotConfigured,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::transport(ModelError::Transport("reset".into()), true)]
    #[case::rate_limited(ModelError::RateLimited("429".into()), true)]
    #[case::invalid(ModelError::InvalidResponse("empty".into()), false)]
    #[case::exhausted(ModelError::Exhausted(3), false)]
    #[case::cancelled(ModelError::Cancelled, false)]
    fn test_model_error_retryable(#[case] error: ModelError, #[case] expected: bool) {
        assert_eq!(error.is_retryable(), expected);
    }

    #[test]
    fn test_run_error_wraps_model_error() {
        let err: RunError = ModelError::Transport("boom".into()).into();
        assert_eq!(err.to_string(), "Model call failed: Transport error: boom");
    }

    #[test]
    fn test_tool_error_display() {
        let err = RunError::Tool {
            tool: "search_web".into(),
            source: ToolError::ExecutionFailed("503".into()),
        };
        assert_eq!(
            err.to_string(),
            "Tool 'search_web' failed: Execution failed: 503"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::invalid("run_limit", "must be greater than zero");
        assert_eq!(
            err.to_string(),
            "Invalid configuration for run_limit: must be greater than zero"
        );
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = RunError::InvalidTransition {
            from: Phase::Terminated,
            to: Phase::AwaitModel,
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition from TERMINATED to AWAIT_MODEL"
        );
    }
}
