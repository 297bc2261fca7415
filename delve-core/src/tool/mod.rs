//! Tool abstraction for agent actions.
//!
//! A [`Tool`] is anything the model can call by name: web search, a shell,
//! a sub-agent. Tools are registered in a [`ToolRegistry`] and always run
//! inside the [`InterceptorChain`](crate::interceptor::InterceptorChain),
//! which also contributes virtual tools of its own (todo list, filesystem).
//!
//! # Example
//!
//! ```
//! use delve_core::tool::{Tool, ToolContext, ToolError, ToolRegistry, ToolResult};
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//!
//! #[derive(Debug)]
//! struct Echo;
//!
//! #[async_trait]
//! impl Tool for Echo {
//!     fn name(&self) -> &str { "echo" }
//!     fn description(&self) -> &str { "Repeats its input" }
//!     fn parameters_schema(&self) -> Value {
//!         json!({
//!             "type": "object",
//!             "properties": { "text": { "type": "string" } },
//!             "required": ["text"]
//!         })
//!     }
//!     async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
//!         let text = input["text"].as_str().unwrap_or_default();
//!         Ok(ToolResult::new(text))
//!     }
//! }
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(Echo);
//! assert!(registry.contains("echo"));
//! ```

mod call;
mod context;
mod registry;

pub use call::{CallStatus, ToolCall};
pub use context::ToolContext;
pub use registry::ToolRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

// ============================================================================
// Tool Result
// ============================================================================

/// Result returned by a tool execution.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct ToolResult {
    /// The text the model will see.
    pub content: String,
    /// Structured metadata for observability; never shown to the model.
    pub metadata: Value,
    /// The tool ran but reports a failure the model should reason about.
    pub is_error: bool,
}

impl ToolResult {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Value::Null,
            is_error: false,
        }
    }

    pub fn with_metadata(content: impl Into<String>, metadata: Value) -> Self {
        Self {
            content: content.into(),
            metadata,
            is_error: false,
        }
    }

    /// A failure delivered to the model as an ordinary result.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Value::Null,
            is_error: true,
        }
    }

    #[must_use]
    pub fn and_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

// ============================================================================
// Tool Error
// ============================================================================

/// Errors that can occur during tool execution.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum ToolError {
    /// Arguments do not match the tool's schema.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Tool execution failed; may succeed on retry.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Tool not found in registry.
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// Tool execution timed out.
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// The call was refused by a sandbox or access policy.
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// The run was cancelled while the tool was in flight.
    #[error("Cancelled")]
    Cancelled,

    /// Retries ran out and the retry policy says to abort the run.
    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl ToolError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolError::ExecutionFailed(_) | ToolError::Timeout(_))
    }

    /// Failures that end the run instead of becoming a tool message.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ToolError::RetriesExhausted { .. })
    }
}

// ============================================================================
// Tool Schema
// ============================================================================

/// Name, description and JSON schema of a tool, as sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

// ============================================================================
// Tool Trait
// ============================================================================

/// A tool that agents can invoke to perform actions.
///
/// Each tool has a unique name, a description and a parameter schema that
/// the model uses to decide when and how to call it.
#[async_trait]
pub trait Tool: Send + Sync + fmt::Debug {
    /// Unique identifier for this tool (e.g., "search_web", "shell").
    fn name(&self) -> &str;

    /// Shown to the model to help it decide when to use the tool.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's input parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given input.
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError>;

    /// Whether calling this tool starts a sub-agent run.
    ///
    /// Consecutive sub-agent calls from one model turn run concurrently.
    fn is_subagent(&self) -> bool {
        false
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(self.name(), self.description(), self.parameters_schema())
    }
}

// ============================================================================
// Tool Set
// ============================================================================

/// Selection of tools by name, used to give sub-agents a subset.
///
/// ```
/// use delve_core::tool::ToolSet;
///
/// let research = ToolSet::Specific(vec!["search_web".into()]);
/// assert!(research.matches("search_web"));
/// assert!(!research.matches("shell"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolSet {
    #[default]
    All,
    None,
    Specific(Vec<String>),
    Except(Vec<String>),
}

impl ToolSet {
    pub fn matches(&self, tool_name: &str) -> bool {
        match self {
            ToolSet::All => true,
            ToolSet::None => false,
            ToolSet::Specific(names) => names.iter().any(|n| n == tool_name),
            ToolSet::Except(names) => !names.iter().any(|n| n == tool_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_tool_result_error() {
        let result = ToolResult::error("nope");
        assert!(result.is_error);
        assert_eq!(result.metadata, Value::Null);
    }

    #[test]
    fn test_tool_result_and_metadata() {
        let result = ToolResult::new("ok").and_metadata(serde_json::json!({"k": 1}));
        assert_eq!(result.metadata["k"], 1);
        assert!(!result.is_error);
    }

    #[rstest]
    #[case::execution(ToolError::ExecutionFailed("x".into()), true, false)]
    #[case::timeout(ToolError::Timeout(10), true, false)]
    #[case::invalid(ToolError::InvalidInput("x".into()), false, false)]
    #[case::policy(ToolError::PolicyViolation("x".into()), false, false)]
    #[case::not_found(ToolError::NotFound("x".into()), false, false)]
    #[case::exhausted(ToolError::RetriesExhausted { attempts: 2, last_error: "x".into() }, false, true)]
    fn test_tool_error_classes(
        #[case] error: ToolError,
        #[case] retryable: bool,
        #[case] fatal: bool,
    ) {
        assert_eq!(error.is_retryable(), retryable);
        assert_eq!(error.is_fatal(), fatal);
    }

    #[test]
    fn test_tool_error_display() {
        assert_eq!(ToolError::Timeout(1000).to_string(), "Timeout after 1000ms");
        assert_eq!(
            ToolError::PolicyViolation("read-only".into()).to_string(),
            "Policy violation: read-only"
        );
    }

    #[rstest]
    #[case::all(ToolSet::All, "shell", true)]
    #[case::none(ToolSet::None, "shell", false)]
    #[case::specific_hit(ToolSet::Specific(vec!["ls".into()]), "ls", true)]
    #[case::specific_miss(ToolSet::Specific(vec!["ls".into()]), "shell", false)]
    #[case::except_hit(ToolSet::Except(vec!["shell".into()]), "shell", false)]
    #[case::except_miss(ToolSet::Except(vec!["shell".into()]), "ls", true)]
    fn test_toolset_matches(#[case] set: ToolSet, #[case] name: &str, #[case] expected: bool) {
        assert_eq!(set.matches(name), expected);
    }
}
