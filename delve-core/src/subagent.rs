//! Sub-agents exposed as tools.
//!
//! Each [`SubAgentSpec`] becomes a tool named after the spec that takes a
//! single `task` argument. Calling it starts a nested run with a fresh
//! message history and returns only the child's final answer, so the
//! parent's context grows by one tool message per delegation.
//!
//! Children see the parent's registered tools (filtered by the spec) but
//! never the sub-agent tools themselves, so delegation is one level deep.

use crate::hooks::HookSet;
use crate::interceptor::InterceptorChain;
use crate::model::ChatModel;
use crate::orchestrator::{Agent, RunOptions};
use crate::state::RunOutcome;
use crate::tool::{Tool, ToolContext, ToolError, ToolResult, ToolSet};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Name of the optional sub-agent that mirrors the parent.
pub const GENERAL_PURPOSE: &str = "general-purpose";

const GENERAL_PURPOSE_DESCRIPTION: &str = "General-purpose agent for researching complex \
questions, searching for files and content, and executing multi-step tasks. It has access \
to all tools of the main agent and works from the same instructions.";

/// Template for a sub-agent. Every invocation starts from scratch.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SubAgentSpec {
    pub name: String,
    /// Shown to the parent model as the tool description
    pub description: String,
    pub system_prompt: String,
    pub tools: ToolSet,
    pub interceptors: Option<InterceptorChain>,
    pub hooks: Option<HookSet>,
    pub model: Option<Arc<dyn ChatModel>>,
}

impl SubAgentSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            system_prompt: system_prompt.into(),
            tools: ToolSet::All,
            interceptors: None,
            hooks: None,
            model: None,
        }
    }

    #[must_use]
    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn with_interceptors(mut self, interceptors: InterceptorChain) -> Self {
        self.interceptors = Some(interceptors);
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = Some(hooks);
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = Some(model);
        self
    }
}

/// The set of sub-agents offered to one agent, plus the defaults children
/// use when their spec does not override them.
///
/// Without explicit defaults, children inherit the parent's interceptors,
/// hooks and model.
#[derive(Debug, Clone, Default)]
pub struct SubAgentDispatcher {
    specs: Vec<SubAgentSpec>,
    general_purpose: bool,
    default_interceptors: Option<InterceptorChain>,
    default_hooks: Option<HookSet>,
    default_model: Option<Arc<dyn ChatModel>>,
}

impl SubAgentDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_spec(mut self, spec: SubAgentSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Also offer a [`GENERAL_PURPOSE`] sub-agent with the parent's
    /// instructions and every tool.
    #[must_use]
    pub fn with_general_purpose(mut self, enabled: bool) -> Self {
        self.general_purpose = enabled;
        self
    }

    #[must_use]
    pub fn with_default_interceptors(mut self, interceptors: InterceptorChain) -> Self {
        self.default_interceptors = Some(interceptors);
        self
    }

    #[must_use]
    pub fn with_default_hooks(mut self, hooks: HookSet) -> Self {
        self.default_hooks = Some(hooks);
        self
    }

    #[must_use]
    pub fn with_default_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.default_model = Some(model);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty() && !self.general_purpose
    }

    /// Specs in registration order, the general-purpose one last.
    pub(crate) fn resolved_specs(&self, parent_prompt: &str) -> Vec<SubAgentSpec> {
        let mut specs = self.specs.clone();
        if self.general_purpose {
            specs.push(SubAgentSpec::new(
                GENERAL_PURPOSE,
                GENERAL_PURPOSE_DESCRIPTION,
                parent_prompt,
            ));
        }
        specs
    }

    pub(crate) fn interceptors_for<'a>(
        &'a self,
        spec: &'a SubAgentSpec,
        parent: &'a InterceptorChain,
    ) -> &'a InterceptorChain {
        spec.interceptors
            .as_ref()
            .or(self.default_interceptors.as_ref())
            .unwrap_or(parent)
    }

    pub(crate) fn hooks_for<'a>(&'a self, spec: &'a SubAgentSpec, parent: &'a HookSet) -> &'a HookSet {
        spec.hooks
            .as_ref()
            .or(self.default_hooks.as_ref())
            .unwrap_or(parent)
    }

    pub(crate) fn model_for(
        &self,
        spec: &SubAgentSpec,
        parent: &Arc<dyn ChatModel>,
    ) -> Arc<dyn ChatModel> {
        Arc::clone(
            spec.model
                .as_ref()
                .or(self.default_model.as_ref())
                .unwrap_or(parent),
        )
    }
}

// ============================================================================
// Sub-agent tool
// ============================================================================

/// Tool that delegates a task to a nested agent run.
#[derive(Debug)]
pub struct SubAgentTool {
    name: String,
    description: String,
    agent: Arc<Agent>,
}

impl SubAgentTool {
    pub(crate) fn new(spec: &SubAgentSpec, agent: Agent) -> Self {
        Self {
            name: spec.name.clone(),
            description: spec.description.clone(),
            agent: Arc::new(agent),
        }
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Detailed description of the task for the sub-agent"
                }
            },
            "required": ["task"],
            "additionalProperties": false
        })
    }

    fn is_subagent(&self) -> bool {
        true
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let task = input
            .get("task")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("Missing required field: task".into()))?;

        let execution = ctx.execution.child(&self.name);
        log::debug!("Starting sub-agent run at {}", execution.path_string());

        let options = RunOptions::new()
            .with_cancellation(ctx.cancellation.child_token())
            .with_execution(execution)
            .with_files(Arc::clone(&ctx.files));

        let report = self
            .agent
            .run_with(task, options)
            .await
            .map_err(|e| ToolError::Other(format!("Sub-agent '{}' failed: {}", self.name, e)))?;

        let metadata = json!({
            "subagent": self.name,
            "run_id": report.run_id,
            "messages": report.state.messages().len(),
            "tool_calls": report.state.tool_call_count(),
        });
        match report.outcome {
            RunOutcome::Completed { answer } => Ok(ToolResult::with_metadata(answer, metadata)),
            RunOutcome::LimitReached { reason } => Ok(ToolResult::error(format!(
                "Sub-agent '{}' stopped before finishing: {}",
                self.name, reason
            ))
            .and_metadata(metadata)),
            RunOutcome::Cancelled => Err(ToolError::Cancelled),
        }
    }
}
