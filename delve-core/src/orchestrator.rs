//! The reasoning loop.
//!
//! An [`Agent`] is an immutable bundle of model, tools, interceptors, hooks
//! and sub-agents. Every call to [`Agent::run`] drives one [`RunState`]
//! through the phases of the state machine:
//!
//! ```text
//! AWAIT_MODEL ──tool call──────────▶ EXECUTE_TOOL ──batch done──▶ AWAIT_MODEL
//!      │      ──needs approval─────▶ AWAIT_APPROVAL ─approved──▶ EXECUTE_TOOL
//!      │      ──over threshold─────▶ SUMMARIZE ──compacted──────▶ AWAIT_MODEL
//!      └──────final answer, limit or cancel──────────────────────▶ TERMINATED
//! ```
//!
//! The loop is sequential per run. The only fan-out is for consecutive
//! sub-agent calls in one model response, which execute concurrently and
//! are appended in completion order.

use crate::approval::{ApprovalDecision, ApprovalHandler, ApprovalRequest, AutoDeny};
use crate::checkpoint::CheckpointStore;
use crate::config::{AgentConfig, ModelRetryConfig};
use crate::error::{CheckpointError, ConfigError, RunError};
use crate::execution::ExecutionContext;
use crate::hooks::{
    CallVerdict, Hook, HookSet, HumanInTheLoopHook, ShellSandboxHook, SummarizationHook,
    ToolCallLimitHook,
};
use crate::interceptor::{
    ContextEditing, Filesystem, InterceptorChain, LargeResultEviction, PatchToolCalls, TodoList,
    ToolRetry,
};
use crate::message::{Message, ToolCallRequest};
use crate::model::{ChatModel, ModelRequest, ModelResponse};
use crate::state::{Phase, RunOutcome, RunState, Transition};
use crate::subagent::{SubAgentDispatcher, SubAgentTool};
use crate::tool::{
    CallStatus, Tool, ToolCall, ToolContext, ToolError, ToolRegistry, ToolResult, ToolSchema,
    ToolSet,
};
use crate::update::{
    RunUpdate, UpdateSink, EVENT_APPROVAL_REQUESTED, EVENT_LIMIT_REACHED, EVENT_MODEL_RESPONSE,
    EVENT_RUN_CANCELLED, EVENT_RUN_COMPLETED, EVENT_RUN_STARTED, EVENT_SUMMARIZED,
    EVENT_TOOL_COMPLETED, EVENT_TOOL_STARTED,
};
use crate::vfs::VirtualFs;
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SUMMARY_PREFIX: &str = "Here is a summary of the conversation to date:\n\n";

/// How long in-flight tool calls may keep running after cancellation.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// Agent Builder
// ============================================================================

/// Assembles an [`Agent`].
///
/// ```no_run
/// use delve_core::{AgentBuilder, ScriptedModel};
/// use std::sync::Arc;
///
/// let agent = AgentBuilder::new("researcher", Arc::new(ScriptedModel::default()))
///     .with_system_prompt("You are a careful researcher.")
///     .build()
///     .unwrap();
/// ```
#[derive(Debug)]
pub struct AgentBuilder {
    name: String,
    system_prompt: String,
    model: Arc<dyn ChatModel>,
    tools: ToolRegistry,
    interceptors: InterceptorChain,
    hooks: HookSet,
    subagents: SubAgentDispatcher,
    approvals: Arc<dyn ApprovalHandler>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    files: Arc<VirtualFs>,
    model_retry: ModelRetryConfig,
    cancel_grace: Duration,
}

impl AgentBuilder {
    pub fn new(name: impl Into<String>, model: Arc<dyn ChatModel>) -> Self {
        Self {
            name: name.into(),
            system_prompt: String::new(),
            model,
            tools: ToolRegistry::new(),
            interceptors: InterceptorChain::new(),
            hooks: HookSet::new(),
            subagents: SubAgentDispatcher::new(),
            approvals: Arc::new(AutoDeny),
            checkpoints: None,
            files: Arc::new(VirtualFs::new()),
            model_retry: ModelRetryConfig::default(),
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.register(tool);
        self
    }

    #[must_use]
    pub fn with_tool_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register_arc(tool);
        self
    }

    #[must_use]
    pub fn with_interceptors(mut self, interceptors: InterceptorChain) -> Self {
        self.interceptors = interceptors;
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = hooks;
        self
    }

    /// Install the standard interceptor chain and hook set for `config`.
    ///
    /// Interceptors, outermost first: todo list, filesystem, eviction,
    /// argument patching, context editing (if configured), retry. Hooks in
    /// order: approval, summarization (using `summary_model`), tool-call
    /// limit, shell sandbox (if configured).
    #[must_use]
    pub fn with_config(mut self, config: &AgentConfig, summary_model: Arc<dyn ChatModel>) -> Self {
        let mut interceptors = InterceptorChain::new()
            .with(TodoList::new())
            .with(Filesystem::new(config.filesystem.clone()))
            .with(LargeResultEviction::new(config.eviction.clone()))
            .with(PatchToolCalls::new());
        if let Some(context_editing) = &config.context_editing {
            interceptors = interceptors.with(ContextEditing::new(context_editing.clone()));
        }
        self.interceptors = interceptors.with(ToolRetry::new(config.retry.clone()));

        let mut hooks = HookSet::new()
            .with(HumanInTheLoopHook::new(config.approvals.clone()))
            .with(SummarizationHook::new(config.summarization.clone(), summary_model))
            .with(ToolCallLimitHook::new(config.tool_call_limit.clone()));
        if let Some(sandbox) = &config.shell_sandbox {
            hooks = hooks.with(ShellSandboxHook::new(sandbox.clone()));
        }
        self.hooks = hooks;
        self.model_retry = config.model_retry.clone();
        self
    }

    #[must_use]
    pub fn with_subagents(mut self, subagents: SubAgentDispatcher) -> Self {
        self.subagents = subagents;
        self
    }

    /// Where approval requests go. Defaults to [`AutoDeny`].
    #[must_use]
    pub fn with_approvals(mut self, approvals: Arc<dyn ApprovalHandler>) -> Self {
        self.approvals = approvals;
        self
    }

    #[must_use]
    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Share a virtual filesystem, e.g. to pre-load files.
    #[must_use]
    pub fn with_files(mut self, files: Arc<VirtualFs>) -> Self {
        self.files = files;
        self
    }

    #[must_use]
    pub fn with_model_retry(mut self, model_retry: ModelRetryConfig) -> Self {
        self.model_retry = model_retry;
        self
    }

    /// Time in-flight tools get to finish after the run is cancelled.
    /// Calls still running afterwards are abandoned.
    #[must_use]
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Validate names and build the sub-agent tools.
    pub fn build(self) -> Result<Agent, ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        self.model_retry.validate()?;

        let virtual_tools: Vec<String> = self
            .interceptors
            .tool_schemas()
            .into_iter()
            .map(|s| s.name)
            .collect();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for name in self.tools.list().into_iter().map(str::to_string).chain(virtual_tools) {
            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicateTool(name));
            }
        }

        let base = self.tools.clone();
        let mut tools = self.tools;
        for spec in self.subagents.resolved_specs(&self.system_prompt) {
            if spec.name.trim().is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if !seen.insert(spec.name.clone()) {
                return Err(ConfigError::DuplicateTool(spec.name));
            }

            let interceptors = self.subagents.interceptors_for(&spec, &self.interceptors).clone();
            if let ToolSet::Specific(names) = &spec.tools {
                let child_virtual: Vec<String> =
                    interceptors.tool_schemas().into_iter().map(|s| s.name).collect();
                if let Some(unknown) = names
                    .iter()
                    .find(|n| !base.contains(n) && !child_virtual.contains(n))
                {
                    return Err(ConfigError::invalid(
                        "subagent.tools",
                        format!("sub-agent '{}' lists unknown tool '{}'", spec.name, unknown),
                    ));
                }
            }

            let child = Agent {
                name: spec.name.clone(),
                system_prompt: spec.system_prompt.clone(),
                model: self.subagents.model_for(&spec, &self.model),
                tools: Arc::new(base.subset(&spec.tools)),
                interceptors,
                hooks: self.subagents.hooks_for(&spec, &self.hooks).clone(),
                approvals: Arc::clone(&self.approvals),
                checkpoints: None,
                files: Arc::clone(&self.files),
                model_retry: self.model_retry.clone(),
                cancel_grace: self.cancel_grace,
            };
            tools.register(SubAgentTool::new(&spec, child));
        }

        Ok(Agent {
            name: self.name,
            system_prompt: self.system_prompt,
            model: self.model,
            tools: Arc::new(tools),
            interceptors: self.interceptors,
            hooks: self.hooks,
            approvals: self.approvals,
            checkpoints: self.checkpoints,
            files: self.files,
            model_retry: self.model_retry,
            cancel_grace: self.cancel_grace,
        })
    }
}

// ============================================================================
// Agent
// ============================================================================

/// A configured agent. Cheap to share; each run owns its own state.
#[derive(Debug)]
pub struct Agent {
    name: String,
    system_prompt: String,
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    interceptors: InterceptorChain,
    hooks: HookSet,
    approvals: Arc<dyn ApprovalHandler>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    files: Arc<VirtualFs>,
    model_retry: ModelRetryConfig,
    cancel_grace: Duration,
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    run_id: Option<String>,
    cancellation: Option<CancellationToken>,
    updates: Option<mpsc::UnboundedSender<RunUpdate>>,
    execution: Option<ExecutionContext>,
    files: Option<Arc<VirtualFs>>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed run id, e.g. to make checkpoint files predictable.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    #[must_use]
    pub fn with_updates(mut self, tx: mpsc::UnboundedSender<RunUpdate>) -> Self {
        self.updates = Some(tx);
        self
    }

    #[must_use]
    pub fn with_execution(mut self, execution: ExecutionContext) -> Self {
        self.execution = Some(execution);
        self
    }

    #[must_use]
    pub fn with_files(mut self, files: Arc<VirtualFs>) -> Self {
        self.files = Some(files);
        self
    }
}

/// Result of a run that reached `TERMINATED`.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub state: RunState,
    /// Phase changes in the order they happened.
    pub transitions: Vec<Transition>,
}

impl RunReport {
    pub fn final_answer(&self) -> Option<&str> {
        match &self.outcome {
            RunOutcome::Completed { answer } => Some(answer),
            _ => None,
        }
    }
}

impl Agent {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn files(&self) -> &Arc<VirtualFs> {
        &self.files
    }

    pub async fn run(&self, input: &str) -> Result<RunReport, RunError> {
        self.run_with(input, RunOptions::new()).await
    }

    pub async fn run_with(&self, input: &str, options: RunOptions) -> Result<RunReport, RunError> {
        let run_id = options
            .run_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let state = RunState::new(run_id, &self.system_prompt, input);
        let run = Run::new(self, state, options);
        log::info!(
            "Agent '{}' starting run {} at {}",
            self.name,
            run.state.run_id(),
            run.ctx.execution.path_string()
        );
        run.updates.emit(
            EVENT_RUN_STARTED,
            format!("Run started for agent '{}'", self.name),
            json!({ "run_id": run.state.run_id(), "agent": self.name }),
        );
        run.checkpoint().await?;
        run.drive().await
    }

    /// Continue the latest checkpoint of `run_id`.
    ///
    /// A run that already terminated is returned as-is.
    pub async fn resume(&self, run_id: &str, options: RunOptions) -> Result<RunReport, RunError> {
        let store = self
            .checkpoints
            .as_ref()
            .ok_or(CheckpointError::NotConfigured)?;
        let record = store
            .latest(run_id)
            .await?
            .ok_or_else(|| RunError::RunNotFound(run_id.to_string()))?;
        let mut state = RunState::from_snapshot(&record.snapshot)?;
        log::info!(
            "Resuming run {} from checkpoint {} in phase {}",
            run_id,
            record.sequence,
            state.phase()
        );

        if !state.is_terminated() {
            state.clear_subagents();
            let pending: Vec<String> = state
                .calls()
                .iter()
                .filter(|c| c.status() == CallStatus::Pending)
                .map(|c| c.id.clone())
                .collect();
            for id in pending {
                if let Some(call) = state.call_mut(&id) {
                    call.reject("Run was interrupted before the call was admitted");
                }
            }
        }

        let options = options.with_run_id(run_id);
        Run::new(self, state, options).drive().await
    }

    /// Static description of the agent for logging.
    pub fn describe(&self) -> AgentGraph {
        let subagents: Vec<String> = self
            .tools
            .list()
            .into_iter()
            .filter(|n| self.tools.is_subagent(n))
            .map(str::to_string)
            .collect();
        let tools = self
            .tools
            .list()
            .into_iter()
            .filter(|n| !self.tools.is_subagent(n))
            .map(str::to_string)
            .collect();
        AgentGraph {
            name: self.name.clone(),
            transitions: Phase::TRANSITIONS.to_vec(),
            interceptors: self.interceptors.names().into_iter().map(str::to_string).collect(),
            hooks: self.hooks.names().into_iter().map(str::to_string).collect(),
            tools,
            virtual_tools: self
                .interceptors
                .tool_schemas()
                .into_iter()
                .map(|s| s.name)
                .collect(),
            subagents,
        }
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        let mut schemas = self.interceptors.tool_schemas();
        schemas.extend(self.tools.schemas());
        schemas
    }
}

// ============================================================================
// Structural dump
// ============================================================================

/// Phases, transitions and components of an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentGraph {
    pub name: String,
    pub transitions: Vec<(Phase, Phase, &'static str)>,
    pub interceptors: Vec<String>,
    pub hooks: Vec<String>,
    pub tools: Vec<String>,
    pub virtual_tools: Vec<String>,
    pub subagents: Vec<String>,
}

impl fmt::Display for AgentGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "agent {}", self.name)?;
        writeln!(f, "  states:")?;
        for (from, to, label) in &self.transitions {
            writeln!(f, "    {from} -> {to} : {label}")?;
        }
        writeln!(f, "  interceptors: {}", self.interceptors.join(" > "))?;
        writeln!(f, "  hooks: {}", self.hooks.join(", "))?;
        writeln!(f, "  tools: {}", self.tools.join(", "))?;
        writeln!(f, "  virtual tools: {}", self.virtual_tools.join(", "))?;
        write!(f, "  sub-agents: {}", self.subagents.join(", "))
    }
}

// ============================================================================
// Run
// ============================================================================

/// Outcome of admitting one call through hooks and approval.
enum Admission {
    Execute(ToolCallRequest),
    Skipped,
    Halt(String),
    Cancelled,
}

struct Run<'a> {
    agent: &'a Agent,
    state: RunState,
    ctx: Arc<ToolContext>,
    updates: UpdateSink,
    transitions: Vec<Transition>,
}

impl<'a> Run<'a> {
    fn new(agent: &'a Agent, state: RunState, options: RunOptions) -> Self {
        let files = options.files.unwrap_or_else(|| Arc::clone(&agent.files));
        let ctx = ToolContext::new(state.run_id(), Arc::clone(&agent.tools), files)
            .with_execution(options.execution.unwrap_or_default())
            .with_cancellation(options.cancellation.unwrap_or_default())
            .with_todos(state.todos().to_vec());
        Self {
            agent,
            state,
            ctx: Arc::new(ctx),
            updates: UpdateSink::new(options.updates),
            transitions: Vec::new(),
        }
    }

    fn cancelled(&self) -> bool {
        self.ctx.cancellation.is_cancelled()
    }

    fn enter(&mut self, next: Phase) -> Result<(), RunError> {
        let from = self.state.phase();
        if !from.can_transition_to(next) {
            return Err(RunError::InvalidTransition { from, to: next });
        }
        if from != next {
            log::debug!("Run {}: {} -> {}", self.state.run_id(), from, next);
            self.transitions.push(Transition { from, to: next });
        }
        self.state.set_phase(next);
        Ok(())
    }

    async fn checkpoint(&self) -> Result<(), RunError> {
        if let Some(store) = &self.agent.checkpoints {
            let snapshot = self.state.to_snapshot().map_err(CheckpointError::from)?;
            store.append(self.state.run_id(), snapshot).await?;
        }
        Ok(())
    }

    async fn finish(&mut self, outcome: RunOutcome) -> Result<(), RunError> {
        self.enter(Phase::Terminated)?;
        let (event, message) = match &outcome {
            RunOutcome::Completed { .. } => (EVENT_RUN_COMPLETED, "Run completed".to_string()),
            RunOutcome::LimitReached { reason } => (EVENT_LIMIT_REACHED, reason.clone()),
            RunOutcome::Cancelled => (EVENT_RUN_CANCELLED, "Run cancelled".to_string()),
        };
        log::info!("Run {} terminated: {}", self.state.run_id(), message);
        self.updates.emit(
            event,
            message,
            json!({
                "run_id": self.state.run_id(),
                "tool_calls": self.state.tool_call_count(),
                "total_tokens": self.state.total_tokens(),
            }),
        );
        self.state.terminate(outcome);
        self.checkpoint().await
    }

    async fn drive(mut self) -> Result<RunReport, RunError> {
        while !self.state.is_terminated() {
            if self.cancelled() {
                self.finish(RunOutcome::Cancelled).await?;
                break;
            }
            self.enter(Phase::AwaitModel)?;
            self.prepare_turn().await?;
            if self.state.is_terminated() {
                break;
            }

            let Some(response) = self.call_model().await? else {
                self.finish(RunOutcome::Cancelled).await?;
                break;
            };

            match response {
                ModelResponse::Final { content } => {
                    self.record_model_response(&content, 0);
                    self.state.append(Message::assistant(content.clone(), Vec::new()));
                    self.finish(RunOutcome::Completed { answer: content }).await?;
                }
                ModelResponse::ToolCalls { content, calls } if calls.is_empty() => {
                    log::warn!("Model returned an empty tool-call list; treating it as an answer");
                    self.record_model_response(&content, 0);
                    self.state.append(Message::assistant(content.clone(), Vec::new()));
                    self.finish(RunOutcome::Completed { answer: content }).await?;
                }
                ModelResponse::ToolCalls { content, calls } => {
                    self.record_model_response(&content, calls.len());
                    let origin = self.state.append(Message::assistant(content, calls.clone()));
                    for call in &calls {
                        self.state.track_call(ToolCall::new(call, origin));
                    }
                    self.checkpoint().await?;
                    if let Some(outcome) = self.process_calls(calls).await? {
                        self.finish(outcome).await?;
                    }
                }
            }
        }

        let outcome = self
            .state
            .outcome()
            .cloned()
            .unwrap_or(RunOutcome::Cancelled);
        Ok(RunReport {
            run_id: self.state.run_id().to_string(),
            outcome,
            state: self.state,
            transitions: self.transitions,
        })
    }

    fn record_model_response(&self, content: &str, calls: usize) {
        self.updates.emit(
            EVENT_MODEL_RESPONSE,
            if calls == 0 {
                "Model produced a final answer".to_string()
            } else {
                format!("Model requested {calls} tool call(s)")
            },
            json!({ "content": content, "tool_calls": calls }),
        );
    }

    /// Model-turn interceptors, then summarization if a hook asks for it.
    async fn prepare_turn(&mut self) -> Result<(), RunError> {
        self.agent
            .interceptors
            .before_model(self.state.messages_mut())
            .await;

        if let Some((hook, keep)) = self.agent.hooks.before_model(&self.state).await {
            self.summarize(hook, keep).await?;
        }
        self.checkpoint().await
    }

    async fn summarize(&mut self, hook: Arc<dyn Hook>, keep: usize) -> Result<(), RunError> {
        self.enter(Phase::Summarize)?;
        let Some(range) = self.state.messages().compaction_range(keep) else {
            log::debug!("Nothing to summarize while keeping {} messages", keep);
            return self.enter(Phase::AwaitModel);
        };

        let cancellation = self.ctx.cancellation.clone();
        let messages = self.state.messages().messages()[range.clone()].to_vec();
        let summary = tokio::select! {
            biased;
            _ = cancellation.cancelled() => None,
            summary = hook.summarize(&messages) => Some(summary),
        };
        let Some(summary) = summary else {
            return self.finish(RunOutcome::Cancelled).await;
        };

        match summary {
            Ok(Some(text)) => {
                let before = self.state.total_tokens();
                let replaced = range.len();
                self.state
                    .messages_mut()
                    .replace_range(range, Message::user(format!("{SUMMARY_PREFIX}{text}")));
                log::info!(
                    "Summarized {} messages: {} -> {} tokens",
                    replaced,
                    before,
                    self.state.total_tokens()
                );
                self.updates.emit(
                    EVENT_SUMMARIZED,
                    format!("Summarized {replaced} messages"),
                    json!({
                        "messages": replaced,
                        "tokens_before": before,
                        "tokens_after": self.state.total_tokens(),
                    }),
                );
            }
            Ok(None) => log::debug!("Hook '{}' produced no summary", hook.name()),
            Err(e) => log::warn!("Summarization by '{}' failed: {}", hook.name(), e),
        }
        self.enter(Phase::AwaitModel)
    }

    /// Call the model, retrying transient failures. `None` means cancelled.
    async fn call_model(&self) -> Result<Option<ModelResponse>, RunError> {
        let request = ModelRequest {
            messages: self.state.messages().messages().to_vec(),
            tools: self.agent.tool_schemas(),
        };
        let retry = &self.agent.model_retry;
        let mut attempt: u32 = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = self.ctx.cancellation.cancelled() => return Ok(None),
                result = self.agent.model.complete(&request) => result,
            };
            match result {
                Ok(response) => return Ok(Some(response)),
                Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                    let delay = retry.retry_delay(attempt);
                    attempt += 1;
                    log::warn!(
                        "Model call failed (attempt {}): {}. Retrying in {:?}",
                        attempt,
                        e,
                        delay
                    );
                    tokio::select! {
                        biased;
                        _ = self.ctx.cancellation.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Tool batches
    // ------------------------------------------------------------------------

    /// Admit and execute every call of one model response, in order.
    /// Returns an outcome when the run must stop.
    async fn process_calls(
        &mut self,
        calls: Vec<ToolCallRequest>,
    ) -> Result<Option<RunOutcome>, RunError> {
        let mut index = 0;
        while index < calls.len() {
            if self.cancelled() {
                self.abandon(&calls[index..], "Run cancelled before the call started");
                return Ok(Some(RunOutcome::Cancelled));
            }

            // Consecutive sub-agent calls form one concurrent group.
            let group_end = if self.agent.tools.is_subagent(&calls[index].name) {
                calls[index..]
                    .iter()
                    .position(|c| !self.agent.tools.is_subagent(&c.name))
                    .map_or(calls.len(), |offset| index + offset)
            } else {
                index + 1
            };

            let mut admitted = Vec::new();
            for (offset, call) in calls[index..group_end].iter().enumerate() {
                match self.admit(call).await? {
                    Admission::Execute(call) => admitted.push(call),
                    Admission::Skipped => {}
                    Admission::Halt(reason) => {
                        if !self.execute_group(admitted).await? {
                            self.abandon(&calls[index + offset..], "Run cancelled before the call started");
                            return Ok(Some(RunOutcome::Cancelled));
                        }
                        self.halt(&calls[index + offset..], &reason).await?;
                        return Ok(Some(RunOutcome::LimitReached { reason }));
                    }
                    Admission::Cancelled => {
                        self.abandon(&calls[index + offset..], "Run cancelled while awaiting approval");
                        self.abandon(&admitted, "Run cancelled before the call started");
                        return Ok(Some(RunOutcome::Cancelled));
                    }
                }
            }

            if !self.execute_group(admitted).await? {
                self.abandon(&calls[group_end..], "Run cancelled before the call started");
                return Ok(Some(RunOutcome::Cancelled));
            }
            index = group_end;
        }
        Ok(None)
    }

    /// Run the pre-call hooks and, if requested, wait for approval.
    async fn admit(&mut self, call: &ToolCallRequest) -> Result<Admission, RunError> {
        let verdict = self.agent.hooks.pre_tool_call(call, &self.state).await;
        let (arguments, approval) = match verdict {
            CallVerdict::Halt { reason } => return Ok(Admission::Halt(reason)),
            CallVerdict::Deny { reason } => {
                log::info!("Tool call {} ({}) denied: {}", call.id, call.name, reason);
                self.reject(call, &reason, format!("Tool call denied: {reason}"))
                    .await?;
                return Ok(Admission::Skipped);
            }
            CallVerdict::Proceed {
                arguments,
                approval,
            } => (arguments, approval),
        };

        if let Some(message) = approval {
            self.enter(Phase::AwaitApproval)?;
            let request = ApprovalRequest {
                run_id: self.state.run_id().to_string(),
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: arguments.clone(),
                message,
            };
            self.updates.emit(
                EVENT_APPROVAL_REQUESTED,
                format!("Approval requested for {}", call.name),
                json!({ "call_id": call.id, "tool": call.name, "arguments": arguments }),
            );
            self.checkpoint().await?;

            let decision = tokio::select! {
                biased;
                _ = self.ctx.cancellation.cancelled() => return Ok(Admission::Cancelled),
                decision = self.agent.approvals.decide(&request) => decision,
            };
            if let ApprovalDecision::Deny { reason } = decision {
                let reason = reason.unwrap_or_else(|| "no reason given".to_string());
                log::info!("Tool call {} ({}) rejected: {}", call.id, call.name, reason);
                self.reject(
                    call,
                    &reason,
                    format!("Tool call {} was rejected by the operator: {}", call.name, reason),
                )
                .await?;
                return Ok(Admission::Skipped);
            }
        }

        if let Some(entry) = self.state.call_mut(&call.id) {
            entry.advance(CallStatus::Approved);
        }
        self.state.count_tool_call();
        let mut admitted = call.clone();
        admitted.arguments = arguments;
        Ok(Admission::Execute(admitted))
    }

    async fn reject(
        &mut self,
        call: &ToolCallRequest,
        reason: &str,
        message: String,
    ) -> Result<(), RunError> {
        if let Some(entry) = self.state.call_mut(&call.id) {
            entry.reject(reason);
        }
        self.state
            .append(Message::tool_error(call.id.clone(), call.name.clone(), message));
        self.checkpoint().await
    }

    /// Record a halting hook: the remaining calls are rejected and listed in
    /// one system notice.
    async fn halt(&mut self, remaining: &[ToolCallRequest], reason: &str) -> Result<(), RunError> {
        for call in remaining {
            if let Some(entry) = self.state.call_mut(&call.id) {
                entry.reject(reason);
            }
        }
        let skipped: Vec<String> = remaining
            .iter()
            .map(|c| format!("{} ({})", c.name, c.id))
            .collect();
        log::warn!("Run {} halted: {}", self.state.run_id(), reason);
        self.state.append(Message::system(format!(
            "{}. Tool calls not executed: {}",
            reason,
            skipped.join(", ")
        )));
        self.checkpoint().await
    }

    /// Mark calls that will never run because the run was cancelled.
    fn abandon(&mut self, calls: &[ToolCallRequest], reason: &str) {
        for call in calls {
            let Some(entry) = self.state.call_mut(&call.id) else {
                continue;
            };
            match entry.status() {
                CallStatus::Pending => entry.reject(reason),
                CallStatus::Approved => entry.complete(0, Err(reason.to_string())),
                _ => continue,
            }
            self.state
                .append(Message::tool_error(call.id.clone(), call.name.clone(), reason));
        }
    }

    /// Execute admitted calls; several at once for sub-agent groups.
    /// Returns `false` if the run was cancelled meanwhile.
    ///
    /// Cancellation is cooperative: tools and child runs observe the token
    /// and get the agent's grace period to wind down, and whatever they
    /// return is recorded. Calls still running after that are abandoned.
    async fn execute_group(&mut self, calls: Vec<ToolCallRequest>) -> Result<bool, RunError> {
        if calls.is_empty() {
            return Ok(true);
        }
        self.enter(Phase::ExecuteTool)?;

        let agent = self.agent;
        let ctx = Arc::clone(&self.ctx);
        let mut in_flight = FuturesUnordered::new();
        for call in &calls {
            if agent.tools.is_subagent(&call.name) {
                self.state.subagent_started(&call.id);
            }
            self.updates.emit(
                EVENT_TOOL_STARTED,
                format!("Calling {}", call.name),
                json!({ "call_id": call.id, "tool": call.name, "arguments": call.arguments }),
            );
            let ctx = Arc::clone(&ctx);
            let call = call.clone();
            in_flight.push(async move {
                let report = agent.interceptors.execute(call.clone(), &ctx).await;
                (call, report)
            });
        }
        if calls.len() > 1 {
            log::debug!("Executing {} sub-agent calls concurrently", calls.len());
        }
        self.checkpoint().await?;

        let mut finished: BTreeSet<String> = BTreeSet::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancellation.cancelled() => break,
                next = in_flight.next() => next,
            };
            match next {
                Some((call, report)) => {
                    finished.insert(call.id.clone());
                    self.record(&call, report.attempts, report.result).await?;
                }
                None => return Ok(true),
            }
        }

        log::info!(
            "Run {} cancelled with {} call(s) in flight; waiting up to {:?}",
            self.state.run_id(),
            calls.len() - finished.len(),
            agent.cancel_grace
        );
        let deadline = tokio::time::sleep(agent.cancel_grace);
        tokio::pin!(deadline);
        loop {
            let next = tokio::select! {
                biased;
                next = in_flight.next() => next,
                _ = &mut deadline => break,
            };
            match next {
                Some((call, report)) => {
                    finished.insert(call.id.clone());
                    self.record(&call, report.attempts, report.result).await?;
                }
                None => break,
            }
        }
        drop(in_flight);

        let unfinished: Vec<ToolCallRequest> = calls
            .into_iter()
            .filter(|c| !finished.contains(&c.id))
            .collect();
        if !unfinished.is_empty() {
            log::warn!(
                "Abandoning {} call(s) that ignored cancellation",
                unfinished.len()
            );
        }
        self.abandon(&unfinished, "Tool call cancelled");
        self.state.clear_subagents();
        self.checkpoint().await?;
        Ok(false)
    }

    /// Append the message for one finished call and update the ledger.
    async fn record(
        &mut self,
        call: &ToolCallRequest,
        attempts: u32,
        result: Result<ToolResult, ToolError>,
    ) -> Result<(), RunError> {
        let mut fatal = None;
        let (message, ledger) = match result {
            Ok(result) if result.is_error => (
                Message::tool_error(call.id.clone(), call.name.clone(), result.content.clone()),
                Err(result.content),
            ),
            Ok(result) => (
                Message::tool_result(call.id.clone(), call.name.clone(), result.content.clone()),
                Ok(result.content),
            ),
            Err(e) => {
                let text = format!("Error: {e}");
                if e.is_fatal() {
                    fatal = Some(e);
                } else {
                    log::info!("Tool call {} ({}) failed: {}", call.id, call.name, text);
                }
                (
                    Message::tool_error(call.id.clone(), call.name.clone(), text.clone()),
                    Err(text),
                )
            }
        };

        let is_error = ledger.is_err();
        if let Some(entry) = self.state.call_mut(&call.id) {
            entry.complete(attempts, ledger);
        }
        self.state.subagent_finished(&call.id);
        self.agent.hooks.post_tool_call(call, &message).await;
        self.state.append(message);
        self.state.set_todos(self.ctx.todos());
        self.updates.emit(
            EVENT_TOOL_COMPLETED,
            format!("{} finished", call.name),
            json!({ "call_id": call.id, "tool": call.name, "attempts": attempts, "is_error": is_error }),
        );
        self.checkpoint().await?;

        match fatal {
            Some(source) => Err(RunError::Tool {
                tool: call.name.clone(),
                source,
            }),
            None => Ok(()),
        }
    }
}
