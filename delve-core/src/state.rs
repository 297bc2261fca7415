//! Run state owned by the orchestrator and persisted in checkpoints.

use crate::error::CheckpointError;
use crate::interceptor::TodoItem;
use crate::message::{Message, MessageStore, Role};
use crate::tool::ToolCall;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// Phase
// ============================================================================

/// States of the reasoning loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    AwaitModel,
    AwaitApproval,
    ExecuteTool,
    Summarize,
    Terminated,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::AwaitModel,
        Phase::AwaitApproval,
        Phase::ExecuteTool,
        Phase::Summarize,
        Phase::Terminated,
    ];

    /// Edges of the state machine with a short label, used for the
    /// structural dump and for validating transitions.
    pub const TRANSITIONS: [(Phase, Phase, &'static str); 12] = [
        (Phase::AwaitModel, Phase::AwaitApproval, "tool call needs approval"),
        (Phase::AwaitModel, Phase::ExecuteTool, "tool call"),
        (Phase::AwaitModel, Phase::Summarize, "token threshold exceeded"),
        (Phase::AwaitModel, Phase::Terminated, "final answer, limit or cancel"),
        (Phase::AwaitApproval, Phase::ExecuteTool, "approved"),
        (Phase::AwaitApproval, Phase::AwaitModel, "denied, batch done"),
        (Phase::AwaitApproval, Phase::Terminated, "limit or cancel"),
        (Phase::ExecuteTool, Phase::AwaitApproval, "next call needs approval"),
        (Phase::ExecuteTool, Phase::AwaitModel, "batch done"),
        (Phase::ExecuteTool, Phase::Terminated, "limit, cancel or fatal error"),
        (Phase::Summarize, Phase::AwaitModel, "history compacted"),
        (Phase::Summarize, Phase::Terminated, "cancel"),
    ];

    /// Whether the loop may move from `self` to `next`. Staying in the
    /// same phase is always allowed except once terminated.
    pub fn can_transition_to(self, next: Phase) -> bool {
        (self == next && self != Phase::Terminated)
            || Self::TRANSITIONS
                .iter()
                .any(|(from, to, _)| *from == self && *to == next)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::AwaitModel => "AWAIT_MODEL",
            Phase::AwaitApproval => "AWAIT_APPROVAL",
            Phase::ExecuteTool => "EXECUTE_TOOL",
            Phase::Summarize => "SUMMARIZE",
            Phase::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

/// One step of the loop, recorded in [`RunReport`](crate::RunReport).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
}

// ============================================================================
// Run Outcome
// ============================================================================

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The model produced a final answer.
    Completed { answer: String },
    /// A hook stopped the run, e.g. the tool-call limit was reached.
    LimitReached { reason: String },
    /// The run was cancelled from outside.
    Cancelled,
}

// ============================================================================
// Run State
// ============================================================================

/// Everything needed to continue a run.
///
/// The cumulative token count is the message store's running total, so it
/// always equals the sum of the message token counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    run_id: String,
    messages: MessageStore,
    tool_call_count: u64,
    calls: Vec<ToolCall>,
    active_subagents: BTreeSet<String>,
    todos: Vec<TodoItem>,
    phase: Phase,
    terminated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    outcome: Option<RunOutcome>,
}

impl RunState {
    /// Fresh state seeded with the system prompt (if any) and the user input.
    pub fn new(run_id: impl Into<String>, system_prompt: &str, input: &str) -> Self {
        let mut messages = MessageStore::new();
        if !system_prompt.is_empty() {
            messages.append(Message::system(system_prompt));
        }
        messages.append(Message::user(input));
        Self {
            run_id: run_id.into(),
            messages,
            tool_call_count: 0,
            calls: Vec::new(),
            active_subagents: BTreeSet::new(),
            todos: Vec::new(),
            phase: Phase::AwaitModel,
            terminated: false,
            outcome: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub(crate) fn messages_mut(&mut self) -> &mut MessageStore {
        &mut self.messages
    }

    pub fn total_tokens(&self) -> usize {
        self.messages.total_tokens()
    }

    /// Tool calls admitted for execution so far. Never decreases.
    pub fn tool_call_count(&self) -> u64 {
        self.tool_call_count
    }

    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    pub fn call(&self, id: &str) -> Option<&ToolCall> {
        self.calls.iter().rev().find(|c| c.id == id)
    }

    pub fn active_subagents(&self) -> &BTreeSet<String> {
        &self.active_subagents
    }

    pub fn todos(&self) -> &[TodoItem] {
        &self.todos
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    /// Messages with the given role, in order.
    pub fn messages_with_role(&self, role: Role) -> impl Iterator<Item = &Message> {
        self.messages.messages().iter().filter(move |m| m.role() == role)
    }

    pub(crate) fn append(&mut self, message: Message) -> u64 {
        self.messages.append(message)
    }

    pub(crate) fn track_call(&mut self, call: ToolCall) {
        self.calls.push(call);
    }

    pub(crate) fn call_mut(&mut self, id: &str) -> Option<&mut ToolCall> {
        self.calls.iter_mut().rev().find(|c| c.id == id)
    }

    pub(crate) fn count_tool_call(&mut self) {
        self.tool_call_count += 1;
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub(crate) fn set_todos(&mut self, todos: Vec<TodoItem>) {
        self.todos = todos;
    }

    pub(crate) fn subagent_started(&mut self, call_id: &str) {
        self.active_subagents.insert(call_id.to_string());
    }

    pub(crate) fn subagent_finished(&mut self, call_id: &str) {
        self.active_subagents.remove(call_id);
    }

    /// Runs interrupted mid-batch leave stale entries behind.
    pub(crate) fn clear_subagents(&mut self) {
        self.active_subagents.clear();
    }

    pub(crate) fn terminate(&mut self, outcome: RunOutcome) {
        self.phase = Phase::Terminated;
        self.terminated = true;
        self.outcome = Some(outcome);
    }

    /// Serialize for a checkpoint.
    pub fn to_snapshot(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Rebuild from a checkpoint snapshot, checking the accounting invariant.
    pub fn from_snapshot(snapshot: &str) -> Result<Self, CheckpointError> {
        let state: RunState = serde_json::from_str(snapshot)?;
        if !state.messages.is_consistent() {
            return Err(CheckpointError::Corrupt {
                run_id: state.run_id,
                reason: "token total does not match messages".to_string(),
            });
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::TodoStatus;
    use crate::message::ToolCallRequest;
    use crate::tool::CallStatus;
    use serde_json::json;

    #[test]
    fn test_new_state() {
        let state = RunState::new("r1", "sys", "question");
        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.phase(), Phase::AwaitModel);
        assert!(!state.is_terminated());
        assert_eq!(state.total_tokens(), state.messages().recount());
    }

    #[test]
    fn test_empty_system_prompt_skipped() {
        let state = RunState::new("r1", "", "question");
        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.messages().messages()[0].role(), Role::User);
    }

    #[test]
    fn test_snapshot_round_trip_byte_identical() {
        let mut state = RunState::new("r1", "sys", "question");
        let request = ToolCallRequest::new("c1", "search_web", json!({"query": "q", "a": [1, 2]}));
        let origin = state.append(Message::assistant("", vec![request.clone()]));
        let mut call = ToolCall::new(&request, origin);
        call.advance(CallStatus::Approved);
        call.complete(1, Ok("hits".into()));
        state.track_call(call);
        state.count_tool_call();
        state.append(Message::tool_result("c1", "search_web", "hits"));
        state.set_todos(vec![TodoItem::new("research", TodoStatus::InProgress)]);
        state.subagent_started("c7");

        let snapshot = state.to_snapshot().unwrap();
        let loaded = RunState::from_snapshot(&snapshot).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.to_snapshot().unwrap(), snapshot);
    }

    #[test]
    fn test_corrupt_snapshot_rejected() {
        let state = RunState::new("r1", "sys", "question");
        let mut value: serde_json::Value = serde_json::from_str(&state.to_snapshot().unwrap()).unwrap();
        value["messages"]["total_tokens"] = json!(1);
        let err = RunState::from_snapshot(&value.to_string()).unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
    }

    #[test]
    fn test_terminate() {
        let mut state = RunState::new("r1", "", "q");
        state.terminate(RunOutcome::Cancelled);
        assert!(state.is_terminated());
        assert_eq!(state.phase(), Phase::Terminated);
        assert_eq!(state.outcome(), Some(&RunOutcome::Cancelled));
    }

    #[test]
    fn test_phase_transitions() {
        assert!(Phase::AwaitModel.can_transition_to(Phase::ExecuteTool));
        assert!(Phase::ExecuteTool.can_transition_to(Phase::ExecuteTool));
        assert!(Phase::Summarize.can_transition_to(Phase::AwaitModel));
        assert!(!Phase::Summarize.can_transition_to(Phase::ExecuteTool));
        assert!(!Phase::Terminated.can_transition_to(Phase::AwaitModel));
        assert!(!Phase::Terminated.can_transition_to(Phase::Terminated));
    }

    #[test]
    fn test_phase_serde_names() {
        assert_eq!(serde_json::to_string(&Phase::AwaitModel).unwrap(), "\"AWAIT_MODEL\"");
        assert_eq!(Phase::ExecuteTool.to_string(), "EXECUTE_TOOL");
    }
}
