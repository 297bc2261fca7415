//! Conversation history with token accounting.
//!
//! [`MessageStore`] is the only way to add or remove [`Message`]s, and it
//! keeps `total_tokens` equal to the sum of the per-message counts after
//! every mutation. Messages are immutable once appended: the store hands out
//! shared references only.
//!
//! Token counts are estimates (bytes / 3.2 plus a per-message overhead).
//! They are stable across runs, which is what thresholds and checkpoints
//! need; they are not exact for any particular tokenizer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

/// Bytes per token for prose, scaled by 10 to stay in integer arithmetic.
const BYTES_PER_TOKEN_X10: usize = 32;

/// Formatting overhead charged to every message (role label, separators).
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Structural overhead charged per tool-call request.
const TOOL_CALL_OVERHEAD_TOKENS: usize = 10;

/// Estimate the token count of a piece of text.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() * 10).div_ceil(BYTES_PER_TOKEN_X10)
}

/// Truncate `s` to at most `max_bytes` on a char boundary.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ============================================================================
// Message
// ============================================================================

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-assigned id; tool results refer back to it.
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One entry of the conversation.
///
/// Built with the role constructors; the id is assigned by
/// [`MessageStore::append`] and reflects append order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: u64,
    role: Role,
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    is_error: bool,
    tokens: usize,
}

impl Message {
    fn build(role: Role, content: String, tool_calls: Vec<ToolCallRequest>) -> Self {
        let mut tokens = MESSAGE_OVERHEAD_TOKENS + estimate_tokens(&content);
        for call in &tool_calls {
            tokens += TOOL_CALL_OVERHEAD_TOKENS
                + estimate_tokens(&call.name)
                + estimate_tokens(&call.arguments.to_string());
        }
        Self {
            id: 0,
            role,
            content,
            tool_calls,
            tool_call_id: None,
            tool_name: None,
            is_error: false,
            tokens,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::build(Role::System, content.into(), Vec::new())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::build(Role::User, content.into(), Vec::new())
    }

    /// Assistant turn, optionally carrying tool-call requests.
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self::build(Role::Assistant, content.into(), tool_calls)
    }

    /// Result of the tool call `call_id`.
    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut message = Self::build(Role::Tool, content.into(), Vec::new());
        message.tool_call_id = Some(call_id.into());
        message.tool_name = Some(tool_name.into());
        message
    }

    /// Tool message explaining why the call failed or was not executed.
    pub fn tool_error(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut message = Self::tool_result(call_id, tool_name, content);
        message.is_error = true;
        message
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        &self.tool_calls
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_call_id.as_deref()
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.tool_name.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn tokens(&self) -> usize {
        self.tokens
    }

    /// Whether this is an assistant turn that requested tools.
    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

// ============================================================================
// Message Store
// ============================================================================

/// Ordered conversation history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageStore {
    messages: Vec<Message>,
    total_tokens: usize,
    next_id: u64,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return the id it was given.
    pub fn append(&mut self, mut message: Message) -> u64 {
        message.id = self.next_id;
        self.next_id += 1;
        self.total_tokens += message.tokens;
        let id = message.id;
        self.messages.push(message);
        id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn get(&self, id: u64) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Whether a tool message answering `call_id` exists.
    pub fn has_result_for(&self, call_id: &str) -> bool {
        self.messages
            .iter()
            .any(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(call_id))
    }

    /// Remove the messages with the given ids, returning the tokens freed.
    pub fn remove_ids(&mut self, ids: &BTreeSet<u64>) -> usize {
        let mut freed = 0;
        self.messages.retain(|m| {
            if ids.contains(&m.id) {
                freed += m.tokens;
                false
            } else {
                true
            }
        });
        self.total_tokens -= freed;
        freed
    }

    /// Replace `range` (by index) with a single message.
    ///
    /// The replacement takes a fresh id and the position of the first
    /// replaced message.
    pub fn replace_range(&mut self, range: Range<usize>, mut replacement: Message) {
        let removed: usize = self.messages[range.clone()].iter().map(|m| m.tokens).sum();
        replacement.id = self.next_id;
        self.next_id += 1;
        self.total_tokens = self.total_tokens - removed + replacement.tokens;
        self.messages.splice(range, std::iter::once(replacement));
    }

    /// Index range to compact while keeping the last `keep` messages.
    ///
    /// Leading system messages are never included. The end of the range is
    /// pulled back so a tool result is never separated from the assistant
    /// turn that requested it. Returns `None` when nothing can be compacted.
    pub fn compaction_range(&self, keep: usize) -> Option<Range<usize>> {
        let start = self
            .messages
            .iter()
            .position(|m| m.role != Role::System)?;
        let mut end = self.messages.len().checked_sub(keep)?;
        while end > start && end < self.messages.len() && self.messages[end].role == Role::Tool {
            end -= 1;
        }
        (end > start).then_some(start..end)
    }

    /// Recompute the token total from scratch.
    pub fn recount(&self) -> usize {
        self.messages.iter().map(|m| m.tokens).sum()
    }

    /// Check the accounting invariant, e.g. after loading from a checkpoint.
    pub fn is_consistent(&self) -> bool {
        self.recount() == self.total_tokens && self.messages.iter().all(|m| m.id < self.next_id)
    }
}
