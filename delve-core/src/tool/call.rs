//! Per-run ledger entry for a tool call.

use crate::message::ToolCallRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle of a tool call.
///
/// Transitions only move forward:
///
/// ```text
/// Pending ──> Approved ──> Executed ──> Done
///    │                         └──────> Retried
///    └──────> Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
    /// Finished on the first attempt.
    Done,
    /// Finished after one or more retries.
    Retried,
}

impl CallStatus {
    pub fn can_advance_to(self, next: CallStatus) -> bool {
        use CallStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Approved, Executed) | (Executed, Done) | (Executed, Retried)
        )
    }

    pub fn is_final(self) -> bool {
        matches!(self, CallStatus::Rejected | CallStatus::Done | CallStatus::Retried)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallStatus::Pending => "pending",
            CallStatus::Approved => "approved",
            CallStatus::Rejected => "rejected",
            CallStatus::Executed => "executed",
            CallStatus::Done => "done",
            CallStatus::Retried => "retried",
        };
        f.write_str(s)
    }
}

/// A tool call as tracked by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    /// Id of the assistant message that requested the call.
    pub origin: u64,
    status: CallStatus,
    attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ToolCall {
    pub fn new(request: &ToolCallRequest, origin: u64) -> Self {
        Self {
            id: request.id.clone(),
            name: request.name.clone(),
            arguments: request.arguments.clone(),
            origin,
            status: CallStatus::Pending,
            attempts: 0,
            result: None,
            error: None,
        }
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    /// Times the underlying tool was invoked.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Move to `next`; backwards or skipping transitions are ignored and
    /// reported as `false`.
    pub fn advance(&mut self, next: CallStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            log::warn!(
                "Ignoring tool call transition {} -> {} for '{}' ({})",
                self.status,
                next,
                self.name,
                self.id
            );
            false
        }
    }

    pub fn reject(&mut self, reason: impl Into<String>) {
        if self.advance(CallStatus::Rejected) {
            self.error = Some(reason.into());
        }
    }

    /// Record the outcome of execution. The final status is `Retried` when
    /// the tool needed more than one attempt.
    pub fn complete(&mut self, attempts: u32, outcome: Result<String, String>) {
        if !self.advance(CallStatus::Executed) {
            return;
        }
        self.attempts = attempts;
        match outcome {
            Ok(content) => self.result = Some(content),
            Err(error) => self.error = Some(error),
        }
        let next = if attempts > 1 {
            CallStatus::Retried
        } else {
            CallStatus::Done
        };
        self.advance(next);
    }
}
