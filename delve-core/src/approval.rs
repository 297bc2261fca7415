//! Approval channel for gated tool calls.
//!
//! When a hook requests approval the orchestrator parks the run in
//! `AWAIT_APPROVAL` and asks its [`ApprovalHandler`]. Every request carries
//! the tool-call id, so approvals are unambiguous even when several calls are
//! pending at once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// A call waiting for an operator decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub run_id: String,
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    /// Text from the hooks that asked for approval
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Deny {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl ApprovalDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        ApprovalDecision::Deny {
            reason: Some(reason.into()),
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalDecision::Approve)
    }
}

/// Answers approval requests.
///
/// Implementations must be safe to call concurrently; the decision for one
/// call id never applies to another.
#[async_trait]
pub trait ApprovalHandler: Send + Sync + fmt::Debug {
    async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision;
}

/// Approves everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalHandler for AutoApprove {
    async fn decide(&self, _request: &ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::Approve
    }
}

/// Denies everything. The default when no handler is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoDeny;

#[async_trait]
impl ApprovalHandler for AutoDeny {
    async fn decide(&self, _request: &ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::deny("No approval handler configured")
    }
}

// ============================================================================
// Approval Broker
// ============================================================================

/// Forwards requests to an external party over a channel and waits for
/// [`resolve`](ApprovalBroker::resolve) to be called with the matching run
/// and call id.
///
/// Pending requests are keyed by `(run_id, call_id)`: concurrent sub-agent
/// runs share one broker and may reuse the same provider call ids.
///
/// ```no_run
/// # async fn example() {
/// use delve_core::approval::{ApprovalBroker, ApprovalDecision};
///
/// let (broker, mut requests) = ApprovalBroker::new();
/// let broker = std::sync::Arc::new(broker);
/// let resolver = std::sync::Arc::clone(&broker);
/// tokio::spawn(async move {
///     while let Some(request) = requests.recv().await {
///         resolver.resolve(&request.run_id, &request.call_id, ApprovalDecision::Approve);
///     }
/// });
/// # }
/// ```
#[derive(Debug)]
pub struct ApprovalBroker {
    requests: mpsc::UnboundedSender<ApprovalRequest>,
    pending: Mutex<HashMap<PendingKey, oneshot::Sender<ApprovalDecision>>>,
    timeout: Option<Duration>,
}

/// `(run_id, call_id)`
type PendingKey = (String, String);

fn key(run_id: &str, call_id: &str) -> PendingKey {
    (run_id.to_string(), call_id.to_string())
}

impl ApprovalBroker {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ApprovalRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let broker = Self {
            requests: tx,
            pending: Mutex::new(HashMap::new()),
            timeout: None,
        };
        (broker, rx)
    }

    /// Deny requests that are not resolved within `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Deliver a decision. Returns false if no request with this run and
    /// call id is waiting.
    pub fn resolve(&self, run_id: &str, call_id: &str, decision: ApprovalDecision) -> bool {
        let sender = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key(run_id, call_id));
        match sender {
            Some(tx) => tx.send(decision).is_ok(),
            None => {
                log::warn!("No pending approval for call '{}' in run {}", call_id, run_id);
                false
            }
        }
    }

    /// `(run_id, call_id)` pairs currently waiting, sorted.
    pub fn pending_ids(&self) -> Vec<(String, String)> {
        let mut ids: Vec<PendingKey> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    fn forget(&self, request: &ApprovalRequest) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key(&request.run_id, &request.call_id));
    }
}

#[async_trait]
impl ApprovalHandler for ApprovalBroker {
    async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision {
        let (tx, rx) = oneshot::channel();
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key(&request.run_id, &request.call_id), tx);
        if previous.is_some() {
            log::warn!(
                "Replaced a pending approval for call '{}' in run {}",
                request.call_id,
                request.run_id
            );
        }

        if self.requests.send(request.clone()).is_err() {
            self.forget(request);
            return ApprovalDecision::deny("Approval channel closed");
        }

        let received = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.forget(request);
                    log::warn!("Approval for call '{}' timed out", request.call_id);
                    return ApprovalDecision::deny("Approval timed out");
                }
            },
            None => rx.await,
        };

        received.unwrap_or_else(|_| ApprovalDecision::deny("Approval request dropped"))
    }
}
