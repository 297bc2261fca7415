//! Parent/child tracking for nested runs.
//!
//! Every run carries an [`ExecutionContext`]. Sub-agent runs get a child
//! context, so logs and updates can say where in the tree they came from
//! (`root`, `research-agent`, ...).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier of one run in the execution tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a run in the tree of nested runs.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ExecutionContext {
    pub execution_id: ExecutionId,
    pub parent_id: Option<ExecutionId>,
    /// 0 for a top-level run.
    pub depth: usize,
    /// Names of the sub-agents on the way down from the root.
    pub path: Vec<String>,
}

impl ExecutionContext {
    pub fn root() -> Self {
        Self {
            execution_id: ExecutionId::new(),
            parent_id: None,
            depth: 0,
            path: Vec::new(),
        }
    }

    /// Context for a sub-agent spawned from this run.
    pub fn child(&self, agent_name: &str) -> Self {
        let mut path = self.path.clone();
        path.push(agent_name.to_string());
        Self {
            execution_id: ExecutionId::new(),
            parent_id: Some(self.execution_id.clone()),
            depth: self.depth + 1,
            path,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Human-readable location, e.g. `root` or `research-agent`.
    pub fn path_string(&self) -> String {
        if self.path.is_empty() {
            "root".to_string()
        } else {
            self.path.join(" > ")
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::root()
    }
}
