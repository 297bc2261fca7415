//! Per-run resources handed to tools and interceptors.

use super::ToolRegistry;
use crate::execution::ExecutionContext;
use crate::interceptor::TodoItem;
use crate::vfs::VirtualFs;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Everything a tool call may touch besides its arguments.
///
/// One context exists per run. Concurrent sub-agent calls from the same
/// turn share it by reference, so mutable parts sit behind locks.
#[derive(Debug)]
pub struct ToolContext {
    pub run_id: String,
    pub execution: ExecutionContext,
    pub cancellation: CancellationToken,
    /// Tools visible to this run; virtual tools are not listed here.
    pub registry: Arc<ToolRegistry>,
    /// Shared virtual filesystem, also the eviction side-store.
    pub files: Arc<VirtualFs>,
    todos: Mutex<Vec<TodoItem>>,
}

impl ToolContext {
    pub fn new(
        run_id: impl Into<String>,
        registry: Arc<ToolRegistry>,
        files: Arc<VirtualFs>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            execution: ExecutionContext::root(),
            cancellation: CancellationToken::new(),
            registry,
            files,
            todos: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_execution(mut self, execution: ExecutionContext) -> Self {
        self.execution = execution;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    #[must_use]
    pub fn with_todos(self, todos: Vec<TodoItem>) -> Self {
        self.set_todos(todos);
        self
    }

    pub fn todos(&self) -> Vec<TodoItem> {
        self.todos
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_todos(&self, todos: Vec<TodoItem>) {
        *self.todos.lock().unwrap_or_else(PoisonError::into_inner) = todos;
    }
}
