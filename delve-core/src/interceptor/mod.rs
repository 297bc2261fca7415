//! Interceptors wrapped around tool execution and model turns.
//!
//! An [`Interceptor`] sees every tool call on its way to the tool and every
//! result on its way back, in the style of a middleware stack:
//!
//! ```text
//! chain.execute(call)
//!   └─ todo_list.around_tool ─ filesystem.around_tool ─ ... ─ retry.around_tool
//!                                                                  └─ tool.execute
//! ```
//!
//! The first interceptor in the chain is the outermost. Order is whatever the
//! chain was built with; nothing is sorted or registered implicitly.
//!
//! Interceptors can also:
//! - contribute virtual tools ([`tools`](Interceptor::tools)) that they answer
//!   themselves without reaching the registry, and
//! - edit the message history right before each model call
//!   ([`before_model`](Interceptor::before_model)).
//!
//! # Example
//!
//! ```
//! use delve_core::interceptor::{Interceptor, InterceptorChain, Next};
//! use delve_core::message::ToolCallRequest;
//! use delve_core::tool::{ToolContext, ToolError, ToolResult};
//! use async_trait::async_trait;
//!
//! #[derive(Debug)]
//! struct AuditLog;
//!
//! #[async_trait]
//! impl Interceptor for AuditLog {
//!     fn name(&self) -> &str {
//!         "audit_log"
//!     }
//!
//!     async fn around_tool(
//!         &self,
//!         call: ToolCallRequest,
//!         ctx: &ToolContext,
//!         next: Next<'_>,
//!     ) -> Result<ToolResult, ToolError> {
//!         log::info!("Tool invoked: {} with input: {}", call.name, call.arguments);
//!         let result = next.run(call, ctx).await;
//!         log::info!("Tool finished: ok={}", result.is_ok());
//!         result
//!     }
//! }
//!
//! let chain = InterceptorChain::new().with(AuditLog);
//! assert_eq!(chain.names(), vec!["audit_log"]);
//! ```

mod context_editing;
mod eviction;
mod filesystem;
mod patch;
mod retry;
mod todo;

pub use context_editing::ContextEditing;
pub use eviction::LargeResultEviction;
pub use filesystem::Filesystem;
pub use patch::{repair_arguments, PatchToolCalls};
pub use retry::ToolRetry;
pub use todo::{TodoItem, TodoList, TodoStatus, READ_TODOS, WRITE_TODOS};

use crate::message::{MessageStore, ToolCallRequest};
use crate::tool::{ToolContext, ToolError, ToolResult, ToolSchema};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Intercept Error
// ============================================================================

/// Errors raised by [`Interceptor::before_model`].
///
/// These never end a run; the chain logs them and moves on.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InterceptError {
    #[error("Interceptor execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Interceptor error: {0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

// ============================================================================
// Interceptor Trait
// ============================================================================

/// A named transform around tool execution and model turns.
///
/// Every method has a pass-through default, so an interceptor only
/// implements the hooks it cares about.
#[async_trait]
pub trait Interceptor: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Virtual tools answered by this interceptor.
    fn tools(&self) -> Vec<ToolSchema> {
        Vec::new()
    }

    /// Edit the history before it is sent to the model.
    async fn before_model(&self, messages: &mut MessageStore) -> Result<(), InterceptError> {
        let _ = messages;
        Ok(())
    }

    /// Wrap one tool call. Call `next.run` to continue down the chain, or
    /// return without it to answer the call directly.
    async fn around_tool(
        &self,
        call: ToolCallRequest,
        ctx: &ToolContext,
        next: Next<'_>,
    ) -> Result<ToolResult, ToolError> {
        next.run(call, ctx).await
    }
}

// ============================================================================
// Next
// ============================================================================

/// The rest of the chain below the current interceptor.
///
/// `Next` is `Copy`: an interceptor may run it several times (retries) or
/// not at all (virtual tools, rejections).
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Arc<dyn Interceptor>],
    attempts: &'a AtomicU32,
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.rest.len())
            .finish()
    }
}

impl<'a> Next<'a> {
    /// Pass the call to the next interceptor, or to the registered tool once
    /// the chain is exhausted.
    pub async fn run(self, call: ToolCallRequest, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        match self.rest.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    rest,
                    attempts: self.attempts,
                };
                head.around_tool(call, ctx, next).await
            }
            None => {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                let tool = ctx
                    .registry
                    .get(&call.name)
                    .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
                tool.execute(call.arguments, ctx).await
            }
        }
    }
}

// ============================================================================
// Interceptor Chain
// ============================================================================

/// What happened to one call inside the chain.
#[derive(Debug)]
pub struct CallReport {
    pub result: Result<ToolResult, ToolError>,
    /// Times the registered tool was invoked (at least 1).
    pub attempts: u32,
}

/// Ordered list of interceptors.
///
/// Cloning a chain is cheap; interceptors are shared behind `Arc` and keep
/// no per-run state of their own.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("interceptors", &self.names())
            .finish()
    }
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor. Earlier interceptors wrap later ones.
    #[must_use]
    pub fn with(self, interceptor: impl Interceptor + 'static) -> Self {
        self.with_arc(Arc::new(interceptor))
    }

    #[must_use]
    pub fn with_arc(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    /// Schemas of all virtual tools, in chain order.
    pub fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.interceptors.iter().flat_map(|i| i.tools()).collect()
    }

    /// Run every `before_model` in order. Failures are logged and skipped.
    pub async fn before_model(&self, messages: &mut MessageStore) {
        for interceptor in &self.interceptors {
            if let Err(e) = interceptor.before_model(messages).await {
                log::warn!(
                    "Interceptor '{}' failed before model call: {}",
                    interceptor.name(),
                    e
                );
            }
        }
    }

    /// Run one tool call through the whole chain.
    pub async fn execute(&self, call: ToolCallRequest, ctx: &ToolContext) -> CallReport {
        let attempts = AtomicU32::new(0);
        let next = Next {
            rest: &self.interceptors,
            attempts: &attempts,
        };
        let result = next.run(call, ctx).await;
        CallReport {
            result,
            attempts: attempts.load(Ordering::SeqCst).max(1),
        }
    }
}
