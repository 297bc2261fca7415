//! # Delve Core
//!
//! Orchestration core for tool-using research agents.
//!
//! An [`Agent`] runs a reasoning loop over a [`ChatModel`]: it sends the
//! message history and tool schemas to the model, executes the tool calls it
//! gets back, and repeats until the model answers or a hook stops the run.
//!
//! ## Architecture
//!
//! - **Interceptors** ([`interceptor`]) wrap every tool call and model turn:
//!   virtual todo and filesystem tools, eviction of large results, argument
//!   repair, context editing, retries
//! - **Hooks** ([`hooks`]) decide whether a call runs at all: approvals,
//!   tool-call limits, shell sandboxing, and when to summarize the history
//! - **Sub-agents** ([`subagent`]) are tools that start a nested run with a
//!   fresh history and return only its final answer
//! - **Checkpoints** ([`checkpoint`]) persist the [`RunState`] after every
//!   mutation so a run can be resumed
//!
//! ## Example
//!
//! ```no_run
//! use delve_core::{AgentBuilder, ModelResponse, ScriptedModel};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let model = Arc::new(ScriptedModel::from_responses(vec![
//!     ModelResponse::final_answer("Quantum computers use qubits."),
//! ]));
//! let agent = AgentBuilder::new("researcher", model).build()?;
//!
//! let report = agent.run("What is quantum computing?").await?;
//! println!("{}", report.final_answer().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod approval;
pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod execution;
pub mod hooks;
pub mod interceptor;
pub mod message;
pub mod model;
pub mod orchestrator;
pub mod state;
pub mod subagent;
pub mod tool;
pub mod update;
pub mod vfs;

pub use approval::{
    ApprovalBroker, ApprovalDecision, ApprovalHandler, ApprovalRequest, AutoApprove, AutoDeny,
};
pub use catalog::{AgentCatalog, CatalogError};
pub use checkpoint::{
    CheckpointRecord, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
};
pub use config::AgentConfig;
pub use error::{CheckpointError, ConfigError, ModelError, RunError};
pub use execution::{ExecutionContext, ExecutionId};
pub use message::{Message, MessageStore, Role, ToolCallRequest};
pub use model::{ChatModel, ModelRequest, ModelResponse, ScriptedModel};
pub use orchestrator::{
    Agent, AgentBuilder, AgentGraph, RunOptions, RunReport, DEFAULT_CANCEL_GRACE,
};
pub use state::{Phase, RunOutcome, RunState, Transition};
pub use subagent::{SubAgentDispatcher, SubAgentSpec, SubAgentTool};
pub use tool::{Tool, ToolContext, ToolError, ToolRegistry, ToolResult, ToolSet};
pub use update::RunUpdate;
pub use vfs::VirtualFs;
