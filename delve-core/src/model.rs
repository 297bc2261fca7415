//! Chat model seam and a scripted model for offline runs.
//!
//! The orchestrator talks to the model only through [`ChatModel`]: a request
//! is the ordered history plus the tool schemas, a response is either a
//! final answer or one or more tool calls. Provider clients implement the
//! trait outside this crate.
//!
//! [`ScriptedModel`] replays a fixed list of responses. It backs the tests
//! and the CLI's `--script` mode.

use crate::error::ModelError;
use crate::message::{Message, ToolCallRequest};
use crate::tool::ToolSchema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Input for one model turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
}

/// What the model decided to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelResponse {
    /// A final answer; ends the run.
    Final { content: String },
    /// Tools to call, with optional accompanying text.
    ToolCalls {
        #[serde(default)]
        content: String,
        calls: Vec<ToolCallRequest>,
    },
}

impl ModelResponse {
    pub fn final_answer(content: impl Into<String>) -> Self {
        ModelResponse::Final {
            content: content.into(),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        ModelResponse::ToolCalls {
            content: String::new(),
            calls,
        }
    }
}

/// A chat-completion endpoint.
#[async_trait]
pub trait ChatModel: Send + Sync + fmt::Debug {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError>;
}

/// Replays a fixed sequence of responses (or failures), one per call.
///
/// Requests are recorded so tests can inspect exactly what the model saw.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    steps: Vec<Result<ModelResponse, ModelError>>,
    current_index: AtomicUsize,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn from_steps(steps: Vec<Result<ModelResponse, ModelError>>) -> Self {
        Self {
            steps,
            current_index: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn from_responses(responses: Vec<ModelResponse>) -> Self {
        Self::from_steps(responses.into_iter().map(Ok).collect())
    }

    /// Load a JSON array of [`ModelResponse`]s.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let responses: Vec<ModelResponse> = serde_json::from_str(json)?;
        Ok(Self::from_responses(responses))
    }

    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(std::io::Error::other)
    }

    pub fn current_index(&self) -> usize {
        self.current_index.load(Ordering::SeqCst)
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_index() >= self.steps.len()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let index = self.current_index.fetch_add(1, Ordering::SeqCst);
        match self.steps.get(index) {
            Some(step) => step.clone(),
            None => Err(ModelError::Exhausted(self.steps.len())),
        }
    }
}
