//! Compacts the history once it grows past a token threshold.

use super::{Hook, HookError, TurnDecision};
use crate::config::SummarizationConfig;
use crate::message::{Message, Role};
use crate::model::{ChatModel, ModelRequest, ModelResponse};
use crate::state::RunState;
use async_trait::async_trait;
use std::sync::Arc;

/// Requests the `SUMMARIZE` phase when the run holds more than
/// `max_tokens_before_summary` tokens, and writes the summary with the model
/// it was constructed with.
///
/// The summarization model is always passed explicitly. It may be the
/// reasoning model or a cheaper one.
#[derive(Debug)]
pub struct SummarizationHook {
    config: SummarizationConfig,
    model: Arc<dyn ChatModel>,
}

impl SummarizationHook {
    pub fn new(config: SummarizationConfig, model: Arc<dyn ChatModel>) -> Self {
        Self { config, model }
    }

    fn transcript(messages: &[Message]) -> String {
        let mut out = String::new();
        for message in messages {
            match message.role() {
                Role::Tool => out.push_str(&format!(
                    "[tool result: {}]\n{}\n\n",
                    message.tool_name().unwrap_or("unknown"),
                    message.content()
                )),
                role => {
                    out.push_str(&format!("[{role}]\n{}\n", message.content()));
                    for call in message.tool_calls() {
                        out.push_str(&format!("(called {} with {})\n", call.name, call.arguments));
                    }
                    out.push('\n');
                }
            }
        }
        out
    }
}

#[async_trait]
impl Hook for SummarizationHook {
    fn name(&self) -> &str {
        "summarization"
    }

    async fn before_model(&self, state: &RunState) -> Result<TurnDecision, HookError> {
        if state.total_tokens() > self.config.max_tokens_before_summary {
            Ok(TurnDecision::Summarize {
                keep: self.config.messages_to_keep,
            })
        } else {
            Ok(TurnDecision::Continue)
        }
    }

    async fn summarize(&self, messages: &[Message]) -> Result<Option<String>, HookError> {
        let request = ModelRequest {
            messages: vec![
                Message::system(self.config.prompt.clone()),
                Message::user(Self::transcript(messages)),
            ],
            tools: Vec::new(),
        };
        match self.model.complete(&request).await? {
            ModelResponse::Final { content } => Ok(Some(content)),
            ModelResponse::ToolCalls { .. } => Err(HookError::ExecutionFailed(
                "summarization model requested tool calls".into(),
            )),
        }
    }
}
