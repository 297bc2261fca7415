//! Retries transient tool failures.

use super::{Interceptor, Next};
use crate::config::{OnFailure, RetryConfig};
use crate::message::ToolCallRequest;
use crate::tool::{ToolContext, ToolError, ToolResult};
use async_trait::async_trait;
use serde_json::json;

/// Re-runs the rest of the chain when it fails with a retryable error
/// ([`ToolError::is_retryable`]).
///
/// A deterministic failure is attempted `max_retries + 1` times. What happens
/// next is [`OnFailure`]: a fatal [`ToolError::RetriesExhausted`], or a
/// failure result the model can read. Non-retryable errors pass through on
/// the first attempt.
#[derive(Debug)]
pub struct ToolRetry {
    config: RetryConfig,
}

impl ToolRetry {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Interceptor for ToolRetry {
    fn name(&self) -> &str {
        "tool_retry"
    }

    async fn around_tool(
        &self,
        call: ToolCallRequest,
        ctx: &ToolContext,
        next: Next<'_>,
    ) -> Result<ToolResult, ToolError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let error = match next.run(call.clone(), ctx).await {
                Ok(result) => return Ok(result),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt > self.config.max_retries {
                log::warn!(
                    "Tool '{}' failed after {} attempts: {}",
                    call.name,
                    attempt,
                    error
                );
                return match self.config.on_failure {
                    OnFailure::RaiseError => Err(ToolError::RetriesExhausted {
                        attempts: attempt,
                        last_error: error.to_string(),
                    }),
                    OnFailure::ReturnMessage => Ok(ToolResult::error(format!(
                        "Tool '{}' failed after {} attempts: {}",
                        call.name, attempt, error
                    ))
                    .and_metadata(json!({ "attempts": attempt, "error": error.to_string() }))),
                };
            }

            let delay = self.config.backoff(attempt - 1);
            log::warn!(
                "Tool '{}' attempt {} failed: {}. Retrying in {:?}",
                call.name,
                attempt,
                error,
                delay
            );
            tokio::select! {
                biased;
                _ = ctx.cancellation.cancelled() => return Err(ToolError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
