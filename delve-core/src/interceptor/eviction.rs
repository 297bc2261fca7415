//! Moves oversized tool results out of the context window.

use super::{Interceptor, Next};
use crate::config::EvictionConfig;
use crate::message::{estimate_tokens, truncate_utf8, ToolCallRequest};
use crate::tool::{ToolContext, ToolError, ToolResult};
use async_trait::async_trait;
use serde_json::json;

const MAX_PREVIEW_BYTES: usize = 1000;

/// Replaces results larger than the configured token limit with a short
/// reference and stores the full text in the virtual filesystem under
/// `/large_tool_results/<uuid>`.
#[derive(Debug)]
pub struct LargeResultEviction {
    config: EvictionConfig,
}

impl LargeResultEviction {
    pub fn new(config: EvictionConfig) -> Self {
        Self { config }
    }

    fn placeholder(&self, tool: &str, call_id: &str, path: &str, tokens: usize, content: &str) -> String {
        // The preview uses at most half of the token budget.
        let budget = (self.config.tool_token_limit_before_evict * 3 / 2).min(MAX_PREVIEW_BYTES);
        let preview = truncate_utf8(content, budget);
        format!(
            "Tool result too large ({tokens} tokens), the result of the {tool} call ({call_id}) was saved to {path}.\n\
             Read it with read_file using offset and limit to page through it.\n\n\
             Preview:\n{preview}"
        )
    }
}

#[async_trait]
impl Interceptor for LargeResultEviction {
    fn name(&self) -> &str {
        "large_result_eviction"
    }

    async fn around_tool(
        &self,
        call: ToolCallRequest,
        ctx: &ToolContext,
        next: Next<'_>,
    ) -> Result<ToolResult, ToolError> {
        if self.config.is_excluded(&call.name) {
            return next.run(call, ctx).await;
        }
        let tool = call.name.clone();
        let id = call.id.clone();
        let result = next.run(call, ctx).await?;

        let tokens = estimate_tokens(&result.content);
        if tokens <= self.config.tool_token_limit_before_evict {
            return Ok(result);
        }

        let path = ctx.files.store_evicted(result.content.clone());
        log::info!("Evicted {} result ({} tokens) to {}", tool, tokens, path);
        let placeholder = self.placeholder(&tool, &id, &path, tokens, &result.content);
        let mut evicted = if result.is_error {
            ToolResult::error(placeholder)
        } else {
            ToolResult::new(placeholder)
        };
        evicted.metadata = json!({
            "evicted": true,
            "path": path,
            "original_tokens": tokens,
            "tool_metadata": result.metadata,
        });
        Ok(evicted)
    }
}
