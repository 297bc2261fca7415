//! Token-budget guard that drops old messages before a model call.

use super::{InterceptError, Interceptor};
use crate::config::ContextEditingConfig;
use crate::message::{MessageStore, Role};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};

/// When the history exceeds `trigger` tokens, drops the oldest messages
/// until at least `clear_at_least` tokens are freed.
///
/// Never dropped: system messages, the most recent `keep` messages, and
/// tool exchanges involving an excluded tool. An assistant turn that
/// requested tools is dropped together with its results so the history
/// never holds half of an exchange. If not enough is eligible, whatever is
/// eligible is dropped and fewer tokens are freed.
#[derive(Debug)]
pub struct ContextEditing {
    config: ContextEditingConfig,
}

/// Messages that are dropped or kept together.
struct Block {
    ids: Vec<u64>,
    tokens: usize,
    eligible: bool,
}

impl ContextEditing {
    pub fn new(config: ContextEditingConfig) -> Self {
        Self { config }
    }

    fn blocks(&self, messages: &MessageStore) -> Vec<Block> {
        let all = messages.messages();
        let protected_from = all.len().saturating_sub(self.config.keep);
        let excluded = |name: Option<&str>| {
            name.is_some_and(|n| self.config.exclude_tools.iter().any(|t| t == n))
        };

        let mut blocks: Vec<Block> = Vec::new();
        // Open exchange: index into `blocks` plus the call ids still expected.
        let mut open: Option<(usize, HashSet<&str>)> = None;

        for (index, message) in all.iter().enumerate() {
            let protected = index >= protected_from || message.role() == Role::System;

            if message.role() == Role::Tool {
                if let Some((block_index, pending)) = open.as_mut() {
                    if message.tool_call_id().is_some_and(|id| pending.remove(id)) {
                        let block = &mut blocks[*block_index];
                        block.ids.push(message.id());
                        block.tokens += message.tokens();
                        block.eligible &= !protected && !excluded(message.tool_name());
                        continue;
                    }
                }
            }

            let mut eligible = !protected;
            if message.has_tool_calls() {
                eligible &= !message.tool_calls().iter().any(|c| excluded(Some(&c.name)));
                let pending = message.tool_calls().iter().map(|c| c.id.as_str()).collect();
                open = Some((blocks.len(), pending));
            } else if message.role() == Role::Tool {
                eligible &= !excluded(message.tool_name());
            } else {
                open = None;
            }
            blocks.push(Block {
                ids: vec![message.id()],
                tokens: message.tokens(),
                eligible,
            });
        }
        blocks
    }
}

#[async_trait]
impl Interceptor for ContextEditing {
    fn name(&self) -> &str {
        "context_editing"
    }

    async fn before_model(&self, messages: &mut MessageStore) -> Result<(), InterceptError> {
        let before = messages.total_tokens();
        if before <= self.config.trigger {
            return Ok(());
        }

        let mut planned = 0;
        let mut drop = BTreeSet::new();
        for block in self.blocks(messages).into_iter().filter(|b| b.eligible) {
            if planned >= self.config.clear_at_least {
                break;
            }
            planned += block.tokens;
            drop.extend(block.ids);
        }
        if drop.is_empty() {
            log::warn!(
                "Context at {} tokens exceeds trigger {} but nothing is eligible for removal",
                before,
                self.config.trigger
            );
            return Ok(());
        }

        let freed = messages.remove_ids(&drop);
        log::info!(
            "Context editing dropped {} messages, freed {} tokens ({} -> {})",
            drop.len(),
            freed,
            before,
            messages.total_tokens()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, ToolCallRequest};
    use serde_json::json;

    /// A message of exactly `tokens` tokens (including overhead).
    fn user(tokens: usize) -> Message {
        Message::user("u".repeat((tokens - 4) * 32 / 10))
    }

    fn config() -> ContextEditingConfig {
        ContextEditingConfig::default()
            .with_trigger(1000)
            .with_clear_at_least(600)
            .with_keep(2)
    }

    #[tokio::test]
    async fn test_below_trigger_untouched() {
        let mut store = MessageStore::new();
        store.append(Message::system("sys"));
        store.append(user(500));
        ContextEditing::new(config()).before_model(&mut store).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_frees_at_least_target_and_keeps_recent() {
        let mut store = MessageStore::new();
        store.append(Message::system("sys"));
        for _ in 0..6 {
            store.append(user(400));
        }
        let before = store.total_tokens();
        let recent: Vec<u64> = store.messages()[5..].iter().map(Message::id).collect();

        ContextEditing::new(config()).before_model(&mut store).await.unwrap();

        let freed = before - store.total_tokens();
        assert!(freed >= 600);
        // Two 400-token messages are enough; the third is not touched.
        assert_eq!(freed, 800);
        assert_eq!(store.messages()[0].role(), Role::System);
        let tail: Vec<u64> = store.messages()[store.len() - 2..].iter().map(Message::id).collect();
        assert_eq!(tail, recent);
        assert_eq!(store.total_tokens(), store.recount());
    }

    #[tokio::test]
    async fn test_tool_exchange_dropped_together() {
        let mut store = MessageStore::new();
        store.append(Message::system("sys"));
        store.append(Message::assistant(
            "",
            vec![ToolCallRequest::new("c1", "search_web", json!({"query": "q"}))],
        ));
        store.append(Message::tool_result("c1", "search_web", "r".repeat(3200)));
        store.append(user(400));
        store.append(user(400));

        ContextEditing::new(config()).before_model(&mut store).await.unwrap();

        assert!(!store.has_result_for("c1"));
        assert!(store.messages().iter().all(|m| !m.has_tool_calls()));
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_excluded_tools_survive() {
        let mut store = MessageStore::new();
        store.append(Message::system("sys"));
        store.append(Message::assistant(
            "",
            vec![ToolCallRequest::new("t1", "write_todos", json!({"todos": []}))],
        ));
        store.append(Message::tool_result("t1", "write_todos", "t".repeat(3200)));
        for _ in 0..4 {
            store.append(user(400));
        }

        let editing = ContextEditing::new(config().with_excluded_tool("write_todos"));
        editing.before_model(&mut store).await.unwrap();

        assert!(store.has_result_for("t1"));
        assert_eq!(store.total_tokens(), store.recount());
    }

    #[tokio::test]
    async fn test_insufficient_eligible_frees_what_it_can() {
        let mut store = MessageStore::new();
        store.append(Message::system("s".repeat(3200)));
        store.append(user(100));
        store.append(user(400));
        store.append(user(400));

        ContextEditing::new(config()).before_model(&mut store).await.unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.messages()[0].role(), Role::System);
    }
}
