//! Side-channel task list the model maintains through `write_todos`.

use super::{Interceptor, Next};
use crate::message::ToolCallRequest;
use crate::tool::{ToolContext, ToolError, ToolResult, ToolSchema};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const WRITE_TODOS: &str = "write_todos";
pub const READ_TODOS: &str = "read_todos";

const WRITE_TODOS_DESCRIPTION: &str = "Create or replace your todo list for the current task. \
Use it to plan multi-step work and to track progress: mark an item in_progress before you \
start it and completed as soon as it is done. Always send the complete list.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
}

impl TodoItem {
    pub fn new(content: impl Into<String>, status: TodoStatus) -> Self {
        Self {
            content: content.into(),
            status,
        }
    }
}

/// Answers `write_todos` and `read_todos`; every other call passes through.
///
/// The list lives in the run's [`ToolContext`] and is persisted with the
/// run state.
#[derive(Debug, Default)]
pub struct TodoList;

impl TodoList {
    pub fn new() -> Self {
        Self
    }

    fn write(call: &ToolCallRequest, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let todos = call
            .arguments
            .get("todos")
            .cloned()
            .ok_or_else(|| ToolError::InvalidInput("missing 'todos'".into()))?;
        let todos: Vec<TodoItem> = serde_json::from_value(todos)
            .map_err(|e| ToolError::InvalidInput(format!("malformed todo list: {e}")))?;
        let rendered = render(&todos);
        ctx.set_todos(todos);
        Ok(ToolResult::new(format!("Updated todo list:\n{rendered}")))
    }
}

fn render(todos: &[TodoItem]) -> String {
    if todos.is_empty() {
        return "(empty)".to_string();
    }
    todos
        .iter()
        .map(|t| {
            let mark = match t.status {
                TodoStatus::Pending => "[ ]",
                TodoStatus::InProgress => "[~]",
                TodoStatus::Completed => "[x]",
            };
            format!("{mark} {}", t.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Interceptor for TodoList {
    fn name(&self) -> &str {
        "todo_list"
    }

    fn tools(&self) -> Vec<ToolSchema> {
        vec![
            ToolSchema::new(
                WRITE_TODOS,
                WRITE_TODOS_DESCRIPTION,
                json!({
                    "type": "object",
                    "properties": {
                        "todos": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "content": { "type": "string" },
                                    "status": {
                                        "type": "string",
                                        "enum": ["pending", "in_progress", "completed"]
                                    }
                                },
                                "required": ["content", "status"]
                            }
                        }
                    },
                    "required": ["todos"]
                }),
            ),
            ToolSchema::new(
                READ_TODOS,
                "Read your current todo list.",
                json!({ "type": "object", "properties": {} }),
            ),
        ]
    }

    async fn around_tool(
        &self,
        call: ToolCallRequest,
        ctx: &ToolContext,
        next: Next<'_>,
    ) -> Result<ToolResult, ToolError> {
        match call.name.as_str() {
            WRITE_TODOS => Self::write(&call, ctx),
            READ_TODOS => Ok(ToolResult::new(render(&ctx.todos()))),
            _ => next.run(call, ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::InterceptorChain;
    use crate::tool::ToolRegistry;
    use crate::vfs::VirtualFs;
    use std::sync::Arc;

    fn ctx() -> ToolContext {
        ToolContext::new("run", Arc::new(ToolRegistry::new()), Arc::new(VirtualFs::new()))
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let chain = InterceptorChain::new().with(TodoList::new());
        let ctx = ctx();
        let write = ToolCallRequest::new(
            "c1",
            WRITE_TODOS,
            json!({"todos": [
                {"content": "Save question", "status": "completed"},
                {"content": "Research", "status": "in_progress"}
            ]}),
        );
        chain.execute(write, &ctx).await.result.unwrap();
        assert_eq!(ctx.todos().len(), 2);
        assert_eq!(ctx.todos()[1].status, TodoStatus::InProgress);

        let read = ToolCallRequest::new("c2", READ_TODOS, json!({}));
        let result = chain.execute(read, &ctx).await.result.unwrap();
        assert_eq!(result.content, "[x] Save question\n[~] Research");
    }

    #[tokio::test]
    async fn test_malformed_list_is_invalid_input() {
        let chain = InterceptorChain::new().with(TodoList::new());
        let call = ToolCallRequest::new("c1", WRITE_TODOS, json!({"todos": [{"content": 1}]}));
        let err = chain.execute(call, &ctx()).await.result.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_other_tools_pass_through() {
        let chain = InterceptorChain::new().with(TodoList::new());
        let call = ToolCallRequest::new("c1", "search_web", json!({}));
        let err = chain.execute(call, &ctx()).await.result.unwrap_err();
        assert_eq!(err, ToolError::NotFound("search_web".into()));
    }

    #[test]
    fn test_exposes_two_tools() {
        let names: Vec<String> = TodoList::new().tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec![WRITE_TODOS, READ_TODOS]);
    }
}
