//! Tool registry for managing available tools.

use super::{Tool, ToolSchema, ToolSet};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registry of available tools, keyed by name.
///
/// Tools are stored as `Arc<dyn Tool>` so a registry can be shared by
/// concurrent runs and cheaply narrowed for sub-agents with
/// [`subset`](Self::subset). Iteration order is alphabetical.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> &mut Self {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tools matching a [`ToolSet`].
    pub fn filter(&self, tool_set: &ToolSet) -> Vec<Arc<dyn Tool>> {
        self.tools
            .iter()
            .filter(|(name, _)| tool_set.matches(name))
            .map(|(_, tool)| Arc::clone(tool))
            .collect()
    }

    /// A new registry holding only the tools matching `tool_set`.
    pub fn subset(&self, tool_set: &ToolSet) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for tool in self.filter(tool_set) {
            registry.register_arc(tool);
        }
        registry
    }

    /// Whether `name` refers to a tool that starts a sub-agent run.
    pub fn is_subagent(&self, name: &str) -> bool {
        self.tools.get(name).is_some_and(|t| t.is_subagent())
    }

    /// Schemas of every registered tool, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema()).collect()
    }
}
