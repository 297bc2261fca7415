//! Wiring of the lead researcher, its tools and its sub-agents.

use crate::config::agent_config;
use crate::prompts::{
    system_prompt, CRITIQUE_AGENT_DESCRIPTION, RESEARCH_AGENT_DESCRIPTION, SUB_CRITIQUE_PROMPT,
    SUB_RESEARCH_PROMPT,
};
use delve_core::interceptor::{
    ContextEditing, Filesystem, InterceptorChain, LargeResultEviction, PatchToolCalls, TodoList,
};
use delve_core::{
    Agent, AgentBuilder, AgentCatalog, AgentConfig, ApprovalHandler, ChatModel, CheckpointStore,
    ConfigError, SubAgentDispatcher, SubAgentSpec, Tool, ToolSet,
};
use delve_shell::Shell;
use std::path::PathBuf;
use std::sync::Arc;

/// Name of the lead agent.
pub const AGENT_NAME: &str = "DeepResearchAgent";

/// Name under which [`catalog`] registers the agent.
pub const CATALOG_NAME: &str = "research_agent";

pub const RESEARCH_AGENT: &str = "research-agent";
pub const CRITIQUE_AGENT: &str = "critique-agent";

/// Builder for the deep research agent.
///
/// The lead agent gets the search tool and a workspace-confined shell, the
/// standard interceptor chain and hook set from [`agent_config`], and three
/// sub-agents: `research-agent` (search only), `critique-agent` and
/// `general-purpose`.
///
/// # Example
///
/// ```no_run
/// use delve_deep_research::DeepResearch;
/// use delve_core::ScriptedModel;
/// use delve_web_search::WebSearch;
/// use std::sync::Arc;
///
/// let research = DeepResearch::new(
///     Arc::new(ScriptedModel::default()),
///     Arc::new(WebSearch::from_env()),
///     "/tmp/delve-workspace",
/// );
/// let agent = research.build().unwrap();
/// println!("{}", agent.describe());
/// ```
#[derive(Debug, Clone)]
pub struct DeepResearch {
    model: Arc<dyn ChatModel>,
    summary_model: Option<Arc<dyn ChatModel>>,
    search: Arc<dyn Tool>,
    workspace: PathBuf,
    config: AgentConfig,
    approvals: Option<Arc<dyn ApprovalHandler>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl DeepResearch {
    pub fn new(
        model: Arc<dyn ChatModel>,
        search: Arc<dyn Tool>,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        let workspace = workspace.into();
        Self {
            model,
            summary_model: None,
            search,
            config: agent_config(&workspace),
            workspace,
            approvals: None,
            checkpoints: None,
        }
    }

    /// Model used for summaries. Defaults to the main model.
    #[must_use]
    pub fn with_summary_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.summary_model = Some(model);
        self
    }

    /// Replace the literal configuration, e.g. to lower limits in tests.
    #[must_use]
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_approvals(mut self, approvals: Arc<dyn ApprovalHandler>) -> Self {
        self.approvals = Some(approvals);
        self
    }

    #[must_use]
    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Interceptors for sub-agents: the lead chain without the retry layer.
    fn subagent_interceptors(&self) -> InterceptorChain {
        let mut chain = InterceptorChain::new()
            .with(TodoList::new())
            .with(Filesystem::new(self.config.filesystem.clone()));
        if let Some(context_editing) = &self.config.context_editing {
            chain = chain.with(ContextEditing::new(context_editing.clone()));
        }
        chain
            .with(PatchToolCalls::new())
            .with(LargeResultEviction::new(self.config.eviction.clone()))
    }

    fn subagents(&self) -> SubAgentDispatcher {
        let research = SubAgentSpec::new(
            RESEARCH_AGENT,
            RESEARCH_AGENT_DESCRIPTION,
            SUB_RESEARCH_PROMPT,
        )
        .with_tools(ToolSet::Specific(vec![self.search.name().to_string()]));
        let critique = SubAgentSpec::new(
            CRITIQUE_AGENT,
            CRITIQUE_AGENT_DESCRIPTION,
            SUB_CRITIQUE_PROMPT,
        );

        SubAgentDispatcher::new()
            .with_default_model(Arc::clone(&self.model))
            .with_default_interceptors(self.subagent_interceptors())
            .with_spec(research)
            .with_general_purpose(true)
            .with_spec(critique)
    }

    pub fn build(&self) -> Result<Agent, ConfigError> {
        self.config.validate()?;
        let summary_model = self
            .summary_model
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.model));

        let mut builder = AgentBuilder::new(AGENT_NAME, Arc::clone(&self.model))
            .with_system_prompt(system_prompt())
            .with_tool_arc(Arc::clone(&self.search))
            .with_tool(Shell::new(&self.workspace))
            .with_config(&self.config, summary_model)
            .with_subagents(self.subagents());
        if let Some(approvals) = &self.approvals {
            builder = builder.with_approvals(Arc::clone(approvals));
        }
        if let Some(store) = &self.checkpoints {
            builder = builder.with_checkpoints(Arc::clone(store));
        }

        let agent = builder.build()?;
        log::debug!(
            "Built {} with tools: {}",
            AGENT_NAME,
            agent.tools().list().join(", ")
        );
        Ok(agent)
    }
}

/// Catalog holding the deep research agent as `research_agent`.
pub fn catalog(research: DeepResearch) -> AgentCatalog {
    let mut catalog = AgentCatalog::new();
    catalog.register(CATALOG_NAME, move || research.build());
    catalog
}
