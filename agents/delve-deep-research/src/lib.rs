//! Deep Research Agent
//!
//! A lead researcher that plans with a todo list, delegates sub-topics to
//! `research-agent` sub-agents (run in parallel when requested together),
//! writes `question.txt` and `final_report.md` to the shared virtual
//! filesystem, and asks `critique-agent` for feedback before answering.
//!
//! Everything here is composition: prompts, literal configuration and the
//! sub-agent specs. The machinery lives in `delve-core`.
//!
//! # Example
//!
//! ```no_run
//! use delve_deep_research::{catalog, DeepResearch, CATALOG_NAME};
//! use delve_core::ScriptedModel;
//! use delve_web_search::WebSearch;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let research = DeepResearch::new(
//!     Arc::new(ScriptedModel::from_file("script.json")?),
//!     Arc::new(WebSearch::from_env()),
//!     "/tmp/delve-workspace",
//! );
//! let agent = catalog(research).load_agent(CATALOG_NAME)?;
//! let report = agent.run("How do tides work?").await?;
//! println!("{:?}", report.final_answer());
//! # Ok(())
//! # }
//! ```

mod agent;
mod config;
pub mod prompts;

pub use agent::{catalog, DeepResearch, AGENT_NAME, CATALOG_NAME, CRITIQUE_AGENT, RESEARCH_AGENT};
pub use config::{
    agent_config, APPROVAL_DESCRIPTION, APPROVAL_TOOL, CONTEXT_EDIT_CLEAR_AT_LEAST,
    CONTEXT_EDIT_KEEP, CONTEXT_EDIT_TRIGGER, EVICTION_TOKEN_LIMIT, RUN_TOOL_CALL_LIMIT,
    SUMMARY_MESSAGES_TO_KEEP, SUMMARY_TRIGGER_TOKENS, TOOL_MAX_RETRIES,
};
