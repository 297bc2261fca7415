//! Library half of the `delve` binary: argument parsing, terminal approvals
//! and update rendering.

pub mod cli;
pub mod confirmation;
pub mod display;

use delve_core::{AgentCatalog, ApprovalHandler, AutoApprove, ChatModel, FileCheckpointStore};
use delve_deep_research::DeepResearch;
use delve_web_search::WebSearch;
use std::sync::Arc;

/// Everything needed to assemble the catalog from parsed arguments.
#[derive(Debug)]
pub struct CatalogInputs {
    pub model: Arc<dyn ChatModel>,
    pub summary_model: Option<Arc<dyn ChatModel>>,
    pub args: cli::Args,
}

/// Catalog of agents the CLI can run.
pub fn build_catalog(inputs: CatalogInputs) -> AgentCatalog {
    let CatalogInputs {
        model,
        summary_model,
        args,
    } = inputs;

    let search = Arc::new(WebSearch::new(args.jina_api_key.clone()));
    if !search.has_api_key() {
        log::warn!("JINA_API_KEY not set; search_web calls will fail");
    }

    let approvals: Arc<dyn ApprovalHandler> = if args.yes {
        Arc::new(AutoApprove)
    } else {
        Arc::new(confirmation::InteractiveApproval::new().with_verbose(args.verbose))
    };

    let mut research = DeepResearch::new(model, search, args.workspace_dir()).with_approvals(approvals);
    if let Some(summary_model) = summary_model {
        research = research.with_summary_model(summary_model);
    }
    if let Some(dir) = &args.checkpoint_dir {
        research = research.with_checkpoints(Arc::new(FileCheckpointStore::new(dir)));
    }
    delve_deep_research::catalog(research)
}
