//! delve: run the deep research agent from the terminal.

use anyhow::{bail, Context, Result};
use clap::Parser;
use delve_cli::cli::Args;
use delve_cli::display::{format_outcome, format_update};
use delve_cli::{build_catalog, CatalogInputs};
use delve_core::{ChatModel, RunOptions, ScriptedModel};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // -v shows debug logs from our crates, otherwise only warnings
    let log_level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if let Err(e) = args.validate() {
        bail!("{}", e);
    }

    if args.list {
        let catalog = build_catalog(CatalogInputs {
            model: Arc::new(ScriptedModel::default()),
            summary_model: None,
            args,
        });
        for name in catalog.list_agents() {
            println!("{name}");
        }
        return Ok(());
    }

    run(args).await
}

fn load_script(path: &Path) -> Result<Arc<dyn ChatModel>> {
    let model = ScriptedModel::from_file(path)
        .with_context(|| format!("Failed to load model script {}", path.display()))?;
    Ok(Arc::new(model))
}

async fn run(args: Args) -> Result<()> {
    let Some(script) = args.script.as_deref() else {
        bail!("--script is required");
    };
    let model = load_script(script)?;
    let summary_model = args.summary_script.as_deref().map(load_script).transpose()?;

    let workspace = args.workspace_dir();
    tokio::fs::create_dir_all(&workspace)
        .await
        .with_context(|| format!("Failed to create workspace {}", workspace.display()))?;

    let agent_name = args.agent.clone();
    let query = args.query.clone();
    let resume = args.resume.clone();
    let run_id = args.run_id.clone();

    let catalog = build_catalog(CatalogInputs {
        model,
        summary_model,
        args,
    });
    let agent = catalog
        .load_agent(&agent_name)
        .with_context(|| format!("Failed to load agent '{agent_name}'"))?;
    log::info!("Agent graph:\n{}", agent.describe());
    eprintln!("{} ready", agent.name());

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, stopping the run...");
            cancel_on_signal.cancel();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            if let Some(line) = format_update(&update) {
                eprintln!("{line}");
            }
        }
    });

    let mut options = RunOptions::new()
        .with_cancellation(cancel)
        .with_updates(tx);
    if let Some(run_id) = run_id {
        options = options.with_run_id(run_id);
    }

    let result = match (resume, query) {
        (Some(run_id), _) => agent.resume(&run_id, options).await,
        (None, Some(query)) => agent.run_with(&query, options).await,
        (None, None) => bail!("a research question is required"),
    };

    // The sender lives in the run options; once the run returns the printer
    // drains and exits.
    if let Err(e) = printer.await {
        log::warn!("Update printer failed: {}", e);
    }

    let report = result.context("Run failed")?;
    println!("{}", format_outcome(&report));
    Ok(())
}
