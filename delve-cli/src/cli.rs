//! Command-line argument parsing.

use clap::Parser;
use std::path::PathBuf;

/// Deep research agent runner
#[derive(Parser, Debug)]
#[command(name = "delve")]
#[command(about = "Run a deep research agent over a replayed model script", long_about = None)]
#[command(version)]
pub struct Args {
    /// Research question
    pub query: Option<String>,

    /// Agent to load from the catalog
    #[arg(long, default_value = "research_agent")]
    pub agent: String,

    /// JSON file with the model responses to replay
    #[arg(long, env = "DELVE_SCRIPT")]
    pub script: Option<PathBuf>,

    /// JSON file with responses for the summarization model
    /// (defaults to the main script's model)
    #[arg(long)]
    pub summary_script: Option<PathBuf>,

    /// Directory the shell tool is confined to
    #[arg(long, env = "DELVE_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Search API key (can also use JINA_API_KEY env var)
    #[arg(long, env = "JINA_API_KEY", hide_env_values = true)]
    pub jina_api_key: Option<String>,

    /// Directory for JSON-lines checkpoints; enables --resume
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,

    /// Fixed run id (letters, digits, '-' and '_')
    #[arg(long)]
    pub run_id: Option<String>,

    /// Resume the given run from its latest checkpoint
    #[arg(long, conflicts_with = "query")]
    pub resume: Option<String>,

    /// Approve every tool call without prompting
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// List available agents and exit
    #[arg(long)]
    pub list: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn validate(&self) -> Result<(), String> {
        if self.list {
            return Ok(());
        }
        if self.query.as_deref().map_or(true, |q| q.trim().is_empty()) && self.resume.is_none() {
            return Err("a research question is required (or --resume <RUN_ID>)".into());
        }
        if self.script.is_none() {
            return Err("--script is required: no model provider is built in".into());
        }
        if self.resume.is_some() && self.checkpoint_dir.is_none() {
            return Err("--resume needs --checkpoint-dir".into());
        }
        if let Some(dir) = &self.workspace {
            if !dir.is_absolute() {
                return Err(format!("--workspace must be absolute: {}", dir.display()));
            }
        }
        Ok(())
    }

    /// Shell workspace, defaulting to a directory under the system temp dir.
    pub fn workspace_dir(&self) -> PathBuf {
        self.workspace
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("delve-workspace"))
    }
}
