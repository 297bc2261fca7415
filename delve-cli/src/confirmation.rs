//! Interactive approval handler for the terminal.
//!
//! Provides [`InteractiveApproval`], which asks the operator before a gated
//! tool call runs. Enter means deny.

use async_trait::async_trait;
use delve_core::{ApprovalDecision, ApprovalHandler, ApprovalRequest};
use dialoguer::Confirm;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Terminal approval handler using dialoguer.
///
/// Sub-agents running side by side can ask at the same moment; prompts are
/// shown one at a time and each names the run and call it answers for.
///
/// # Example
///
/// ```no_run
/// use delve_cli::confirmation::InteractiveApproval;
/// use delve_core::{AgentBuilder, ScriptedModel};
/// use std::sync::Arc;
///
/// let agent = AgentBuilder::new("researcher", Arc::new(ScriptedModel::default()))
///     .with_approvals(Arc::new(InteractiveApproval::verbose()))
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct InteractiveApproval {
    /// Whether to show tool arguments in the prompt.
    pub verbose: bool,
    // Shared by clones so every handle uses the same terminal turn.
    prompt_lock: Arc<Mutex<()>>,
}

impl InteractiveApproval {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verbose() -> Self {
        Self::new().with_verbose(true)
    }

    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn prompt(&self, request: &ApprovalRequest) -> String {
        let header = format!(
            "[{}] {} (call {}, run {})",
            request.tool_name, request.message, request.call_id, request.run_id
        );
        if self.verbose {
            format!(
                "{}\nArgs: {}",
                header,
                serde_json::to_string_pretty(&request.arguments)
                    .unwrap_or_else(|_| request.arguments.to_string())
            )
        } else {
            header
        }
    }

    /// Show the prompt through `ask` once no other prompt is on screen.
    async fn ask_in_turn<F, E>(&self, request: &ApprovalRequest, ask: F) -> ApprovalDecision
    where
        F: FnOnce(String) -> Result<bool, E> + Send + 'static,
        E: Display + Send + 'static,
    {
        let prompt = self.prompt(request);
        let _turn = self.prompt_lock.lock().await;

        // The prompt blocks on stdin.
        let answer = tokio::task::spawn_blocking(move || ask(prompt)).await;

        match answer {
            Ok(Ok(true)) => ApprovalDecision::Approve,
            Ok(Ok(false)) => ApprovalDecision::deny("Denied by operator"),
            Ok(Err(e)) => {
                log::warn!(
                    "Approval prompt failed for call '{}' ({}): {}. Denying by default.",
                    request.call_id,
                    request.tool_name,
                    e
                );
                ApprovalDecision::deny(format!("Approval prompt failed: {}", e))
            }
            Err(e) => {
                log::warn!("Approval prompt task failed: {}", e);
                ApprovalDecision::deny("Approval prompt failed")
            }
        }
    }
}

#[async_trait]
impl ApprovalHandler for InteractiveApproval {
    async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision {
        self.ask_in_turn(request, |prompt| {
            Confirm::new().with_prompt(prompt).default(false).interact()
        })
        .await
    }
}
