//! Plain-text rendering of run updates.

use delve_core::update::{
    EVENT_APPROVAL_REQUESTED, EVENT_LIMIT_REACHED, EVENT_MODEL_RESPONSE, EVENT_RUN_CANCELLED,
    EVENT_RUN_COMPLETED, EVENT_RUN_STARTED, EVENT_SUMMARIZED, EVENT_TOOL_COMPLETED,
    EVENT_TOOL_STARTED,
};
use delve_core::{RunOutcome, RunReport, RunUpdate};

/// Maximum characters of tool arguments shown on one line.
const ARGS_PREVIEW_CHARS: usize = 120;

/// One status line for an update, or `None` for events not worth printing.
pub fn format_update(update: &RunUpdate) -> Option<String> {
    let data = &update.data;
    let tool = data["tool"].as_str().unwrap_or("?");
    match update.event_type.as_str() {
        EVENT_RUN_STARTED => Some(format!(
            "▶ {} (run {})",
            update.message,
            data["run_id"].as_str().unwrap_or("?")
        )),
        EVENT_MODEL_RESPONSE => {
            let calls = data["tool_calls"].as_u64().unwrap_or(0);
            (calls > 0).then(|| format!("· {}", update.message))
        }
        EVENT_TOOL_STARTED => Some(format!(
            "  → {}({})",
            tool,
            preview(&data["arguments"].to_string(), ARGS_PREVIEW_CHARS)
        )),
        EVENT_TOOL_COMPLETED => {
            let marker = if data["is_error"].as_bool().unwrap_or(false) {
                "✗"
            } else {
                "✓"
            };
            let attempts = data["attempts"].as_u64().unwrap_or(1);
            if attempts > 1 {
                Some(format!("  {marker} {tool} ({attempts} attempts)"))
            } else {
                Some(format!("  {marker} {tool}"))
            }
        }
        EVENT_APPROVAL_REQUESTED => Some(format!("  ? approval needed for {tool}")),
        EVENT_SUMMARIZED => Some(format!("· {}", update.message)),
        EVENT_RUN_COMPLETED | EVENT_LIMIT_REACHED | EVENT_RUN_CANCELLED => Some(format!(
            "■ {} ({} tool calls, ~{} tokens)",
            update.message,
            data["tool_calls"].as_u64().unwrap_or(0),
            data["total_tokens"].as_u64().unwrap_or(0)
        )),
        other => {
            log::debug!("Unhandled update type: {}", other);
            None
        }
    }
}

/// Text printed once the run has terminated.
pub fn format_outcome(report: &RunReport) -> String {
    match &report.outcome {
        RunOutcome::Completed { answer } => answer.clone(),
        RunOutcome::LimitReached { reason } => format!("Run stopped early: {reason}"),
        RunOutcome::Cancelled => "Run cancelled.".to_string(),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
}
