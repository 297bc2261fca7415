//! Progress events emitted while a run executes.
//!
//! Events are soft-typed: an `event_type` string plus a human-readable
//! message and a JSON payload. Consumers match on the `EVENT_*` constants
//! they care about and ignore the rest.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

pub const EVENT_RUN_STARTED: &str = "run_started";
pub const EVENT_MODEL_RESPONSE: &str = "model_response";
pub const EVENT_TOOL_STARTED: &str = "tool_started";
pub const EVENT_TOOL_COMPLETED: &str = "tool_completed";
pub const EVENT_APPROVAL_REQUESTED: &str = "approval_requested";
pub const EVENT_SUMMARIZED: &str = "summarized";
pub const EVENT_RUN_COMPLETED: &str = "run_completed";
pub const EVENT_LIMIT_REACHED: &str = "limit_reached";
pub const EVENT_RUN_CANCELLED: &str = "run_cancelled";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunUpdate {
    pub event_type: String,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl RunUpdate {
    pub fn new(event_type: impl Into<String>, message: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            message: message.into(),
            data,
        }
    }
}

/// Optional sink for updates. Sending never fails the run; a closed
/// receiver just means nobody is listening anymore.
#[derive(Debug, Clone, Default)]
pub(crate) struct UpdateSink {
    tx: Option<mpsc::UnboundedSender<RunUpdate>>,
}

impl UpdateSink {
    pub(crate) fn new(tx: Option<mpsc::UnboundedSender<RunUpdate>>) -> Self {
        Self { tx }
    }

    pub(crate) fn emit(&self, event_type: &str, message: impl Into<String>, data: Value) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(RunUpdate::new(event_type, message, data));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sink_delivers_and_tolerates_closed_receiver() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = UpdateSink::new(Some(tx));
        sink.emit(EVENT_RUN_STARTED, "started", json!({"run_id": "r"}));

        let update = rx.try_recv().unwrap();
        assert_eq!(update.event_type, EVENT_RUN_STARTED);
        assert_eq!(update.data["run_id"], "r");

        drop(rx);
        sink.emit(EVENT_RUN_COMPLETED, "done", Value::Null);
        UpdateSink::default().emit(EVENT_RUN_COMPLETED, "nobody listening", Value::Null);
    }
}
