//! Execution progress events
//!
//! The engine reports tool lifecycle transitions over a bounded channel so a
//! CLI or UI can follow the run without touching engine internals. Dropping
//! the receiver never stalls a run; sends degrade to best-effort.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Channel depth for progress events.
pub const EVENT_BUFFER: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolEventKind {
    Start,
    Finish,
    Error,
}

/// One lifecycle transition of a tool inside a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEvent {
    pub kind: ToolEventKind,
    pub stage: String,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolEvent {
    pub fn start(stage: &str, tool: &str) -> Self {
        Self::new(ToolEventKind::Start, stage, tool, None)
    }

    pub fn finish(stage: &str, tool: &str) -> Self {
        Self::new(ToolEventKind::Finish, stage, tool, None)
    }

    pub fn error(stage: &str, tool: &str, error: impl Into<String>) -> Self {
        Self::new(ToolEventKind::Error, stage, tool, Some(error.into()))
    }

    fn new(kind: ToolEventKind, stage: &str, tool: &str, error: Option<String>) -> Self {
        Self {
            kind,
            stage: stage.to_string(),
            tool: tool.to_string(),
            error,
        }
    }
}

/// Create the bounded event channel used by [`crate::engine::Engine::run`].
pub fn channel() -> (mpsc::Sender<ToolEvent>, mpsc::Receiver<ToolEvent>) {
    mpsc::channel(EVENT_BUFFER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_kind_and_error() {
        let start = ToolEvent::start("layer-1-step-0", "subfinder-1");
        assert_eq!(start.kind, ToolEventKind::Start);
        assert!(start.error.is_none());

        let err = ToolEvent::error("layer-1-step-0", "subfinder-1", "not found");
        assert_eq!(err.kind, ToolEventKind::Error);
        assert_eq!(err.error.as_deref(), Some("not found"));
    }

    #[test]
    fn events_serialize_with_lowercase_kind() {
        let event = ToolEvent::finish("layer-2-step-0", "httpx-1");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "finish");
        assert_eq!(json["stage"], "layer-2-step-0");
        assert!(json.get("error").is_none());
    }
}
