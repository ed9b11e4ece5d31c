use serde::{Deserialize, Serialize};

/// Events that can trigger flow state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowEvent {
    /// First phase dispatched
    Start,
    /// Operator pause
    Pause,
    /// Continue a paused, waiting or failed flow
    Resume,
    Complete,
    Fail,
    Cancel,
    /// Re-run the current phase after a failure
    Retry,
    Archive,
    /// Soft delete
    Delete,
}

impl FlowEvent {
    /// Operation name used in logs and transition errors
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
            Self::Retry => "retry",
            Self::Archive => "archive",
            Self::Delete => "delete",
        }
    }
}
