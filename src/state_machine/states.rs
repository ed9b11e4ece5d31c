use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::status;

/// Lifecycle position of a flow.
///
/// Child tables spell some states differently (`active`, `processing`,
/// `child_flows_deleted`); parsing folds those spellings into one variant while
/// [`Display`](fmt::Display) always writes the canonical name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    /// Created, no phase dispatched yet
    Initialized,
    /// A phase is executing
    Running,
    /// Halted by an operator
    Paused,
    /// Phase finished and waiting for a user to approve its output
    WaitingForApproval,
    Completed,
    /// Failed by the phase engine, the health monitor or an operator
    Failed,
    /// Unexpected execution error
    Error,
    Cancelled,
    Archived,
    /// Soft deleted
    Deleted,
}

impl FlowState {
    pub const ALL: [FlowState; 10] = [
        FlowState::Initialized,
        FlowState::Running,
        FlowState::Paused,
        FlowState::WaitingForApproval,
        FlowState::Completed,
        FlowState::Failed,
        FlowState::Error,
        FlowState::Cancelled,
        FlowState::Archived,
        FlowState::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => status::INITIALIZED,
            Self::Running => status::RUNNING,
            Self::Paused => status::PAUSED,
            Self::WaitingForApproval => status::WAITING_FOR_APPROVAL,
            Self::Completed => status::COMPLETED,
            Self::Failed => status::FAILED,
            Self::Error => status::ERROR,
            Self::Cancelled => status::CANCELLED,
            Self::Archived => status::ARCHIVED,
            Self::Deleted => status::DELETED,
        }
    }

    /// Check if this is a terminal state for stuck-flow detection
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Error | Self::Cancelled | Self::Archived | Self::Deleted
        )
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FlowState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialized" | "pending" => Ok(Self::Initialized),
            "running" | "active" | "processing" | "in_progress" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "waiting_for_approval" => Ok(Self::WaitingForApproval),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "error" => Ok(Self::Error),
            "cancelled" => Ok(Self::Cancelled),
            "archived" => Ok(Self::Archived),
            "deleted" | "child_flows_deleted" => Ok(Self::Deleted),
            _ => Err(format!("Invalid flow state: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::status_groups;

    #[test]
    fn test_child_spellings_fold_into_running() {
        for synonym in status_groups::RUNNING_SYNONYMS {
            assert_eq!(synonym.parse::<FlowState>().unwrap(), FlowState::Running);
        }
        assert_eq!("child_flows_deleted".parse::<FlowState>().unwrap(), FlowState::Deleted);
        assert!("exploded".parse::<FlowState>().is_err());
    }

    #[test]
    fn test_terminal_states_match_monitor_exclusions() {
        for state in FlowState::ALL {
            assert_eq!(
                state.is_terminal(),
                status_groups::CHILD_TERMINAL_STATUSES.contains(&state.as_str()),
                "{state}"
            );
        }
    }
}
