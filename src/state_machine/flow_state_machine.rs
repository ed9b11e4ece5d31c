use uuid::Uuid;

use super::{events::FlowEvent, states::FlowState};
use crate::error::{FlowError, FlowResult};

/// Resolve the state an event leads to, or `None` when the event is not accepted
/// from `current_state`.
///
/// FAILED only leaves through an explicit retry or resume; nothing moves a flow out
/// of it automatically.
pub fn determine_target_state(current_state: FlowState, event: FlowEvent) -> Option<FlowState> {
    let target = match (current_state, event) {
        // Start transitions
        (FlowState::Initialized, FlowEvent::Start) => FlowState::Running,

        // Suspension
        (FlowState::Initialized | FlowState::Running | FlowState::WaitingForApproval, FlowEvent::Pause) => {
            FlowState::Paused
        }

        // Re-entry
        (FlowState::Paused | FlowState::WaitingForApproval | FlowState::Failed, FlowEvent::Resume) => {
            FlowState::Running
        }
        (FlowState::Failed | FlowState::Error, FlowEvent::Retry) => FlowState::Running,

        // Completion and failure
        (FlowState::Running, FlowEvent::Complete) => FlowState::Completed,
        (
            FlowState::Initialized | FlowState::Running | FlowState::Paused | FlowState::WaitingForApproval,
            FlowEvent::Fail,
        ) => FlowState::Failed,

        // Cancel transitions
        (
            FlowState::Initialized | FlowState::Running | FlowState::Paused | FlowState::WaitingForApproval,
            FlowEvent::Cancel,
        ) => FlowState::Cancelled,

        // Archive and soft delete from any state that has not been purged
        (from, FlowEvent::Archive) if !matches!(from, FlowState::Archived | FlowState::Deleted) => {
            FlowState::Archived
        }
        (from, FlowEvent::Delete) if from != FlowState::Deleted => FlowState::Deleted,

        _ => return None,
    };

    Some(target)
}

/// States from which `event` is accepted
pub fn allowed_sources(event: FlowEvent) -> Vec<FlowState> {
    FlowState::ALL
        .into_iter()
        .filter(|state| determine_target_state(*state, event).is_some())
        .collect()
}

/// Validate `event` against a stored status string.
///
/// Unknown status strings never satisfy a transition; the error reports the stored
/// value verbatim so callers can show it to users.
pub fn transition(flow_id: Uuid, current_status: &str, event: FlowEvent) -> FlowResult<FlowState> {
    current_status
        .parse::<FlowState>()
        .ok()
        .and_then(|state| determine_target_state(state, event))
        .ok_or_else(|| {
            let allowed: Vec<&str> = allowed_sources(event).iter().map(FlowState::as_str).collect();
            FlowError::invalid_transition(flow_id, event.event_type(), current_status, &allowed)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::status_groups;

    #[test]
    fn test_discovery_happy_path() {
        let mut state = FlowState::Initialized;
        for (event, expected) in [
            (FlowEvent::Start, FlowState::Running),
            (FlowEvent::Pause, FlowState::Paused),
            (FlowEvent::Resume, FlowState::Running),
            (FlowEvent::Complete, FlowState::Completed),
            (FlowEvent::Archive, FlowState::Archived),
        ] {
            state = determine_target_state(state, event).unwrap();
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn test_resume_sources_match_resumable_group() {
        let sources: Vec<&str> = allowed_sources(FlowEvent::Resume).iter().map(FlowState::as_str).collect();
        assert_eq!(sources, status_groups::RESUMABLE_STATUSES);

        let retry: Vec<&str> = allowed_sources(FlowEvent::Retry).iter().map(FlowState::as_str).collect();
        assert_eq!(retry, status_groups::RETRYABLE_STATUSES);
    }

    #[test]
    fn test_failed_never_restarts_without_retry_or_resume() {
        for event in [FlowEvent::Start, FlowEvent::Complete, FlowEvent::Pause, FlowEvent::Fail] {
            assert!(determine_target_state(FlowState::Failed, event).is_none(), "{event:?}");
        }
    }

    #[test]
    fn test_deleted_is_final() {
        for event in [FlowEvent::Archive, FlowEvent::Delete, FlowEvent::Resume, FlowEvent::Retry] {
            assert!(determine_target_state(FlowState::Deleted, event).is_none());
        }
    }

    #[test]
    fn test_transition_reports_unknown_status() {
        let flow_id = Uuid::new_v4();
        match transition(flow_id, "mystery", FlowEvent::Resume).unwrap_err() {
            FlowError::InvalidStateTransition {
                current_status,
                operation,
                allowed,
                ..
            } => {
                assert_eq!(current_status, "mystery");
                assert_eq!(operation, "resume");
                assert_eq!(allowed, vec!["paused", "waiting_for_approval", "failed"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transition(flow_id, "active", FlowEvent::Pause).unwrap(), FlowState::Paused);
    }
}
