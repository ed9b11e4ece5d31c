mod common;

use common::strategies::*;
use proptest::prelude::*;
use uuid::Uuid;

use flow_core::constants::{status_groups, statuses_equivalent};
use flow_core::error::FlowError;
use flow_core::phases::PhaseTransitionPlanner;
use flow_core::resolver::FlowLookupResolver;
use flow_core::state_machine::{self, FlowEvent};
use flow_core::store::InMemoryFlowStore;

proptest! {
    /// Property: the next phase of phase i is phase i+1, and the last phase has none
    #[test]
    fn next_phase_follows_declared_order((flow_type, index) in flow_type_and_phase_index_strategy()) {
        let planner = PhaseTransitionPlanner::new();
        let phases = planner.phases_for(flow_type);
        let next = planner.get_next_phase(flow_type, phases[index]);
        prop_assert_eq!(next, phases.get(index + 1).copied());
    }

    /// Property: progress is in (0, 100], strictly increasing along the phase list
    #[test]
    fn progress_increases_with_phase_index((flow_type, index) in flow_type_and_phase_index_strategy()) {
        let planner = PhaseTransitionPlanner::new();
        let phases = planner.phases_for(flow_type);
        let progress = planner.calculate_progress(flow_type, phases[index]);
        prop_assert!(progress > 0.0 && progress <= 100.0);
        if index + 1 < phases.len() {
            prop_assert!(planner.calculate_progress(flow_type, phases[index + 1]) > progress);
        } else {
            prop_assert_eq!(progress, 100.0);
        }
    }

    /// Property: normalizing a phase name twice gives the same result as once
    #[test]
    fn normalize_phase_name_is_idempotent(flow_type in flow_type_strategy(), raw in raw_phase_name_strategy()) {
        let planner = PhaseTransitionPlanner::new();
        let once = planner.normalize_phase_name(flow_type, &raw);
        let twice = planner.normalize_phase_name(flow_type, &once);
        prop_assert_eq!(once, twice);
    }

    /// Property: a normalized known phase always has an index
    #[test]
    fn known_phases_normalize_to_themselves((flow_type, index) in flow_type_and_phase_index_strategy()) {
        let planner = PhaseTransitionPlanner::new();
        let phase = planner.phases_for(flow_type)[index];
        prop_assert_eq!(planner.normalize_phase_name(flow_type, phase), phase);
        prop_assert_eq!(planner.get_phase_index(flow_type, phase), Some(index));
    }

    /// Property: resume from a status outside the resumable set is always rejected
    /// and the error carries the stored status verbatim
    #[test]
    fn resume_rejects_non_resumable_statuses(status in non_resumable_status_strategy()) {
        let flow_id = Uuid::new_v4();
        match state_machine::transition(flow_id, &status, FlowEvent::Resume) {
            Err(FlowError::InvalidStateTransition { current_status, allowed, .. }) => {
                prop_assert_eq!(current_status, status);
                let expected: Vec<String> = status_groups::RESUMABLE_STATUSES
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                prop_assert_eq!(allowed, expected);
            }
            other => prop_assert!(false, "unexpected result {:?}", other),
        }
    }

    /// Property: every status agrees with itself
    #[test]
    fn statuses_are_self_equivalent(status in "[a-z_]{1,20}") {
        prop_assert!(statuses_equivalent(&status, &status));
    }

    /// Property: identifiers unknown to the store resolve to nothing, never an error
    #[test]
    fn unknown_identifiers_resolve_to_nothing(raw in any::<u128>()) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let resolver = FlowLookupResolver::new(std::sync::Arc::new(InMemoryFlowStore::new()));
        let (master, child) = runtime.block_on(resolver.resolve_both(Uuid::from_u128(raw))).unwrap();
        prop_assert!(master.is_none());
        prop_assert!(child.is_none());
    }
}
