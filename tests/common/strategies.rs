use proptest::prelude::*;

use flow_core::constants::FlowType;
use flow_core::phases::PhaseTransitionPlanner;

/// Strategy for generating flow types
pub fn flow_type_strategy() -> impl Strategy<Value = FlowType> {
    prop::sample::select(FlowType::ALL.to_vec())
}

/// Flow type together with a valid index into its phase list
pub fn flow_type_and_phase_index_strategy() -> impl Strategy<Value = (FlowType, usize)> {
    flow_type_strategy().prop_flat_map(|flow_type| {
        let len = PhaseTransitionPlanner::new().phases_for(flow_type).len();
        (Just(flow_type), 0..len)
    })
}

/// Arbitrary phase-like names, mostly unknown to the planner
pub fn raw_phase_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z_]{1,24}",
        "[ A-Za-z_]{1,24}",
        Just("attribute_mapping".to_string()),
        Just("Field_Mapping ".to_string()),
        Just("tech_debt".to_string()),
    ]
}

/// Child statuses outside the resumable set
pub fn non_resumable_status_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("initialized".to_string()),
        Just("running".to_string()),
        Just("active".to_string()),
        Just("completed".to_string()),
        Just("error".to_string()),
        Just("cancelled".to_string()),
        Just("archived".to_string()),
        Just("deleted".to_string()),
        "[a-z]{3,12}".prop_filter("resumable", |s| {
            !matches!(s.as_str(), "paused" | "failed")
        }),
    ]
}
