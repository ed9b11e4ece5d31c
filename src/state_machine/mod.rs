// Flow state machine
//
// Typed view of the status strings stored on master and child records, and the
// transition table the lifecycle service and health monitor validate against.

pub mod events;
pub mod flow_state_machine;
pub mod states;

pub use events::FlowEvent;
pub use flow_state_machine::{allowed_sources, determine_target_state, transition};
pub use states::FlowState;
