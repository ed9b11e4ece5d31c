//! # Phase Transition Planner
//!
//! Fixed, ordered phase lists per flow type plus the alias table that keeps retired
//! phase names navigable. Records persisted before a phase was renamed still carry
//! the old name, so every lookup normalises first.
//!
//! Progress is computed as `round(((index(next) + 1) / len) * 100)`.

use tracing::warn;

use crate::constants::FlowType;

const DISCOVERY_PHASES: &[&str] = &[
    "data_import",
    "field_mapping",
    "data_cleansing",
    "asset_inventory",
    "dependency_analysis",
    "tech_debt_assessment",
];

const ASSESSMENT_PHASES: &[&str] = &[
    "initialization",
    "readiness_assessment",
    "complexity_analysis",
    "dependency_analysis",
    "tech_debt_assessment",
    "risk_assessment",
    "recommendation_generation",
    "finalization",
];

const COLLECTION_PHASES: &[&str] = &[
    "platform_detection",
    "automated_collection",
    "gap_analysis",
    "questionnaire_generation",
    "manual_collection",
    "data_validation",
    "finalization",
];

const PLANNING_PHASES: &[&str] = &[
    "initialization",
    "wave_planning",
    "resource_allocation",
    "timeline_generation",
    "finalization",
];

const DECOMMISSION_PHASES: &[&str] = &["decommission_planning", "data_migration", "system_shutdown"];

/// Retired name -> canonical name, per flow type
const PHASE_ALIASES: &[(FlowType, &str, &str)] = &[
    (FlowType::Discovery, "attribute_mapping", "field_mapping"),
    (FlowType::Discovery, "data_validation", "data_cleansing"),
    (FlowType::Discovery, "data_cleaning", "data_cleansing"),
    (FlowType::Discovery, "inventory", "asset_inventory"),
    (FlowType::Discovery, "dependencies", "dependency_analysis"),
    (FlowType::Discovery, "tech_debt", "tech_debt_assessment"),
    (FlowType::Assessment, "architecture_minimums", "readiness_assessment"),
    (FlowType::Assessment, "tech_debt_analysis", "tech_debt_assessment"),
    (FlowType::Assessment, "component_sixr_strategies", "recommendation_generation"),
    (FlowType::Assessment, "app_on_page_generation", "recommendation_generation"),
    (FlowType::Collection, "gap_resolution", "gap_analysis"),
    (FlowType::Collection, "synthesis", "finalization"),
    (FlowType::Decommission, "planning", "decommission_planning"),
    (FlowType::Decommission, "shutdown", "system_shutdown"),
    (FlowType::Decommission, "data_retention", "data_migration"),
];

/// Stateless planner over the static phase tables
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTransitionPlanner;

impl PhaseTransitionPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Ordered phases of a flow type
    pub fn phases_for(&self, flow_type: FlowType) -> &'static [&'static str] {
        match flow_type {
            FlowType::Discovery => DISCOVERY_PHASES,
            FlowType::Assessment => ASSESSMENT_PHASES,
            FlowType::Collection => COLLECTION_PHASES,
            FlowType::Planning => PLANNING_PHASES,
            FlowType::Decommission => DECOMMISSION_PHASES,
        }
    }

    /// Map a possibly retired phase name to its canonical form.
    ///
    /// Canonical names and names nobody knows pass through unchanged, so applying this
    /// twice gives the same result as applying it once.
    pub fn normalize_phase_name(&self, flow_type: FlowType, raw: &str) -> String {
        let key = raw.trim().to_lowercase();
        let phases = self.phases_for(flow_type);

        if let Some(canonical) = phases.iter().find(|phase| **phase == key) {
            return (*canonical).to_string();
        }
        if let Some((_, _, canonical)) = PHASE_ALIASES
            .iter()
            .find(|(alias_type, alias, _)| *alias_type == flow_type && *alias == key)
        {
            return (*canonical).to_string();
        }

        warn!(
            flow_type = %flow_type,
            phase = raw,
            "⚠️ PHASE_PLANNER: Unknown phase name, passing through unchanged"
        );
        raw.to_string()
    }

    /// Position of `phase` in the flow type's ordering, `None` when unknown
    pub fn get_phase_index(&self, flow_type: FlowType, phase: &str) -> Option<usize> {
        let canonical = self.normalize_phase_name(flow_type, phase);
        self.phases_for(flow_type).iter().position(|p| *p == canonical)
    }

    /// Successor of `current`, or `None` at the last phase or for an unknown phase
    pub fn get_next_phase(&self, flow_type: FlowType, current: &str) -> Option<&'static str> {
        let index = self.get_phase_index(flow_type, current)?;
        self.phases_for(flow_type).get(index + 1).copied()
    }

    /// Progress percentage once `phase` is the active phase; 0 for unknown phases
    pub fn calculate_progress(&self, flow_type: FlowType, phase: &str) -> f64 {
        let phases = self.phases_for(flow_type);
        match self.get_phase_index(flow_type, phase) {
            Some(index) => (((index + 1) as f64 / phases.len() as f64) * 100.0).round(),
            None => 0.0,
        }
    }

    pub fn first_phase(&self, flow_type: FlowType) -> &'static str {
        self.phases_for(flow_type)[0]
    }
}
