//! # Flow Constants
//!
//! Flow types, the status vocabularies written by the master and child records, and
//! the status groups the lifecycle service and health monitor filter on.
//!
//! Master and child records do not share one status vocabulary: child tables carry
//! execution-flavoured names (`active`, `processing`) and the master carries the
//! orchestration names. [`status_equivalence`] is the table used to decide whether a
//! master/child pair agree.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Workflow kinds, each with its own child table and phase ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    Discovery,
    Assessment,
    Collection,
    Planning,
    Decommission,
}

impl FlowType {
    pub const ALL: [FlowType; 5] = [
        FlowType::Discovery,
        FlowType::Assessment,
        FlowType::Collection,
        FlowType::Planning,
        FlowType::Decommission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Assessment => "assessment",
            Self::Collection => "collection",
            Self::Planning => "planning",
            Self::Decommission => "decommission",
        }
    }

    /// Table holding the child records of this flow type
    pub fn child_table(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery_flows",
            Self::Assessment => "assessment_flows",
            Self::Collection => "collection_flows",
            Self::Planning => "planning_flows",
            Self::Decommission => "decommission_flows",
        }
    }
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FlowType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovery" => Ok(Self::Discovery),
            "assessment" => Ok(Self::Assessment),
            "collection" => Ok(Self::Collection),
            "planning" => Ok(Self::Planning),
            "decommission" => Ok(Self::Decommission),
            _ => Err(format!("Invalid flow type: {s}")),
        }
    }
}

/// Status strings written by this crate
pub mod status {
    pub const INITIALIZED: &str = "initialized";
    pub const RUNNING: &str = "running";
    pub const PAUSED: &str = "paused";
    pub const WAITING_FOR_APPROVAL: &str = "waiting_for_approval";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
    pub const ERROR: &str = "error";
    pub const CANCELLED: &str = "cancelled";
    pub const ARCHIVED: &str = "archived";
    pub const DELETED: &str = "deleted";
    pub const CHILD_FLOWS_DELETED: &str = "child_flows_deleted";
}

pub mod status_groups {
    /// Master statuses excluded from the active-flow listing
    pub const MASTER_TERMINAL_STATUSES: &[&str] = &[
        "completed",
        "failed",
        "error",
        "deleted",
        "cancelled",
        "child_flows_deleted",
    ];

    /// Child statuses the health monitor never touches
    pub const CHILD_TERMINAL_STATUSES: &[&str] = &[
        "completed",
        "failed",
        "error",
        "cancelled",
        "deleted",
        "archived",
    ];

    /// Child statuses from which `resume` is accepted
    pub const RESUMABLE_STATUSES: &[&str] = &["paused", "waiting_for_approval", "failed"];

    /// Child statuses from which `retry` is accepted
    pub const RETRYABLE_STATUSES: &[&str] = &["failed", "error"];

    /// Child-table spellings of the running state
    pub const RUNNING_SYNONYMS: &[&str] = &["running", "active", "processing", "in_progress"];
}

/// Child statuses a master status is considered in agreement with.
///
/// Identical strings always agree; this table only lists the cross-vocabulary pairs.
/// Returns `None` for master statuses outside the known vocabulary.
pub fn status_equivalence(master_status: &str) -> Option<&'static [&'static str]> {
    let accepted: &'static [&'static str] = match master_status {
        "initialized" | "pending" => &["initialized", "pending", "running", "active"],
        "running" | "active" | "processing" | "in_progress" => &[
            "running",
            "active",
            "processing",
            "in_progress",
            "initialized",
            "waiting_for_approval",
        ],
        "paused" | "waiting_for_approval" => &["paused", "waiting_for_approval"],
        "completed" => &["completed"],
        "failed" | "error" => &["failed", "error"],
        "cancelled" => &["cancelled"],
        "deleted" | "child_flows_deleted" => &["deleted", "archived"],
        "archived" => &["archived", "deleted"],
        _ => return None,
    };
    Some(accepted)
}

/// Whether a master status and a child status describe the same lifecycle position
pub fn statuses_equivalent(master_status: &str, child_status: &str) -> bool {
    master_status == child_status
        || status_equivalence(master_status).is_some_and(|accepted| accepted.contains(&child_status))
}

/// Source tags written into failure journal entries
pub mod journal_sources {
    pub const HEALTH_MONITOR: &str = "health_monitor";
    pub const MANUAL_RECOVERY: &str = "manual_recovery";
}
