use serde::Serialize;
use uuid::Uuid;

use super::{ChildFlowRecord, MasterFlowRecord};
use crate::constants::FlowType;

/// One logical flow as seen by callers, assembled on demand from whichever of the
/// two records exist.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlowView {
    Linked {
        master: MasterFlowRecord,
        child: ChildFlowRecord,
    },
    MasterOnly {
        master: MasterFlowRecord,
    },
    ChildOnly {
        child: ChildFlowRecord,
    },
}

impl FlowView {
    pub fn from_parts(master: Option<MasterFlowRecord>, child: Option<ChildFlowRecord>) -> Option<Self> {
        match (master, child) {
            (Some(master), Some(child)) => Some(Self::Linked { master, child }),
            (Some(master), None) => Some(Self::MasterOnly { master }),
            (None, Some(child)) => Some(Self::ChildOnly { child }),
            (None, None) => None,
        }
    }

    /// Canonical id: the master's when present, else the child's back-reference or own id
    pub fn flow_id(&self) -> Uuid {
        match self {
            Self::Linked { master, .. } | Self::MasterOnly { master } => master.flow_id,
            Self::ChildOnly { child } => child.master_flow_id.unwrap_or(child.flow_id),
        }
    }

    pub fn flow_type(&self) -> FlowType {
        match self {
            Self::Linked { master, .. } | Self::MasterOnly { master } => master.flow_type,
            Self::ChildOnly { child } => child.flow_type,
        }
    }

    pub fn master(&self) -> Option<&MasterFlowRecord> {
        match self {
            Self::Linked { master, .. } | Self::MasterOnly { master } => Some(master),
            Self::ChildOnly { .. } => None,
        }
    }

    pub fn child(&self) -> Option<&ChildFlowRecord> {
        match self {
            Self::Linked { child, .. } | Self::ChildOnly { child } => Some(child),
            Self::MasterOnly { .. } => None,
        }
    }

    /// Operational status: the child's when present, since it moves first
    pub fn status(&self) -> &str {
        match self {
            Self::Linked { child, .. } | Self::ChildOnly { child } => &child.status,
            Self::MasterOnly { master } => &master.flow_status,
        }
    }
}
