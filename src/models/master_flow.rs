use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::{status, FlowType};

/// Orchestration-level record, one per workflow instance regardless of flow type.
/// Maps to the `master_flows` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterFlowRecord {
    pub flow_id: Uuid,
    pub flow_type: FlowType,
    pub flow_status: String,
    pub flow_name: String,
    pub tenant_id: Uuid,
    pub engagement_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub configuration: Value,
    pub current_phase: Option<String>,
    pub parent_flow_id: Option<Uuid>,
    /// Hand-off references and other orchestration notes
    pub flow_metadata: Value,
}

/// New master flow for registration (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMasterFlow {
    /// Explicit id, usually the id of a child created beforehand
    pub flow_id: Option<Uuid>,
    pub flow_type: FlowType,
    pub flow_name: String,
    pub tenant_id: Uuid,
    pub engagement_id: Uuid,
    pub configuration: Value,
    pub current_phase: Option<String>,
    pub parent_flow_id: Option<Uuid>,
}

impl NewMasterFlow {
    pub fn new(flow_type: FlowType, flow_name: impl Into<String>, tenant_id: Uuid, engagement_id: Uuid) -> Self {
        Self {
            flow_id: None,
            flow_type,
            flow_name: flow_name.into(),
            tenant_id,
            engagement_id,
            configuration: Value::Object(Default::default()),
            current_phase: None,
            parent_flow_id: None,
        }
    }

    pub fn with_flow_id(mut self, flow_id: Uuid) -> Self {
        self.flow_id = Some(flow_id);
        self
    }

    pub fn into_record(self, now: DateTime<Utc>) -> MasterFlowRecord {
        MasterFlowRecord {
            flow_id: self.flow_id.unwrap_or_else(Uuid::new_v4),
            flow_type: self.flow_type,
            flow_status: status::INITIALIZED.to_string(),
            flow_name: self.flow_name,
            tenant_id: self.tenant_id,
            engagement_id: self.engagement_id,
            created_at: now,
            updated_at: now,
            configuration: self.configuration,
            current_phase: self.current_phase,
            parent_flow_id: self.parent_flow_id,
            flow_metadata: Value::Object(Default::default()),
        }
    }
}

/// Partial update of a master record; `None` leaves the column untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MasterFlowPatch {
    pub flow_status: Option<String>,
    pub current_phase: Option<Option<String>>,
    pub flow_metadata: Option<Value>,
}

impl MasterFlowPatch {
    pub fn status(flow_status: impl Into<String>) -> Self {
        Self {
            flow_status: Some(flow_status.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.flow_status.is_none() && self.current_phase.is_none() && self.flow_metadata.is_none()
    }

    pub fn apply_to(&self, record: &mut MasterFlowRecord, now: DateTime<Utc>) {
        if let Some(flow_status) = &self.flow_status {
            record.flow_status = flow_status.clone();
        }
        if let Some(current_phase) = &self.current_phase {
            record.current_phase = current_phase.clone();
        }
        if let Some(flow_metadata) = &self.flow_metadata {
            record.flow_metadata = flow_metadata.clone();
        }
        record.updated_at = now;
    }
}
