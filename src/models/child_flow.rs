use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::{status, FlowType};

/// Flow-type-specific operational record. Each flow type keeps these in its own
/// table (see [`FlowType::child_table`]); the columns below are common to all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildFlowRecord {
    pub flow_id: Uuid,
    pub master_flow_id: Option<Uuid>,
    pub flow_type: FlowType,
    pub tenant_id: Uuid,
    pub engagement_id: Uuid,
    pub status: String,
    pub current_phase: Option<String>,
    pub next_phase: Option<String>,
    pub progress_percentage: f64,
    /// Per-phase state keyed by phase name
    pub phase_state: Value,
    /// Human-readable failure reason shown to users
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChildFlowRecord {
    /// Whether this record points at `id` either as its own id or its master's
    pub fn references(&self, id: Uuid) -> bool {
        self.flow_id == id || self.master_flow_id == Some(id)
    }

    pub fn phase_entry(&self, phase: &str) -> Option<&Value> {
        self.phase_state.get(phase)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChildFlow {
    pub flow_id: Option<Uuid>,
    pub master_flow_id: Option<Uuid>,
    pub flow_type: FlowType,
    pub tenant_id: Uuid,
    pub engagement_id: Uuid,
    pub current_phase: Option<String>,
    pub next_phase: Option<String>,
}

impl NewChildFlow {
    pub fn new(flow_type: FlowType, tenant_id: Uuid, engagement_id: Uuid) -> Self {
        Self {
            flow_id: None,
            master_flow_id: None,
            flow_type,
            tenant_id,
            engagement_id,
            current_phase: None,
            next_phase: None,
        }
    }

    pub fn into_record(self, now: DateTime<Utc>) -> ChildFlowRecord {
        ChildFlowRecord {
            flow_id: self.flow_id.unwrap_or_else(Uuid::new_v4),
            master_flow_id: self.master_flow_id,
            flow_type: self.flow_type,
            tenant_id: self.tenant_id,
            engagement_id: self.engagement_id,
            status: status::INITIALIZED.to_string(),
            current_phase: self.current_phase,
            next_phase: self.next_phase,
            progress_percentage: 0.0,
            phase_state: Value::Object(Default::default()),
            error_message: None,
            error_details: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a child record; `None` leaves the column untouched and
/// `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildFlowPatch {
    pub status: Option<String>,
    pub master_flow_id: Option<Option<Uuid>>,
    pub current_phase: Option<Option<String>>,
    pub next_phase: Option<Option<String>>,
    pub progress_percentage: Option<f64>,
    pub phase_state: Option<Value>,
    pub error_message: Option<Option<String>>,
    pub error_details: Option<Option<Value>>,
}

impl ChildFlowPatch {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, record: &mut ChildFlowRecord, now: DateTime<Utc>) {
        if let Some(status) = &self.status {
            record.status = status.clone();
        }
        if let Some(master_flow_id) = self.master_flow_id {
            record.master_flow_id = master_flow_id;
        }
        if let Some(current_phase) = &self.current_phase {
            record.current_phase = current_phase.clone();
        }
        if let Some(next_phase) = &self.next_phase {
            record.next_phase = next_phase.clone();
        }
        if let Some(progress) = self.progress_percentage {
            record.progress_percentage = progress;
        }
        if let Some(phase_state) = &self.phase_state {
            record.phase_state = phase_state.clone();
        }
        if let Some(error_message) = &self.error_message {
            record.error_message = error_message.clone();
        }
        if let Some(error_details) = &self.error_details {
            record.error_details = error_details.clone();
        }
        record.updated_at = now;
    }
}
