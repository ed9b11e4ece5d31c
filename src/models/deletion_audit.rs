use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Append-only record written once per soft-delete cascade.
/// Maps to the `flow_deletion_audits` table; rows are never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionAuditRecord {
    pub audit_id: Uuid,
    pub flow_id: Uuid,
    pub tenant_id: Uuid,
    pub engagement_id: Uuid,
    pub user_id: String,
    pub deletion_type: String,
    pub reason: Option<String>,
    /// Summary of what was flagged deleted
    pub data_deleted: Value,
    /// Summary of the surrounding impact (previous statuses, linked ids)
    pub deletion_impact: Value,
    pub created_at: DateTime<Utc>,
}

pub const SOFT_DELETE: &str = "soft";
