use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::FlowType;

/// Structured diagnostic entry for a flow that was failed automatically or by an
/// operator. Maps to the `flow_failure_journal` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureJournalEntry {
    pub entry_id: Uuid,
    pub flow_id: Uuid,
    pub flow_type: FlowType,
    pub tenant_id: Uuid,
    pub source: String,
    pub phase: Option<String>,
    pub message: String,
    pub diagnostics: Value,
    pub recorded_at: DateTime<Utc>,
}
