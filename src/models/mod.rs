//! Flow record models.
//!
//! Master and child records are stored as two independently indexed aggregates;
//! [`FlowView`] is the on-demand union handed to callers.

pub mod asset;
pub mod child_flow;
pub mod deletion_audit;
pub mod failure_journal;
pub mod flow_view;
pub mod master_flow;

pub use asset::{AssetReadiness, FlowAsset};
pub use child_flow::{ChildFlowPatch, ChildFlowRecord, NewChildFlow};
pub use deletion_audit::DeletionAuditRecord;
pub use failure_journal::FailureJournalEntry;
pub use flow_view::FlowView;
pub use master_flow::{MasterFlowPatch, MasterFlowRecord, NewMasterFlow};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant/engagement restriction applied to lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantScope {
    pub tenant_id: Uuid,
    pub engagement_id: Option<Uuid>,
}

impl TenantScope {
    pub fn tenant(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            engagement_id: None,
        }
    }

    pub fn engagement(tenant_id: Uuid, engagement_id: Uuid) -> Self {
        Self {
            tenant_id,
            engagement_id: Some(engagement_id),
        }
    }

    pub fn admits(&self, tenant_id: Uuid, engagement_id: Uuid) -> bool {
        self.tenant_id == tenant_id && self.engagement_id.map_or(true, |e| e == engagement_id)
    }
}
