//! # Master Flow Registry and Child Flow Repository
//!
//! CRUD over the two record aggregates. Every write goes through
//! [`FlowStore::apply`] as a single-mutation unit so the same store code path backs
//! both simple updates and cascades.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::constants::FlowType;
use crate::error::FlowResult;
use crate::models::{
    ChildFlowPatch, ChildFlowRecord, MasterFlowPatch, MasterFlowRecord, NewChildFlow, NewMasterFlow,
    TenantScope,
};
use crate::store::{FlowMutation, FlowStore, MasterFlowQuery, UnitOfWork};

/// Orchestration-level records
#[derive(Clone)]
pub struct MasterFlowRegistry {
    store: Arc<dyn FlowStore>,
}

impl std::fmt::Debug for MasterFlowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterFlowRegistry").finish_non_exhaustive()
    }
}

impl MasterFlowRegistry {
    pub fn new(store: Arc<dyn FlowStore>) -> Self {
        Self { store }
    }

    /// Create a master record in `initialized` status
    pub async fn register(&self, new_flow: NewMasterFlow) -> FlowResult<MasterFlowRecord> {
        let record = new_flow.into_record(Utc::now());
        self.store
            .apply(UnitOfWork::new("register_master").with(FlowMutation::InsertMaster(record.clone())))
            .await?;

        info!(
            flow_id = %record.flow_id,
            flow_type = %record.flow_type,
            tenant_id = %record.tenant_id,
            "✅ REGISTRY: Master flow registered"
        );
        Ok(record)
    }

    pub async fn get(&self, flow_id: Uuid, scope: Option<&TenantScope>) -> FlowResult<Option<MasterFlowRecord>> {
        Ok(self.store.find_master(flow_id, scope).await?)
    }

    pub async fn update_status(&self, flow_id: Uuid, status: &str) -> FlowResult<()> {
        self.apply_patch(flow_id, MasterFlowPatch::status(status), "update_master_status")
            .await
    }

    pub async fn update_phase(&self, flow_id: Uuid, phase: Option<String>) -> FlowResult<()> {
        let patch = MasterFlowPatch {
            current_phase: Some(phase),
            ..Default::default()
        };
        self.apply_patch(flow_id, patch, "update_master_phase").await
    }

    pub async fn list(&self, query: &MasterFlowQuery) -> FlowResult<Vec<MasterFlowRecord>> {
        Ok(self.store.list_masters(query).await?)
    }

    async fn apply_patch(&self, flow_id: Uuid, patch: MasterFlowPatch, label: &'static str) -> FlowResult<()> {
        self.store
            .apply(UnitOfWork::new(label).with(FlowMutation::UpdateMaster { flow_id, patch }))
            .await
            .map_err(|e| e.for_flow(flow_id))?;
        debug!(flow_id = %flow_id, unit = label, "Master flow updated");
        Ok(())
    }
}

/// Phase fields written by the execution layer as a flow advances
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseProjection {
    pub current_phase: Option<String>,
    pub next_phase: Option<String>,
    pub progress_percentage: f64,
    /// Replaces the stored phase_state when present
    pub phase_state: Option<Value>,
}

impl From<PhaseProjection> for ChildFlowPatch {
    fn from(projection: PhaseProjection) -> Self {
        ChildFlowPatch {
            current_phase: Some(projection.current_phase),
            next_phase: Some(projection.next_phase),
            progress_percentage: Some(projection.progress_percentage),
            phase_state: projection.phase_state,
            ..Default::default()
        }
    }
}

/// Flow-type-specific records, one table per [`FlowType`]
#[derive(Clone)]
pub struct ChildFlowRepository {
    store: Arc<dyn FlowStore>,
}

impl std::fmt::Debug for ChildFlowRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildFlowRepository").finish_non_exhaustive()
    }
}

impl ChildFlowRepository {
    pub fn new(store: Arc<dyn FlowStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, new_flow: NewChildFlow) -> FlowResult<ChildFlowRecord> {
        let record = new_flow.into_record(Utc::now());
        self.store
            .apply(UnitOfWork::new("create_child").with(FlowMutation::InsertChild(record.clone())))
            .await?;

        info!(
            flow_id = %record.flow_id,
            flow_type = %record.flow_type,
            master_flow_id = ?record.master_flow_id,
            "✅ REPOSITORY: Child flow created"
        );
        Ok(record)
    }

    /// Child by own id or master back-reference
    pub async fn get(&self, id: Uuid, scope: Option<&TenantScope>) -> FlowResult<Option<ChildFlowRecord>> {
        Ok(self.store.find_child(id, scope).await?)
    }

    pub async fn children_of(
        &self,
        master_flow_id: Uuid,
        scope: Option<&TenantScope>,
    ) -> FlowResult<Vec<ChildFlowRecord>> {
        Ok(self.store.find_children_for_master(master_flow_id, scope).await?)
    }

    /// Point a child at its master, typically right after the master is registered
    pub async fn link_to_master(&self, flow_type: FlowType, flow_id: Uuid, master_flow_id: Uuid) -> FlowResult<()> {
        let patch = ChildFlowPatch {
            master_flow_id: Some(Some(master_flow_id)),
            ..Default::default()
        };
        self.apply_patch(flow_type, flow_id, patch, "link_child_to_master")
            .await
    }

    pub async fn update_phase_fields(
        &self,
        flow_type: FlowType,
        flow_id: Uuid,
        projection: PhaseProjection,
    ) -> FlowResult<()> {
        self.apply_patch(flow_type, flow_id, projection.into(), "update_child_phase")
            .await
    }

    pub async fn update_status(&self, flow_type: FlowType, flow_id: Uuid, status: &str) -> FlowResult<()> {
        self.apply_patch(flow_type, flow_id, ChildFlowPatch::status(status), "update_child_status")
            .await
    }

    async fn apply_patch(
        &self,
        flow_type: FlowType,
        flow_id: Uuid,
        patch: ChildFlowPatch,
        label: &'static str,
    ) -> FlowResult<()> {
        self.store
            .apply(UnitOfWork::new(label).with(FlowMutation::UpdateChild {
                flow_id,
                flow_type,
                patch,
            }))
            .await
            .map_err(|e| e.for_flow(flow_id))?;
        debug!(flow_id = %flow_id, flow_type = %flow_type, unit = label, "Child flow updated");
        Ok(())
    }
}
