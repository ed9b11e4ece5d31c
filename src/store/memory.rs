//! In-memory flow store.
//!
//! Units of work are staged on a copy of the current state and swapped in only when
//! every mutation succeeded, which gives the same all-or-nothing behaviour as the
//! PostgreSQL transaction. Failures can be armed per mutation kind to exercise
//! rollback and partial-failure paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use super::{AppliedUnit, FlowMutation, FlowStore, MasterFlowQuery, UnitOfWork};
use crate::constants::FlowType;
use crate::error::{StoreError, StoreResult};
use crate::models::{
    AssetReadiness, ChildFlowRecord, DeletionAuditRecord, FailureJournalEntry, FlowAsset,
    MasterFlowRecord, TenantScope,
};

#[derive(Debug, Clone, Default)]
struct StoreState {
    masters: HashMap<Uuid, MasterFlowRecord>,
    children: HashMap<(FlowType, Uuid), ChildFlowRecord>,
    assets: HashMap<Uuid, FlowAsset>,
    deletion_audits: Vec<DeletionAuditRecord>,
    failure_journal: Vec<FailureJournalEntry>,
}

impl StoreState {
    fn apply_mutation(&mut self, mutation: FlowMutation, now: DateTime<Utc>) -> StoreResult<usize> {
        match mutation {
            FlowMutation::InsertMaster(record) => {
                if self.masters.contains_key(&record.flow_id) {
                    return Err(StoreError::Conflict(format!("master flow {} already exists", record.flow_id)));
                }
                self.masters.insert(record.flow_id, record);
            }
            FlowMutation::InsertChild(record) => {
                let key = (record.flow_type, record.flow_id);
                if self.children.contains_key(&key) {
                    return Err(StoreError::Conflict(format!(
                        "{} flow {} already exists",
                        record.flow_type, record.flow_id
                    )));
                }
                self.children.insert(key, record);
            }
            FlowMutation::UpdateMaster { flow_id, patch } => {
                let record = self.masters.get_mut(&flow_id).ok_or(StoreError::RowNotFound {
                    entity: "master_flow",
                    id: flow_id,
                })?;
                patch.apply_to(record, now);
            }
            FlowMutation::UpdateChild {
                flow_id,
                flow_type,
                patch,
            } => {
                let record = self
                    .children
                    .get_mut(&(flow_type, flow_id))
                    .ok_or(StoreError::RowNotFound {
                        entity: "child_flow",
                        id: flow_id,
                    })?;
                patch.apply_to(record, now);
            }
            FlowMutation::MarkAssetReady {
                asset_id,
                current_phase,
                downstream_flow_id,
            } => {
                let asset = self.assets.get_mut(&asset_id).ok_or(StoreError::RowNotFound {
                    entity: "asset",
                    id: asset_id,
                })?;
                asset.current_phase = Some(current_phase);
                asset.assessment_flow_id = Some(downstream_flow_id);
                asset.readiness = AssetReadiness::Ready;
            }
            FlowMutation::AppendDeletionAudit(record) => self.deletion_audits.push(record),
            FlowMutation::RecordFailure(entry) => self.failure_journal.push(entry),
            FlowMutation::FailIfStale {
                flow_id,
                flow_type,
                cutoff,
                terminal_statuses,
                patch,
                entry,
            } => {
                let Some(record) = self.children.get_mut(&(flow_type, flow_id)) else {
                    return Ok(0);
                };
                if record.updated_at >= cutoff || terminal_statuses.iter().any(|s| *s == record.status) {
                    return Ok(0);
                }
                patch.apply_to(record, now);
                self.failure_journal.push(entry);
                return Ok(2);
            }
        }
        Ok(1)
    }
}

/// Process-local [`FlowStore`]
#[derive(Debug, Default)]
pub struct InMemoryFlowStore {
    state: RwLock<StoreState>,
    armed_failures: Mutex<Vec<&'static str>>,
    unavailable: Mutex<bool>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next unit of work that contains a mutation of `kind`
    /// (see [`FlowMutation::kind`]). The failure is consumed once triggered.
    pub fn fail_next(&self, kind: &'static str) {
        self.armed_failures.lock().push(kind);
    }

    /// Make every call fail as if the database were down
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    /// Seed an asset owned by the external asset store
    pub fn insert_asset(&self, asset: FlowAsset) {
        self.state.write().assets.insert(asset.asset_id, asset);
    }

    pub fn asset(&self, asset_id: Uuid) -> Option<FlowAsset> {
        self.state.read().assets.get(&asset_id).cloned()
    }

    pub fn master(&self, flow_id: Uuid) -> Option<MasterFlowRecord> {
        self.state.read().masters.get(&flow_id).cloned()
    }

    pub fn child(&self, flow_type: FlowType, flow_id: Uuid) -> Option<ChildFlowRecord> {
        self.state.read().children.get(&(flow_type, flow_id)).cloned()
    }

    pub fn deletion_audits(&self) -> Vec<DeletionAuditRecord> {
        self.state.read().deletion_audits.clone()
    }

    pub fn failure_journal(&self) -> Vec<FailureJournalEntry> {
        self.state.read().failure_journal.clone()
    }

    fn check_available(&self) -> StoreResult<()> {
        if *self.unavailable.lock() {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()));
        }
        Ok(())
    }

    fn take_armed_failure(&self, unit: &UnitOfWork) -> Option<&'static str> {
        let mut armed = self.armed_failures.lock();
        let position = armed
            .iter()
            .position(|kind| unit.mutations().iter().any(|m| m.kind() == *kind))?;
        Some(armed.remove(position))
    }

    fn scoped(scope: Option<&TenantScope>, tenant_id: Uuid, engagement_id: Uuid) -> bool {
        scope.map_or(true, |s| s.admits(tenant_id, engagement_id))
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn find_master(&self, flow_id: Uuid, scope: Option<&TenantScope>) -> StoreResult<Option<MasterFlowRecord>> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .masters
            .get(&flow_id)
            .filter(|m| Self::scoped(scope, m.tenant_id, m.engagement_id))
            .cloned())
    }

    async fn find_child(&self, id: Uuid, scope: Option<&TenantScope>) -> StoreResult<Option<ChildFlowRecord>> {
        self.check_available()?;
        let state = self.state.read();
        let mut candidates: Vec<&ChildFlowRecord> = state
            .children
            .values()
            .filter(|c| c.references(id) && Self::scoped(scope, c.tenant_id, c.engagement_id))
            .collect();
        candidates.sort_by(|a, b| {
            (b.flow_id == id)
                .cmp(&(a.flow_id == id))
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(candidates.first().map(|c| (*c).clone()))
    }

    async fn find_children_for_master(
        &self,
        master_flow_id: Uuid,
        scope: Option<&TenantScope>,
    ) -> StoreResult<Vec<ChildFlowRecord>> {
        self.check_available()?;
        let state = self.state.read();
        let mut children: Vec<ChildFlowRecord> = state
            .children
            .values()
            .filter(|c| c.references(master_flow_id) && Self::scoped(scope, c.tenant_id, c.engagement_id))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(children)
    }

    async fn list_masters(&self, query: &MasterFlowQuery) -> StoreResult<Vec<MasterFlowRecord>> {
        self.check_available()?;
        let state = self.state.read();
        let mut masters: Vec<MasterFlowRecord> =
            state.masters.values().filter(|m| query.matches(m)).cloned().collect();
        masters.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            masters.truncate(limit);
        }
        Ok(masters)
    }

    async fn find_stale_children(
        &self,
        cutoff: DateTime<Utc>,
        exclude_statuses: &[&str],
        limit: usize,
    ) -> StoreResult<Vec<ChildFlowRecord>> {
        self.check_available()?;
        let state = self.state.read();
        let mut stale: Vec<ChildFlowRecord> = state
            .children
            .values()
            .filter(|c| c.updated_at < cutoff && !exclude_statuses.contains(&c.status.as_str()))
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        stale.truncate(limit);
        Ok(stale)
    }

    async fn get_assets_by_flow(&self, flow_id: Uuid) -> StoreResult<Vec<FlowAsset>> {
        self.check_available()?;
        let state = self.state.read();
        let mut assets: Vec<FlowAsset> = state.assets.values().filter(|a| a.flow_id == flow_id).cloned().collect();
        assets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(assets)
    }

    async fn apply_unit(&self, unit: UnitOfWork) -> StoreResult<AppliedUnit> {
        self.check_available()?;
        if let Some(kind) = self.take_armed_failure(&unit) {
            return Err(StoreError::InjectedFailure(format!("{kind} in unit '{}'", unit.label())));
        }

        let label = unit.label();
        let now = Utc::now();
        let mut guard = self.state.write();
        let mut staged = guard.clone();
        let mut rows_per_mutation = Vec::with_capacity(unit.len());
        for mutation in unit.mutations().iter().cloned() {
            rows_per_mutation.push(staged.apply_mutation(mutation, now)?);
        }
        *guard = staged;

        let applied = AppliedUnit { rows_per_mutation };
        debug!(unit = label, rows = applied.rows(), "In-memory unit of work committed");
        Ok(applied)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }
}
