//! # Flow Record Store
//!
//! Persistence seam for master and child records. Reads are individual queries;
//! writes are always submitted as a [`UnitOfWork`] so that a cascade or a monitor
//! tick either commits completely or not at all.
//!
//! Two implementations ship with the crate:
//!
//! - [`PgFlowStore`] - PostgreSQL via SQLx, one transaction per unit of work
//! - [`InMemoryFlowStore`] - process-local store used by tests and embedded tooling
//!
//! No flow state is cached above this layer: API workers and the health monitor may
//! run in separate processes, so every read goes to the store.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryFlowStore;
#[cfg(feature = "postgres")]
pub use postgres::PgFlowStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::constants::FlowType;
use crate::error::StoreResult;
use crate::models::{
    ChildFlowPatch, ChildFlowRecord, DeletionAuditRecord, FailureJournalEntry, FlowAsset,
    MasterFlowPatch, MasterFlowRecord, TenantScope,
};

/// A single write inside a unit of work
#[derive(Debug, Clone, PartialEq)]
pub enum FlowMutation {
    InsertMaster(MasterFlowRecord),
    InsertChild(ChildFlowRecord),
    UpdateMaster {
        flow_id: Uuid,
        patch: MasterFlowPatch,
    },
    UpdateChild {
        flow_id: Uuid,
        flow_type: FlowType,
        patch: ChildFlowPatch,
    },
    /// Hand an asset over to a downstream flow
    MarkAssetReady {
        asset_id: Uuid,
        current_phase: String,
        downstream_flow_id: Uuid,
    },
    AppendDeletionAudit(DeletionAuditRecord),
    RecordFailure(FailureJournalEntry),
    /// Fail a child and journal it, but only while it is still stale: last updated
    /// before `cutoff` and in none of `terminal_statuses`. A child that no longer
    /// matches is skipped and writes nothing.
    FailIfStale {
        flow_id: Uuid,
        flow_type: FlowType,
        cutoff: DateTime<Utc>,
        terminal_statuses: Vec<String>,
        patch: ChildFlowPatch,
        entry: FailureJournalEntry,
    },
}

impl FlowMutation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsertMaster(_) => "insert_master",
            Self::InsertChild(_) => "insert_child",
            Self::UpdateMaster { .. } => "update_master",
            Self::UpdateChild { .. } => "update_child",
            Self::MarkAssetReady { .. } => "mark_asset_ready",
            Self::AppendDeletionAudit(_) => "append_deletion_audit",
            Self::RecordFailure(_) => "record_failure",
            Self::FailIfStale { .. } => "fail_if_stale",
        }
    }
}

/// Ordered batch of mutations committed atomically
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitOfWork {
    label: &'static str,
    mutations: Vec<FlowMutation>,
}

impl UnitOfWork {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            mutations: Vec::new(),
        }
    }

    pub fn push(&mut self, mutation: FlowMutation) -> &mut Self {
        self.mutations.push(mutation);
        self
    }

    pub fn with(mut self, mutation: FlowMutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn mutations(&self) -> &[FlowMutation] {
        &self.mutations
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Rows written by a committed unit, per mutation in submission order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedUnit {
    pub rows_per_mutation: Vec<usize>,
}

impl AppliedUnit {
    pub fn rows(&self) -> usize {
        self.rows_per_mutation.iter().sum()
    }

    /// Whether the mutation at `index` wrote anything
    pub fn wrote(&self, index: usize) -> bool {
        self.rows_per_mutation.get(index).is_some_and(|rows| *rows > 0)
    }
}

/// Filter for listing master records
#[derive(Debug, Clone, Default)]
pub struct MasterFlowQuery {
    pub flow_type: Option<FlowType>,
    pub exclude_statuses: Vec<String>,
    pub scope: Option<TenantScope>,
    pub limit: Option<usize>,
}

impl MasterFlowQuery {
    pub fn excluding(statuses: &[&str]) -> Self {
        Self {
            exclude_statuses: statuses.iter().map(|s| (*s).to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &MasterFlowRecord) -> bool {
        self.flow_type.map_or(true, |t| t == record.flow_type)
            && !self.exclude_statuses.iter().any(|s| *s == record.flow_status)
            && self
                .scope
                .map_or(true, |scope| scope.admits(record.tenant_id, record.engagement_id))
    }
}

/// Persistence operations required by the orchestration core
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Master whose flow_id equals `flow_id`
    async fn find_master(&self, flow_id: Uuid, scope: Option<&TenantScope>) -> StoreResult<Option<MasterFlowRecord>>;

    /// Child whose flow_id or master_flow_id equals `id`; an own-id match wins
    async fn find_child(&self, id: Uuid, scope: Option<&TenantScope>) -> StoreResult<Option<ChildFlowRecord>>;

    /// Every child linked to a master, by back-reference or shared id
    async fn find_children_for_master(
        &self,
        master_flow_id: Uuid,
        scope: Option<&TenantScope>,
    ) -> StoreResult<Vec<ChildFlowRecord>>;

    /// Masters matching the query, newest first
    async fn list_masters(&self, query: &MasterFlowQuery) -> StoreResult<Vec<MasterFlowRecord>>;

    /// Children not updated since `cutoff` whose status is outside `exclude_statuses`
    async fn find_stale_children(
        &self,
        cutoff: DateTime<Utc>,
        exclude_statuses: &[&str],
        limit: usize,
    ) -> StoreResult<Vec<ChildFlowRecord>>;

    async fn get_assets_by_flow(&self, flow_id: Uuid) -> StoreResult<Vec<FlowAsset>>;

    /// Commit every mutation or none, reporting rows written per mutation
    async fn apply_unit(&self, unit: UnitOfWork) -> StoreResult<AppliedUnit>;

    /// Commit every mutation or none; returns the number of rows written
    async fn apply(&self, unit: UnitOfWork) -> StoreResult<usize> {
        Ok(self.apply_unit(unit).await?.rows())
    }

    /// Cheap liveness probe of the backing store
    async fn ping(&self) -> StoreResult<()>;
}
