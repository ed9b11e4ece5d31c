//! # Flow Lookup Resolver
//!
//! Callers may hold either the master id or a child's own id. Resolution order:
//!
//! 1. a master whose `flow_id` equals the identifier
//! 2. a child whose `flow_id` or `master_flow_id` equals the identifier
//!    (own-id match first)
//! 3. when only a child was found, the master named by its `master_flow_id`
//!
//! A direct master match always wins over a child's back-reference. Nothing found is
//! `None`, never an error; only store failures propagate.

use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::FlowResult;
use crate::models::{ChildFlowRecord, FlowView, MasterFlowRecord, TenantScope};
use crate::store::FlowStore;

#[derive(Clone)]
pub struct FlowLookupResolver {
    store: Arc<dyn FlowStore>,
    scope: Option<TenantScope>,
}

impl std::fmt::Debug for FlowLookupResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowLookupResolver")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl FlowLookupResolver {
    pub fn new(store: Arc<dyn FlowStore>) -> Self {
        Self { store, scope: None }
    }

    /// Resolver restricted to one tenant (and optionally one engagement)
    pub fn with_scope(store: Arc<dyn FlowStore>, scope: TenantScope) -> Self {
        Self {
            store,
            scope: Some(scope),
        }
    }

    pub fn scope(&self) -> Option<&TenantScope> {
        self.scope.as_ref()
    }

    pub async fn resolve_child(&self, id: Uuid) -> FlowResult<Option<ChildFlowRecord>> {
        Ok(self.store.find_child(id, self.scope.as_ref()).await?)
    }

    pub async fn resolve_master(&self, id: Uuid) -> FlowResult<Option<MasterFlowRecord>> {
        Ok(self.store.find_master(id, self.scope.as_ref()).await?)
    }

    pub async fn resolve_both(&self, id: Uuid) -> FlowResult<(Option<MasterFlowRecord>, Option<ChildFlowRecord>)> {
        let master = self.resolve_master(id).await?;
        let child = self.resolve_child(id).await?;

        let master = match (master, &child) {
            (Some(master), _) => Some(master),
            (None, Some(child)) => match child.master_flow_id {
                Some(master_flow_id) if master_flow_id != id => {
                    debug!(
                        id = %id,
                        master_flow_id = %master_flow_id,
                        "Resolving master through child back-reference"
                    );
                    self.resolve_master(master_flow_id).await?
                }
                _ => None,
            },
            (None, None) => None,
        };

        Ok((master, child))
    }

    /// Canonical master id for any accepted identifier
    pub async fn resolve_master_flow_id(&self, id: Uuid) -> FlowResult<Option<Uuid>> {
        if let Some(master) = self.resolve_master(id).await? {
            return Ok(Some(master.flow_id));
        }
        let child = self.resolve_child(id).await?;
        Ok(child.and_then(|c| c.master_flow_id))
    }

    /// Both records folded into one caller-facing value
    pub async fn resolve_view(&self, id: Uuid) -> FlowResult<Option<FlowView>> {
        let (master, child) = self.resolve_both(id).await?;
        Ok(FlowView::from_parts(master, child))
    }
}
