//! # Flow Lifecycle Service
//!
//! Operator- and user-initiated lifecycle operations on a flow: pause, resume,
//! retry, cancel, archive, soft-delete cascade and the discovery hand-off to a
//! downstream flow.
//!
//! Every operation validates against the flow state machine first, then commits all
//! of its record changes as one [`UnitOfWork`]. Preconditions that fail return
//! `NotFound` or `InvalidStateTransition` and leave the records untouched. Store
//! failures roll the unit back and propagate as `Infrastructure`.
//!
//! Two concurrent calls on the same flow are not serialised here; the store's
//! transaction isolation is the only guard and the later commit wins.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::LifecycleConfig;
use crate::consistency::FlowConsistencyChecker;
use crate::constants::{status, status_groups, FlowType};
use crate::error::{FlowError, FlowResult};
use crate::logging::{log_error, log_flow_operation};
use crate::models::{
    ChildFlowPatch, ChildFlowRecord, DeletionAuditRecord, FlowView, MasterFlowPatch, MasterFlowRecord,
    TenantScope,
};
use crate::phases::PhaseTransitionPlanner;
use crate::resolver::FlowLookupResolver;
use crate::state_machine::{self, FlowEvent, FlowState};
use crate::store::{FlowMutation, FlowStore, MasterFlowQuery, UnitOfWork};

/// Why a phase is being handed to the execution engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchTrigger {
    Resume,
    Retry,
}

/// Request for the phase-execution engine to run one phase
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseDispatch {
    /// Canonical (master) id when a master exists, else the child's id
    pub flow_id: Uuid,
    pub child_flow_id: Uuid,
    pub flow_type: FlowType,
    pub tenant_id: Uuid,
    pub engagement_id: Uuid,
    pub phase: String,
    pub phase_input: Option<Value>,
    pub trigger: DispatchTrigger,
}

/// Phase-execution engine seam. Invoked after resume/retry has committed; the engine
/// owns all later writes to `current_phase` and `progress_percentage`.
#[async_trait]
pub trait PhaseDispatcher: Send + Sync {
    async fn dispatch(&self, dispatch: PhaseDispatch) -> anyhow::Result<()>;
}

/// Result of a status-changing lifecycle operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleOutcome {
    pub flow_id: Uuid,
    pub flow_type: FlowType,
    pub operation: &'static str,
    pub previous_status: String,
    pub status: String,
    pub current_phase: Option<String>,
    pub next_phase: Option<String>,
    pub progress_percentage: Option<f64>,
    /// Records written by the unit of work
    pub records_updated: usize,
    pub dispatched: bool,
}

/// Who asked for a soft delete, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionRequest {
    pub user_id: String,
    pub reason: Option<String>,
}

impl DeletionRequest {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CascadeDeletionOutcome {
    pub flow_id: Uuid,
    pub master_deleted: bool,
    pub children_deleted: usize,
    /// Master plus children flagged deleted
    pub records_updated: usize,
    pub audit_id: Uuid,
}

#[derive(Clone)]
pub struct FlowLifecycleService {
    store: Arc<dyn FlowStore>,
    resolver: FlowLookupResolver,
    checker: FlowConsistencyChecker,
    planner: PhaseTransitionPlanner,
    dispatcher: Option<Arc<dyn PhaseDispatcher>>,
    config: LifecycleConfig,
}

impl std::fmt::Debug for FlowLifecycleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowLifecycleService")
            .field("scope", &self.resolver.scope())
            .field("has_dispatcher", &self.dispatcher.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FlowLifecycleService {
    pub fn new(store: Arc<dyn FlowStore>, config: LifecycleConfig) -> Self {
        let resolver = FlowLookupResolver::new(store.clone());
        Self {
            checker: FlowConsistencyChecker::new(resolver.clone()),
            resolver,
            store,
            planner: PhaseTransitionPlanner::new(),
            dispatcher: None,
            config,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn PhaseDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Restrict every lookup to one tenant (and optionally engagement)
    pub fn with_scope(mut self, scope: TenantScope) -> Self {
        self.resolver = FlowLookupResolver::with_scope(self.store.clone(), scope);
        self.checker = FlowConsistencyChecker::new(self.resolver.clone());
        self
    }

    pub fn resolver(&self) -> &FlowLookupResolver {
        &self.resolver
    }

    pub fn checker(&self) -> &FlowConsistencyChecker {
        &self.checker
    }

    /// Masters outside the terminal set, newest first
    pub async fn list_active(&self, flow_type: Option<FlowType>) -> FlowResult<Vec<MasterFlowRecord>> {
        let query = MasterFlowQuery {
            flow_type,
            scope: self.resolver.scope().copied(),
            ..MasterFlowQuery::excluding(status_groups::MASTER_TERMINAL_STATUSES)
        };
        Ok(self.store.list_masters(&query).await?)
    }

    pub async fn get_flow(&self, flow_id: Uuid) -> FlowResult<FlowView> {
        self.resolver
            .resolve_view(flow_id)
            .await?
            .ok_or(FlowError::NotFound { flow_id })
    }

    pub async fn pause(&self, flow_id: Uuid) -> FlowResult<LifecycleOutcome> {
        self.simple_transition(flow_id, FlowEvent::Pause).await
    }

    pub async fn cancel(&self, flow_id: Uuid) -> FlowResult<LifecycleOutcome> {
        self.simple_transition(flow_id, FlowEvent::Cancel).await
    }

    pub async fn archive(&self, flow_id: Uuid) -> FlowResult<LifecycleOutcome> {
        self.simple_transition(flow_id, FlowEvent::Archive).await
    }

    /// Resume a paused, waiting or failed flow.
    ///
    /// From `waiting_for_approval` the approved phase is done and the flow advances
    /// to the next phase (holding position at the last one). From `paused` or
    /// `failed` the current phase is re-entered and progress is left as recorded.
    pub async fn resume(&self, flow_id: Uuid, phase_input: Option<Value>) -> FlowResult<LifecycleOutcome> {
        let (master, child) = self.load_for_execution(flow_id, FlowEvent::Resume).await?;
        state_machine::transition(flow_id, &child.status, FlowEvent::Resume)?;
        self.ensure_consistent(flow_id).await?;

        let previous = child.status.parse::<FlowState>().ok();
        let flow_type = child.flow_type;
        let current = self.current_phase_of(&child);
        let (target, progress) = if previous == Some(FlowState::WaitingForApproval) {
            let target = self
                .planner
                .get_next_phase(flow_type, &current)
                .map(str::to_string)
                .unwrap_or_else(|| current.clone());
            let progress = self.planner.calculate_progress(flow_type, &target);
            (target, progress)
        } else {
            (current.clone(), child.progress_percentage)
        };
        let next_phase = self.planner.get_next_phase(flow_type, &target).map(str::to_string);

        let phase_state = update_phase_entry(&child.phase_state, &target, |entry| {
            if let Some(input) = &phase_input {
                entry.insert("resume_input".to_string(), input.clone());
            }
            entry.insert("resumed_at".to_string(), json!(Utc::now().to_rfc3339()));
            entry.insert("resumed_from".to_string(), json!(child.status));
        });

        let mut patch = ChildFlowPatch {
            status: Some(status::RUNNING.to_string()),
            current_phase: Some(Some(target.clone())),
            next_phase: Some(next_phase.clone()),
            progress_percentage: Some(progress),
            phase_state: Some(phase_state),
            ..Default::default()
        };
        if previous == Some(FlowState::Failed) {
            patch.error_message = Some(None);
            patch.error_details = Some(None);
        }

        let records_updated = self
            .commit_execution_unit("resume_flow", master.as_ref(), &child, patch)
            .await?;

        let mut outcome = LifecycleOutcome {
            flow_id: canonical_id(master.as_ref(), &child),
            flow_type,
            operation: "resume",
            previous_status: child.status.clone(),
            status: status::RUNNING.to_string(),
            current_phase: Some(target.clone()),
            next_phase,
            progress_percentage: Some(progress),
            records_updated,
            dispatched: false,
        };
        log_flow_operation(
            "resume",
            outcome.flow_id,
            Some(flow_type.as_str()),
            status::RUNNING,
            Some(&format!("phase={target} from={}", child.status)),
        );

        outcome.dispatched = self
            .dispatch(&outcome, &child, target, phase_input, DispatchTrigger::Resume)
            .await?;
        Ok(outcome)
    }

    /// Re-run the current phase of a failed or errored flow
    pub async fn retry(&self, flow_id: Uuid) -> FlowResult<LifecycleOutcome> {
        let (master, child) = self.load_for_execution(flow_id, FlowEvent::Retry).await?;
        state_machine::transition(flow_id, &child.status, FlowEvent::Retry)?;
        self.ensure_consistent(flow_id).await?;

        let phase = self.current_phase_of(&child);
        let phase_state = update_phase_entry(&child.phase_state, &phase, |entry| {
            let retries = entry.get("retry_count").and_then(Value::as_u64).unwrap_or(0);
            entry.insert("retry_count".to_string(), json!(retries + 1));
            entry.insert("last_retry_at".to_string(), json!(Utc::now().to_rfc3339()));
        });

        let patch = ChildFlowPatch {
            status: Some(status::RUNNING.to_string()),
            current_phase: Some(Some(phase.clone())),
            phase_state: Some(phase_state),
            error_message: Some(None),
            error_details: Some(None),
            ..Default::default()
        };
        let records_updated = self
            .commit_execution_unit("retry_flow", master.as_ref(), &child, patch)
            .await?;

        let mut outcome = LifecycleOutcome {
            flow_id: canonical_id(master.as_ref(), &child),
            flow_type: child.flow_type,
            operation: "retry",
            previous_status: child.status.clone(),
            status: status::RUNNING.to_string(),
            current_phase: Some(phase.clone()),
            next_phase: child.next_phase.clone(),
            progress_percentage: Some(child.progress_percentage),
            records_updated,
            dispatched: false,
        };
        log_flow_operation(
            "retry",
            outcome.flow_id,
            Some(child.flow_type.as_str()),
            status::RUNNING,
            Some(&format!("phase={phase}")),
        );

        outcome.dispatched = self
            .dispatch(&outcome, &child, phase, None, DispatchTrigger::Retry)
            .await?;
        Ok(outcome)
    }

    /// Flag the master and every linked child deleted, then append one audit record.
    ///
    /// The status flips commit as a single unit. The audit is written afterwards; if
    /// that write fails the statuses stay committed and `PartialCascadeFailure` is
    /// returned.
    pub async fn soft_delete_cascade(
        &self,
        flow_id: Uuid,
        request: DeletionRequest,
    ) -> FlowResult<CascadeDeletionOutcome> {
        let scope = self.resolver.scope();
        let master = match self.resolver.resolve_master_flow_id(flow_id).await? {
            Some(master_flow_id) => self.resolver.resolve_master(master_flow_id).await?,
            None => None,
        };
        let canonical = match &master {
            Some(master) => master.flow_id,
            None => self
                .resolver
                .resolve_child(flow_id)
                .await?
                .map(|child| child.master_flow_id.unwrap_or(child.flow_id))
                .ok_or(FlowError::NotFound { flow_id })?,
        };
        let children = self.store.find_children_for_master(canonical, scope).await?;
        if master.is_none() && children.is_empty() {
            return Err(FlowError::NotFound { flow_id });
        }

        let primary_status = master
            .as_ref()
            .map(|m| m.flow_status.clone())
            .or_else(|| children.first().map(|c| c.status.clone()))
            .unwrap_or_default();
        let already_deleted = match &master {
            Some(master) => is_deleted(&master.flow_status),
            None => children.iter().all(|c| is_deleted(&c.status)),
        };
        if already_deleted {
            return Err(FlowError::invalid_transition(
                flow_id,
                FlowEvent::Delete.event_type(),
                primary_status,
                &state_names(FlowEvent::Delete),
            ));
        }

        let mut unit = UnitOfWork::new("soft_delete_cascade");
        if let Some(master) = &master {
            unit.push(FlowMutation::UpdateMaster {
                flow_id: master.flow_id,
                patch: MasterFlowPatch::status(status::DELETED),
            });
        }
        for child in &children {
            unit.push(FlowMutation::UpdateChild {
                flow_id: child.flow_id,
                flow_type: child.flow_type,
                patch: ChildFlowPatch::status(status::DELETED),
            });
        }
        let records_updated = self.store.apply(unit).await.map_err(|e| e.for_flow(flow_id))?;

        info!(
            flow_id = %canonical,
            master_deleted = master.is_some(),
            children_deleted = children.len(),
            records_updated = records_updated,
            user_id = %request.user_id,
            "🗑️ LIFECYCLE: Soft delete cascade committed"
        );

        let (tenant_id, engagement_id, flow_type) = match (&master, children.first()) {
            (Some(m), _) => (m.tenant_id, m.engagement_id, m.flow_type),
            (None, Some(c)) => (c.tenant_id, c.engagement_id, c.flow_type),
            (None, None) => return Err(FlowError::NotFound { flow_id }),
        };
        let audit = DeletionAuditRecord {
            audit_id: Uuid::new_v4(),
            flow_id: canonical,
            tenant_id,
            engagement_id,
            user_id: request.user_id,
            deletion_type: self.config.deletion_type.clone(),
            reason: request.reason,
            data_deleted: json!({
                "master_records": usize::from(master.is_some()),
                "child_records": children.len(),
                "child_flow_ids": children.iter().map(|c| c.flow_id).collect::<Vec<_>>(),
            }),
            deletion_impact: json!({
                "flow_type": flow_type,
                "previous_status": primary_status,
                "child_statuses": children
                    .iter()
                    .map(|c| (c.flow_id.to_string(), Value::String(c.status.clone())))
                    .collect::<Map<String, Value>>(),
                "records_updated": records_updated,
            }),
            created_at: Utc::now(),
        };
        let audit_id = audit.audit_id;

        if let Err(e) = self
            .store
            .apply(UnitOfWork::new("deletion_audit").with(FlowMutation::AppendDeletionAudit(audit)))
            .await
        {
            log_error(
                "FlowLifecycleService",
                "soft_delete_cascade",
                &e.to_string(),
                Some(&format!("flow_id={canonical} records_updated={records_updated}")),
            );
            return Err(FlowError::PartialCascadeFailure {
                flow_id: canonical,
                records_updated,
                reason: format!("deletion audit write failed: {e}"),
            });
        }

        log_flow_operation(
            "soft_delete_cascade",
            canonical,
            Some(flow_type.as_str()),
            status::DELETED,
            Some(&format!("records_updated={records_updated}")),
        );
        Ok(CascadeDeletionOutcome {
            flow_id: canonical,
            master_deleted: master.is_some(),
            children_deleted: children.len(),
            records_updated,
            audit_id,
        })
    }

    /// Hand the assets of a discovery flow to a downstream flow.
    ///
    /// Records the downstream reference under `flow_metadata.phase_ownership` and
    /// marks every asset ready with a forward pointer, all in one unit. Returns the
    /// number of assets handed over.
    pub async fn transition_phase_ownership(
        &self,
        discovery_flow_id: Uuid,
        downstream_flow_id: Uuid,
    ) -> FlowResult<usize> {
        let discovery = self.require_master(discovery_flow_id).await?;
        if discovery.flow_type != FlowType::Discovery {
            return Err(FlowError::InvalidInput(format!(
                "Flow {} is a {} flow, expected discovery",
                discovery.flow_id, discovery.flow_type
            )));
        }
        let downstream = self.require_master(downstream_flow_id).await?;
        if downstream.flow_type == FlowType::Discovery {
            return Err(FlowError::InvalidInput(format!(
                "Downstream flow {} must not be a discovery flow",
                downstream.flow_id
            )));
        }

        let assets = self.store.get_assets_by_flow(discovery.flow_id).await?;
        let mut metadata = match &discovery.flow_metadata {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        metadata.insert(
            "phase_ownership".to_string(),
            json!({
                "downstream_flow_id": downstream.flow_id,
                "downstream_flow_type": downstream.flow_type,
                "transferred_at": Utc::now().to_rfc3339(),
                "asset_count": assets.len(),
            }),
        );

        let mut unit = UnitOfWork::new("transition_phase_ownership").with(FlowMutation::UpdateMaster {
            flow_id: discovery.flow_id,
            patch: MasterFlowPatch {
                flow_metadata: Some(Value::Object(metadata)),
                ..Default::default()
            },
        });
        for asset in &assets {
            unit.push(FlowMutation::MarkAssetReady {
                asset_id: asset.asset_id,
                current_phase: downstream.flow_type.as_str().to_string(),
                downstream_flow_id: downstream.flow_id,
            });
        }
        self.store
            .apply(unit)
            .await
            .map_err(|e| e.for_flow(discovery.flow_id))?;

        info!(
            discovery_flow_id = %discovery.flow_id,
            downstream_flow_id = %downstream.flow_id,
            downstream_flow_type = %downstream.flow_type,
            assets = assets.len(),
            "🔀 LIFECYCLE: Phase ownership transferred"
        );
        Ok(assets.len())
    }

    async fn require_master(&self, flow_id: Uuid) -> FlowResult<MasterFlowRecord> {
        let master_flow_id = self
            .resolver
            .resolve_master_flow_id(flow_id)
            .await?
            .ok_or(FlowError::NotFound { flow_id })?;
        self.resolver
            .resolve_master(master_flow_id)
            .await?
            .ok_or(FlowError::NotFound { flow_id })
    }

    /// Status flip on whichever records exist, validated against the child status
    /// when a child exists and the master status otherwise
    async fn simple_transition(&self, flow_id: Uuid, event: FlowEvent) -> FlowResult<LifecycleOutcome> {
        let (master, child) = self.resolver.resolve_both(flow_id).await?;
        let view = FlowView::from_parts(master, child).ok_or(FlowError::NotFound { flow_id })?;
        let previous_status = view.status().to_string();
        let target = state_machine::transition(flow_id, &previous_status, event)?;

        let mut unit = UnitOfWork::new(event.event_type());
        if let Some(child) = view.child() {
            unit.push(FlowMutation::UpdateChild {
                flow_id: child.flow_id,
                flow_type: child.flow_type,
                patch: ChildFlowPatch::status(target.as_str()),
            });
        }
        if let Some(master) = view.master() {
            unit.push(FlowMutation::UpdateMaster {
                flow_id: master.flow_id,
                patch: MasterFlowPatch::status(target.as_str()),
            });
        }
        let records_updated = self.store.apply(unit).await.map_err(|e| e.for_flow(flow_id))?;

        log_flow_operation(
            event.event_type(),
            view.flow_id(),
            Some(view.flow_type().as_str()),
            target.as_str(),
            Some(&format!("from={previous_status}")),
        );

        let child = view.child();
        Ok(LifecycleOutcome {
            flow_id: view.flow_id(),
            flow_type: view.flow_type(),
            operation: event.event_type(),
            previous_status,
            status: target.as_str().to_string(),
            current_phase: child.and_then(|c| c.current_phase.clone()),
            next_phase: child.and_then(|c| c.next_phase.clone()),
            progress_percentage: child.map(|c| c.progress_percentage),
            records_updated,
            dispatched: false,
        })
    }

    /// Resume and retry act on the child; a flow without one cannot execute
    async fn load_for_execution(
        &self,
        flow_id: Uuid,
        event: FlowEvent,
    ) -> FlowResult<(Option<MasterFlowRecord>, ChildFlowRecord)> {
        match self.resolver.resolve_both(flow_id).await? {
            (master, Some(child)) => Ok((master, child)),
            (Some(master), None) => Err(FlowError::ConsistencyViolation {
                flow_id,
                issues: vec![format!(
                    "Cannot {} flow {}: no {} child record",
                    event.event_type(),
                    master.flow_id,
                    master.flow_type
                )],
            }),
            (None, None) => Err(FlowError::NotFound { flow_id }),
        }
    }

    async fn ensure_consistent(&self, flow_id: Uuid) -> FlowResult<()> {
        if self.config.require_consistency_for_resume {
            self.checker.require_consistent(flow_id).await?;
        }
        Ok(())
    }

    fn current_phase_of(&self, child: &ChildFlowRecord) -> String {
        child
            .current_phase
            .as_deref()
            .map(|phase| self.planner.normalize_phase_name(child.flow_type, phase))
            .unwrap_or_else(|| self.planner.first_phase(child.flow_type).to_string())
    }

    async fn commit_execution_unit(
        &self,
        label: &'static str,
        master: Option<&MasterFlowRecord>,
        child: &ChildFlowRecord,
        patch: ChildFlowPatch,
    ) -> FlowResult<usize> {
        let mut unit = UnitOfWork::new(label).with(FlowMutation::UpdateChild {
            flow_id: child.flow_id,
            flow_type: child.flow_type,
            patch,
        });
        // Master phase fields are synced by the execution layer
        if let Some(master) = master {
            unit.push(FlowMutation::UpdateMaster {
                flow_id: master.flow_id,
                patch: MasterFlowPatch::status(status::RUNNING),
            });
        }
        self.store.apply(unit).await.map_err(|e| e.for_flow(child.flow_id))
    }

    /// Hand the phase to the execution engine. The state change is already
    /// committed, so a dispatch failure is reported but not rolled back.
    async fn dispatch(
        &self,
        outcome: &LifecycleOutcome,
        child: &ChildFlowRecord,
        phase: String,
        phase_input: Option<Value>,
        trigger: DispatchTrigger,
    ) -> FlowResult<bool> {
        let Some(dispatcher) = &self.dispatcher else {
            warn!(
                flow_id = %outcome.flow_id,
                phase = %phase,
                "No phase dispatcher configured, execution layer must pick the flow up"
            );
            return Ok(false);
        };

        let request = PhaseDispatch {
            flow_id: outcome.flow_id,
            child_flow_id: child.flow_id,
            flow_type: child.flow_type,
            tenant_id: child.tenant_id,
            engagement_id: child.engagement_id,
            phase: phase.clone(),
            phase_input,
            trigger,
        };
        match dispatcher.dispatch(request).await {
            Ok(()) => {
                debug!(flow_id = %outcome.flow_id, phase = %phase, ?trigger, "Phase dispatched");
                Ok(true)
            }
            Err(e) => {
                error!(
                    flow_id = %outcome.flow_id,
                    phase = %phase,
                    error = %e,
                    "❌ LIFECYCLE: Phase dispatch failed after state change committed"
                );
                Err(FlowError::DispatchFailed {
                    flow_id: outcome.flow_id,
                    phase,
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn canonical_id(master: Option<&MasterFlowRecord>, child: &ChildFlowRecord) -> Uuid {
    master
        .map(|m| m.flow_id)
        .or(child.master_flow_id)
        .unwrap_or(child.flow_id)
}

fn is_deleted(status: &str) -> bool {
    matches!(status.parse::<FlowState>(), Ok(FlowState::Deleted))
}

fn state_names(event: FlowEvent) -> Vec<&'static str> {
    state_machine::allowed_sources(event)
        .iter()
        .map(FlowState::as_str)
        .collect()
}

/// Copy of `phase_state` with the object under `phase` modified by `update`
fn update_phase_entry(phase_state: &Value, phase: &str, update: impl FnOnce(&mut Map<String, Value>)) -> Value {
    let mut state = match phase_state {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    let mut entry = match state.remove(phase) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    update(&mut entry);
    state.insert(phase.to_string(), Value::Object(entry));
    Value::Object(state)
}
