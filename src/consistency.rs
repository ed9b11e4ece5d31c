//! # Flow Consistency Checker
//!
//! Read-only diff between a master record and its linked child. Findings are
//! reported, never repaired: picking the "right" side of a disagreement
//! automatically risks losing data.
//!
//! Hard issues: a record is missing, or the child's back-reference names another
//! master. Warnings: phase skew (expected while a transition is in flight) and a
//! status pair outside [`statuses_equivalent`].

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::constants::statuses_equivalent;
use crate::error::{FlowError, FlowResult};
use crate::resolver::FlowLookupResolver;

/// Structured diff between a master and its child
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowConsistencyReport {
    pub flow_id: Uuid,
    pub master_exists: bool,
    pub child_exists: bool,
    pub master_status: Option<String>,
    pub child_status: Option<String>,
    /// False when both records exist and their statuses are not equivalent
    pub status_aligned: bool,
    /// Hard mismatches
    pub issues: Vec<String>,
    /// Soft mismatches
    pub warnings: Vec<String>,
}

impl FlowConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty() && self.status_aligned
    }
}

#[derive(Debug, Clone)]
pub struct FlowConsistencyChecker {
    resolver: FlowLookupResolver,
}

impl FlowConsistencyChecker {
    pub fn new(resolver: FlowLookupResolver) -> Self {
        Self { resolver }
    }

    pub async fn check(&self, flow_id: Uuid) -> FlowResult<FlowConsistencyReport> {
        let (master, child) = self.resolver.resolve_both(flow_id).await?;

        let mut report = FlowConsistencyReport {
            flow_id,
            master_exists: master.is_some(),
            child_exists: child.is_some(),
            master_status: master.as_ref().map(|m| m.flow_status.clone()),
            child_status: child.as_ref().map(|c| c.status.clone()),
            status_aligned: true,
            issues: Vec::new(),
            warnings: Vec::new(),
        };

        match (&master, &child) {
            (None, None) => report.issues.push("No master or child record found".to_string()),
            (Some(master), None) => report.issues.push(format!(
                "Master flow {} has no linked {} child record",
                master.flow_id, master.flow_type
            )),
            (None, Some(child)) => report.issues.push(format!(
                "Child flow {} has no master record (master_flow_id: {})",
                child.flow_id,
                child
                    .master_flow_id
                    .map_or_else(|| "none".to_string(), |id| id.to_string())
            )),
            (Some(master), Some(child)) => {
                if child.master_flow_id != Some(master.flow_id) {
                    report.issues.push(format!(
                        "Child flow {} references master {:?}, expected {}",
                        child.flow_id, child.master_flow_id, master.flow_id
                    ));
                }

                if master.current_phase != child.current_phase {
                    report.warnings.push(format!(
                        "Phase mismatch: master at {:?}, child at {:?}",
                        master.current_phase, child.current_phase
                    ));
                }

                if !statuses_equivalent(&master.flow_status, &child.status) {
                    report.status_aligned = false;
                    report.warnings.push(format!(
                        "Status mismatch: master '{}' vs child '{}'",
                        master.flow_status, child.status
                    ));
                }
            }
        }

        if report.is_consistent() {
            debug!(flow_id = %flow_id, "Flow records consistent");
        } else {
            warn!(
                flow_id = %flow_id,
                issues = ?report.issues,
                warnings = ?report.warnings,
                "⚠️ CONSISTENCY: Master/child drift detected"
            );
        }

        Ok(report)
    }

    /// Fails with `ConsistencyViolation` when the report carries hard issues.
    /// Warnings alone do not block.
    pub async fn require_consistent(&self, flow_id: Uuid) -> FlowResult<FlowConsistencyReport> {
        let report = self.check(flow_id).await?;
        if !report.issues.is_empty() {
            return Err(FlowError::ConsistencyViolation {
                flow_id,
                issues: report.issues.clone(),
            });
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FlowType;
    use crate::models::{NewChildFlow, NewMasterFlow};
    use crate::store::{FlowMutation, FlowStore, InMemoryFlowStore, UnitOfWork};
    use chrono::Utc;
    use std::sync::Arc;

    async fn seed_pair(store: &InMemoryFlowStore, master_status: &str, child_status: &str) -> Uuid {
        let tenant = Uuid::new_v4();
        let engagement = Uuid::new_v4();
        let mut master = NewMasterFlow::new(FlowType::Discovery, "d", tenant, engagement).into_record(Utc::now());
        master.flow_status = master_status.to_string();
        let mut new_child = NewChildFlow::new(FlowType::Discovery, tenant, engagement);
        new_child.flow_id = Some(master.flow_id);
        new_child.master_flow_id = Some(master.flow_id);
        let mut child = new_child.into_record(Utc::now());
        child.status = child_status.to_string();

        let flow_id = master.flow_id;
        store
            .apply(
                UnitOfWork::new("seed")
                    .with(FlowMutation::InsertMaster(master))
                    .with(FlowMutation::InsertChild(child)),
            )
            .await
            .unwrap();
        flow_id
    }

    #[tokio::test]
    async fn test_equivalent_statuses_are_consistent() {
        let store = Arc::new(InMemoryFlowStore::new());
        let flow_id = seed_pair(&store, "running", "active").await;
        let checker = FlowConsistencyChecker::new(FlowLookupResolver::new(store));

        let report = checker.check(flow_id).await.unwrap();
        assert!(report.is_consistent());
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_status_mismatch_is_warning_but_not_consistent() {
        let store = Arc::new(InMemoryFlowStore::new());
        let flow_id = seed_pair(&store, "completed", "running").await;
        let checker = FlowConsistencyChecker::new(FlowLookupResolver::new(store));

        let report = checker.check(flow_id).await.unwrap();
        assert!(report.issues.is_empty());
        assert!(!report.status_aligned);
        assert!(!report.is_consistent());
        assert!(checker.require_consistent(flow_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_everything_is_hard_issue() {
        let store = Arc::new(InMemoryFlowStore::new());
        let checker = FlowConsistencyChecker::new(FlowLookupResolver::new(store));
        let err = checker.require_consistent(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, FlowError::ConsistencyViolation { .. }));
    }
}
