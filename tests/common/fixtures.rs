use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use flow_core::constants::FlowType;
use flow_core::models::{ChildFlowRecord, FlowAsset, MasterFlowRecord, NewChildFlow, NewMasterFlow};
use flow_core::models::AssetReadiness;
use flow_core::store::{FlowMutation, FlowStore, InMemoryFlowStore, UnitOfWork};

/// Builder for a master/child pair seeded into an in-memory store
#[derive(Debug, Clone)]
pub struct FlowFixture {
    pub flow_type: FlowType,
    pub tenant_id: Uuid,
    pub engagement_id: Uuid,
    pub master_status: Option<String>,
    pub child_status: Option<String>,
    pub current_phase: Option<String>,
    pub idle_minutes: i64,
    pub extra_children: usize,
}

impl FlowFixture {
    pub fn new(flow_type: FlowType) -> Self {
        Self {
            flow_type,
            tenant_id: Uuid::new_v4(),
            engagement_id: Uuid::new_v4(),
            master_status: Some("running".to_string()),
            child_status: Some("running".to_string()),
            current_phase: None,
            idle_minutes: 0,
            extra_children: 0,
        }
    }

    /// Master and child both in `status`; a record opted out with `without_*` stays out
    pub fn status(mut self, status: &str) -> Self {
        if self.master_status.is_some() {
            self.master_status = Some(status.to_string());
        }
        if self.child_status.is_some() {
            self.child_status = Some(status.to_string());
        }
        self
    }

    pub fn master_status(mut self, status: &str) -> Self {
        self.master_status = Some(status.to_string());
        self
    }

    pub fn child_status(mut self, status: &str) -> Self {
        self.child_status = Some(status.to_string());
        self
    }

    pub fn without_master(mut self) -> Self {
        self.master_status = None;
        self
    }

    pub fn without_child(mut self) -> Self {
        self.child_status = None;
        self
    }

    pub fn phase(mut self, phase: &str) -> Self {
        self.current_phase = Some(phase.to_string());
        self
    }

    /// Age the child's `updated_at`
    pub fn idle_for(mut self, minutes: i64) -> Self {
        self.idle_minutes = minutes;
        self
    }

    /// Additional children of other flow types linked through `master_flow_id`
    pub fn extra_children(mut self, count: usize) -> Self {
        self.extra_children = count;
        self
    }

    pub async fn seed(self, store: &InMemoryFlowStore) -> SeededFlow {
        let now = Utc::now();
        let flow_id = Uuid::new_v4();
        let mut unit = UnitOfWork::new("fixture");

        let master = self.master_status.as_ref().map(|status| {
            let mut master = NewMasterFlow::new(self.flow_type, "fixture flow", self.tenant_id, self.engagement_id)
                .with_flow_id(flow_id)
                .into_record(now);
            master.flow_status = status.clone();
            master.current_phase = self.current_phase.clone();
            master
        });

        let child = self.child_status.as_ref().map(|status| {
            let mut new_child = NewChildFlow::new(self.flow_type, self.tenant_id, self.engagement_id);
            new_child.flow_id = Some(flow_id);
            new_child.master_flow_id = master.as_ref().map(|m| m.flow_id);
            new_child.current_phase = self.current_phase.clone();
            let mut child = new_child.into_record(now);
            child.status = status.clone();
            child.updated_at = now - Duration::minutes(self.idle_minutes);
            child
        });

        let mut extra = Vec::new();
        for index in 0..self.extra_children {
            let flow_type = FlowType::ALL[(index + 1) % FlowType::ALL.len()];
            let mut new_child = NewChildFlow::new(flow_type, self.tenant_id, self.engagement_id);
            new_child.master_flow_id = Some(flow_id);
            extra.push(new_child.into_record(now + Duration::milliseconds(index as i64 + 1)));
        }

        if let Some(master) = &master {
            unit.push(FlowMutation::InsertMaster(master.clone()));
        }
        if let Some(child) = &child {
            unit.push(FlowMutation::InsertChild(child.clone()));
        }
        for child in &extra {
            unit.push(FlowMutation::InsertChild(child.clone()));
        }
        store.apply(unit).await.expect("seeding fixture");

        SeededFlow {
            flow_id,
            master,
            child,
            extra_children: extra,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeededFlow {
    pub flow_id: Uuid,
    pub master: Option<MasterFlowRecord>,
    pub child: Option<ChildFlowRecord>,
    pub extra_children: Vec<ChildFlowRecord>,
}

impl SeededFlow {
    pub fn child(&self) -> &ChildFlowRecord {
        self.child.as_ref().expect("fixture seeded without child")
    }
}

pub fn new_store() -> Arc<InMemoryFlowStore> {
    Arc::new(InMemoryFlowStore::new())
}

pub fn seed_assets(store: &InMemoryFlowStore, flow_id: Uuid, count: usize) -> Vec<Uuid> {
    (0..count)
        .map(|index| {
            let asset_id = Uuid::new_v4();
            store.insert_asset(FlowAsset {
                asset_id,
                flow_id,
                name: format!("server-{index:03}"),
                current_phase: Some("tech_debt_assessment".to_string()),
                assessment_flow_id: None,
                readiness: AssetReadiness::NotReady,
            });
            asset_id
        })
        .collect()
}
