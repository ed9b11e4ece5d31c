mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use common::fixtures::{new_store, FlowFixture};
use flow_core::config::HealthMonitorConfig;
use flow_core::constants::{journal_sources, FlowType};
use flow_core::error::{FlowError, StoreResult};
use flow_core::health_monitor::{FlowHealthMonitor, RecoveryAction};
use flow_core::models::{ChildFlowPatch, ChildFlowRecord, FlowAsset, MasterFlowRecord, TenantScope};
use flow_core::store::{
    AppliedUnit, FlowMutation, FlowStore, InMemoryFlowStore, MasterFlowQuery, UnitOfWork,
};

fn monitor_config() -> HealthMonitorConfig {
    HealthMonitorConfig {
        enabled: true,
        check_interval_seconds: 1,
        stuck_threshold_minutes: 10,
        max_flows_per_tick: 100,
    }
}

fn monitor(store: &Arc<InMemoryFlowStore>) -> Arc<FlowHealthMonitor> {
    Arc::new(FlowHealthMonitor::new(store.clone(), monitor_config()))
}

#[tokio::test]
async fn test_stuck_active_flow_is_failed_with_descriptive_message() {
    let store = new_store();
    let seeded = FlowFixture::new(FlowType::Discovery)
        .child_status("active")
        .phase("asset_inventory")
        .idle_for(15)
        .seed(&store)
        .await;
    let monitor = monitor(&store);

    let report = monitor.tick().await.unwrap();
    assert_eq!(report.failed_flow_ids, vec![seeded.flow_id]);

    let child = store.child(FlowType::Discovery, seeded.flow_id).unwrap();
    assert_eq!(child.status, "failed");
    let message = child.error_message.unwrap();
    assert!(message.contains("15"), "{message}");
    assert!(message.contains("asset_inventory"), "{message}");

    let journal = store.failure_journal();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].flow_id, seeded.flow_id);
    assert_eq!(journal[0].source, journal_sources::HEALTH_MONITOR);
    assert_eq!(journal[0].diagnostics["previous_status"], "active");

    let stats = monitor.stats();
    assert_eq!(stats.ticks, 1);
    assert_eq!(stats.flows_failed, 1);
    assert!(stats.last_tick_at.is_some());
}

#[tokio::test]
async fn test_second_tick_is_a_no_op() {
    let store = new_store();
    FlowFixture::new(FlowType::Collection).idle_for(30).seed(&store).await;
    let monitor = monitor(&store);

    assert_eq!(monitor.tick().await.unwrap().failed_flow_ids.len(), 1);
    let second = monitor.tick().await.unwrap();
    assert!(second.failed_flow_ids.is_empty());
    assert_eq!(store.failure_journal().len(), 1);
    assert_eq!(monitor.stats().ticks, 2);
}

#[tokio::test]
async fn test_fresh_and_terminal_flows_are_left_alone() {
    let store = new_store();
    let fresh = FlowFixture::new(FlowType::Assessment).idle_for(2).seed(&store).await;
    let done = FlowFixture::new(FlowType::Planning)
        .status("completed")
        .idle_for(120)
        .seed(&store)
        .await;
    let monitor = monitor(&store);

    let report = monitor.tick().await.unwrap();
    assert!(report.failed_flow_ids.is_empty());
    assert_eq!(store.child(FlowType::Assessment, fresh.flow_id).unwrap().status, "running");
    assert_eq!(store.child(FlowType::Planning, done.flow_id).unwrap().status, "completed");
}

#[tokio::test]
async fn test_tick_failure_rolls_back_whole_batch() {
    let store = new_store();
    let first = FlowFixture::new(FlowType::Discovery).idle_for(20).seed(&store).await;
    let second = FlowFixture::new(FlowType::Assessment).idle_for(25).seed(&store).await;
    let monitor = monitor(&store);
    store.fail_next("fail_if_stale");

    let err = monitor.tick().await.unwrap_err();
    assert!(matches!(err, FlowError::Infrastructure(_)));
    assert_eq!(store.child(FlowType::Discovery, first.flow_id).unwrap().status, "running");
    assert_eq!(store.child(FlowType::Assessment, second.flow_id).unwrap().status, "running");
    assert!(store.failure_journal().is_empty());

    let stats = monitor.stats();
    assert_eq!(stats.tick_errors, 1);
    assert_eq!(stats.ticks, 0);

    // Next tick retries and succeeds
    let report = monitor.tick().await.unwrap();
    assert_eq!(report.failed_flow_ids.len(), 2);
}

/// Store whose stale-flow read is immediately followed by the phase engine
/// finishing every flow it returned
struct CompletingStore {
    inner: Arc<InMemoryFlowStore>,
}

#[async_trait]
impl FlowStore for CompletingStore {
    async fn find_master(&self, flow_id: Uuid, scope: Option<&TenantScope>) -> StoreResult<Option<MasterFlowRecord>> {
        self.inner.find_master(flow_id, scope).await
    }

    async fn find_child(&self, id: Uuid, scope: Option<&TenantScope>) -> StoreResult<Option<ChildFlowRecord>> {
        self.inner.find_child(id, scope).await
    }

    async fn find_children_for_master(
        &self,
        master_flow_id: Uuid,
        scope: Option<&TenantScope>,
    ) -> StoreResult<Vec<ChildFlowRecord>> {
        self.inner.find_children_for_master(master_flow_id, scope).await
    }

    async fn list_masters(&self, query: &MasterFlowQuery) -> StoreResult<Vec<MasterFlowRecord>> {
        self.inner.list_masters(query).await
    }

    async fn find_stale_children(
        &self,
        cutoff: DateTime<Utc>,
        exclude_statuses: &[&str],
        limit: usize,
    ) -> StoreResult<Vec<ChildFlowRecord>> {
        let stale = self.inner.find_stale_children(cutoff, exclude_statuses, limit).await?;
        for child in &stale {
            self.inner
                .apply(UnitOfWork::new("phase_engine").with(FlowMutation::UpdateChild {
                    flow_id: child.flow_id,
                    flow_type: child.flow_type,
                    patch: ChildFlowPatch::status("completed"),
                }))
                .await?;
        }
        Ok(stale)
    }

    async fn get_assets_by_flow(&self, flow_id: Uuid) -> StoreResult<Vec<FlowAsset>> {
        self.inner.get_assets_by_flow(flow_id).await
    }

    async fn apply_unit(&self, unit: UnitOfWork) -> StoreResult<AppliedUnit> {
        self.inner.apply_unit(unit).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

#[tokio::test]
async fn test_flow_completed_after_stale_read_is_not_failed() {
    let store = new_store();
    let seeded = FlowFixture::new(FlowType::Discovery)
        .phase("asset_inventory")
        .idle_for(30)
        .seed(&store)
        .await;
    let monitor = Arc::new(FlowHealthMonitor::new(
        Arc::new(CompletingStore { inner: store.clone() }),
        monitor_config(),
    ));

    let report = monitor.tick().await.unwrap();
    assert!(report.failed_flow_ids.is_empty());
    assert_eq!(store.child(FlowType::Discovery, seeded.flow_id).unwrap().status, "completed");
    assert!(store.failure_journal().is_empty());
    assert_eq!(monitor.stats().flows_failed, 0);
}

#[tokio::test]
async fn test_tick_reports_store_outage() {
    let store = new_store();
    store.set_unavailable(true);
    let monitor = monitor(&store);

    assert!(monitor.tick().await.is_err());
    assert_eq!(monitor.stats().tick_errors, 1);
}

#[tokio::test]
async fn test_check_flow_health_is_read_only() {
    let store = new_store();
    let seeded = FlowFixture::new(FlowType::Discovery)
        .phase("data_import")
        .idle_for(45)
        .seed(&store)
        .await;
    let before = store.child(FlowType::Discovery, seeded.flow_id).unwrap();
    let monitor = monitor(&store);

    let health = monitor.check_flow_health(seeded.flow_id).await.unwrap();
    assert!(health.is_stuck);
    assert!(!health.is_terminal);
    assert!(health.minutes_since_update >= 45);
    assert_eq!(health.current_phase.as_deref(), Some("data_import"));
    assert_eq!(store.child(FlowType::Discovery, seeded.flow_id).unwrap(), before);

    let missing = Uuid::new_v4();
    assert_eq!(
        monitor.check_flow_health(missing).await.unwrap_err(),
        FlowError::NotFound { flow_id: missing }
    );
}

#[tokio::test]
async fn test_recover_mark_failed_writes_manual_journal_entry() {
    let store = new_store();
    let seeded = FlowFixture::new(FlowType::Planning)
        .child_status("waiting_for_approval")
        .phase("wave_planning")
        .seed(&store)
        .await;
    let monitor = monitor(&store);

    let outcome = monitor
        .recover_flow(
            seeded.flow_id,
            RecoveryAction::MarkFailed {
                reason: Some("operator abandoned approval".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.previous_status, "waiting_for_approval");
    assert_eq!(outcome.status, "failed");
    assert_eq!(outcome.message, "operator abandoned approval");

    let child = store.child(FlowType::Planning, seeded.flow_id).unwrap();
    assert_eq!(child.status, "failed");
    let journal = store.failure_journal();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].source, journal_sources::MANUAL_RECOVERY);
}

#[tokio::test]
async fn test_recover_unimplemented_action_is_reported() {
    let store = new_store();
    let seeded = FlowFixture::new(FlowType::Planning).seed(&store).await;
    let monitor = monitor(&store);

    for action in ["restart", "rollback", "rewind"] {
        let err = monitor
            .recover_flow(seeded.flow_id, action.parse().unwrap())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FlowError::RecoveryActionNotImplemented {
                action: action.to_string()
            }
        );
    }
    assert_eq!(store.child(FlowType::Planning, seeded.flow_id).unwrap().status, "running");
    assert!(store.failure_journal().is_empty());
}

#[tokio::test]
async fn test_recover_terminal_flow_is_invalid_transition() {
    let store = new_store();
    let seeded = FlowFixture::new(FlowType::Decommission).status("completed").seed(&store).await;
    let monitor = monitor(&store);

    let err = monitor
        .recover_flow(seeded.flow_id, RecoveryAction::MarkFailed { reason: None })
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn test_start_guards_against_double_start_and_stop_drains() {
    let store = new_store();
    let seeded = FlowFixture::new(FlowType::Discovery).idle_for(60).seed(&store).await;
    let monitor = monitor(&store);

    assert!(monitor.start());
    assert!(!monitor.start());
    assert!(monitor.is_running());

    // The loop ticks immediately on start
    tokio::time::timeout(Duration::from_secs(5), async {
        while monitor.stats().ticks == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first tick did not run");

    monitor.stop().await;
    assert!(!monitor.is_running());
    assert_eq!(store.child(FlowType::Discovery, seeded.flow_id).unwrap().status, "failed");

    // Restartable after stop
    assert!(monitor.start());
    monitor.stop().await;
}

#[tokio::test]
async fn test_disabled_monitor_does_not_start() {
    let store = new_store();
    let monitor = Arc::new(FlowHealthMonitor::new(
        store,
        HealthMonitorConfig {
            enabled: false,
            ..monitor_config()
        },
    ));

    assert!(!monitor.start());
    assert!(!monitor.is_running());
    monitor.stop().await;
}
