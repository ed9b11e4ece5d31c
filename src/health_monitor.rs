//! # Flow Health Monitor
//!
//! Background sweep that fails flows which stopped making progress.
//!
//! Each tick selects non-terminal child records whose `updated_at` is older than the
//! stuck threshold, marks them `failed` with a human-readable reason, and appends a
//! failure journal entry per flow. The staleness predicate is checked again at write
//! time, so a flow that advanced or finished after the read is left untouched. All of
//! a tick's writes commit as one unit; when the commit fails the tick is logged and
//! the next tick picks the same flows up again. Already-failed records no longer
//! match the filter, so repeated ticks are harmless.
//!
//! One monitor runs per deployment. [`FlowHealthMonitor::start`] refuses to spawn a
//! second loop and [`FlowHealthMonitor::stop`] cancels cooperatively: cancellation is
//! observed between ticks, so a tick in flight finishes before `stop` returns.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::HealthMonitorConfig;
use crate::constants::{journal_sources, status, status_groups};
use crate::error::{FlowError, FlowResult};
use crate::models::{ChildFlowPatch, ChildFlowRecord, FailureJournalEntry};
use crate::resolver::FlowLookupResolver;
use crate::state_machine::{self, FlowEvent};
use crate::store::{FlowMutation, FlowStore, UnitOfWork};

/// Operator recovery actions accepted by [`FlowHealthMonitor::recover_flow`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Apply the same terminal transition the sweep applies
    MarkFailed { reason: Option<String> },
    Restart,
    Rollback,
    Other(String),
}

impl RecoveryAction {
    pub fn name(&self) -> &str {
        match self {
            Self::MarkFailed { .. } => "mark_failed",
            Self::Restart => "restart",
            Self::Rollback => "rollback",
            Self::Other(name) => name,
        }
    }
}

impl FromStr for RecoveryAction {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "mark_failed" => Self::MarkFailed { reason: None },
            "restart" => Self::Restart,
            "rollback" => Self::Rollback,
            other => Self::Other(other.to_string()),
        })
    }
}

/// Read-only liveness verdict for one flow
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowHealth {
    pub flow_id: Uuid,
    pub child_flow_id: Uuid,
    pub status: String,
    pub current_phase: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub minutes_since_update: i64,
    pub is_terminal: bool,
    pub is_stuck: bool,
}

/// Flows failed by one tick
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub failed_flow_ids: Vec<Uuid>,
    pub ticked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryOutcome {
    pub flow_id: Uuid,
    pub action: String,
    pub previous_status: String,
    pub status: String,
    pub message: String,
}

/// Runtime statistics for the monitor
#[derive(Debug, Default)]
pub struct HealthMonitorStats {
    pub ticks: AtomicU64,
    pub flows_failed: AtomicU64,
    pub tick_errors: AtomicU64,
    pub last_tick_at: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthMonitorSnapshot {
    pub is_running: bool,
    pub ticks: u64,
    pub flows_failed: u64,
    pub tick_errors: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
}

pub struct FlowHealthMonitor {
    monitor_id: Uuid,
    store: Arc<dyn FlowStore>,
    resolver: FlowLookupResolver,
    config: HealthMonitorConfig,
    is_running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    stats: HealthMonitorStats,
}

impl std::fmt::Debug for FlowHealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowHealthMonitor")
            .field("monitor_id", &self.monitor_id)
            .field("config", &self.config)
            .field("is_running", &self.is_running.load(Ordering::Relaxed))
            .finish()
    }
}

impl FlowHealthMonitor {
    pub fn new(store: Arc<dyn FlowStore>, config: HealthMonitorConfig) -> Self {
        let monitor_id = Uuid::new_v4();
        info!(
            monitor_id = %monitor_id,
            check_interval = ?config.check_interval(),
            stuck_threshold_minutes = config.stuck_threshold_minutes,
            max_flows_per_tick = config.max_flows_per_tick,
            "Creating FlowHealthMonitor"
        );

        Self {
            monitor_id,
            resolver: FlowLookupResolver::new(store.clone()),
            store,
            config,
            is_running: AtomicBool::new(false),
            cancel: Mutex::new(None),
            handle: Mutex::new(None),
            stats: HealthMonitorStats::default(),
        }
    }

    pub fn monitor_id(&self) -> Uuid {
        self.monitor_id
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Spawn the sweep loop. Returns `false` without spawning when the monitor is
    /// disabled or already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.config.enabled {
            info!(monitor_id = %self.monitor_id, "FlowHealthMonitor disabled by configuration");
            return false;
        }
        if self.is_running.swap(true, Ordering::AcqRel) {
            warn!(monitor_id = %self.monitor_id, "FlowHealthMonitor already running, ignoring start");
            return false;
        }

        let token = CancellationToken::new();
        *self.cancel.lock() = Some(token.clone());

        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _running = RunningGuard(&monitor.is_running);
            let interval = monitor.config.check_interval();
            loop {
                if token.is_cancelled() {
                    break;
                }
                if let Err(e) = monitor.tick().await {
                    debug!(monitor_id = %monitor.monitor_id, error = %e, "Tick failed, retrying next interval");
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!(monitor_id = %monitor.monitor_id, "Health monitor loop exited");
        });
        *self.handle.lock() = Some(handle);

        info!(monitor_id = %self.monitor_id, "🩺 HEALTH_MONITOR: Started");
        true
    }

    /// Cancel the loop and wait for an in-flight tick to finish
    pub async fn stop(&self) {
        if self.handle.lock().is_none() {
            return;
        }

        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(monitor_id = %self.monitor_id, error = %e, "Health monitor task ended abnormally");
            }
        }

        self.is_running.store(false, Ordering::Release);
        info!(monitor_id = %self.monitor_id, "🩺 HEALTH_MONITOR: Stopped");
    }

    /// Run one sweep now
    pub async fn tick(&self) -> FlowResult<TickReport> {
        let now = Utc::now();
        let cutoff = now - self.config.stuck_threshold();

        let stale = match self
            .store
            .find_stale_children(cutoff, status_groups::CHILD_TERMINAL_STATUSES, self.config.max_flows_per_tick)
            .await
        {
            Ok(stale) => stale,
            Err(e) => return Err(self.record_tick_error(e.into())),
        };

        let terminal_statuses: Vec<String> = status_groups::CHILD_TERMINAL_STATUSES
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        let mut unit = UnitOfWork::new("health_monitor_tick");
        for child in &stale {
            let (patch, entry) = failure_writes(child, now, journal_sources::HEALTH_MONITOR, None);
            // Re-checked at write time: a child that progressed or finished since the
            // read is skipped
            unit.push(FlowMutation::FailIfStale {
                flow_id: child.flow_id,
                flow_type: child.flow_type,
                cutoff,
                terminal_statuses: terminal_statuses.clone(),
                patch,
                entry,
            });
        }

        let mut failed_flow_ids = Vec::with_capacity(stale.len());
        if !unit.is_empty() {
            let applied = match self.store.apply_unit(unit).await {
                Ok(applied) => applied,
                Err(e) => return Err(self.record_tick_error(e.into())),
            };
            for (index, child) in stale.iter().enumerate() {
                if !applied.wrote(index) {
                    debug!(
                        monitor_id = %self.monitor_id,
                        flow_id = %child.flow_id,
                        "Flow changed since it was read as stale, skipped"
                    );
                    continue;
                }
                warn!(
                    monitor_id = %self.monitor_id,
                    flow_id = %child.flow_id,
                    flow_type = %child.flow_type,
                    phase = child.current_phase.as_deref().unwrap_or("unknown"),
                    previous_status = %child.status,
                    "⚠️ HEALTH_MONITOR: Stuck flow marked failed"
                );
                failed_flow_ids.push(child.flow_id);
            }
        }

        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        self.stats
            .flows_failed
            .fetch_add(failed_flow_ids.len() as u64, Ordering::Relaxed);
        *self.stats.last_tick_at.lock() = Some(now);

        debug!(
            monitor_id = %self.monitor_id,
            failed = failed_flow_ids.len(),
            "Health monitor tick complete"
        );
        Ok(TickReport {
            failed_flow_ids,
            ticked_at: Some(now),
        })
    }

    /// Liveness verdict for one flow; never writes
    pub async fn check_flow_health(&self, flow_id: Uuid) -> FlowResult<FlowHealth> {
        let child = self
            .resolver
            .resolve_child(flow_id)
            .await?
            .ok_or(FlowError::NotFound { flow_id })?;

        let now = Utc::now();
        let is_terminal = status_groups::CHILD_TERMINAL_STATUSES.contains(&child.status.as_str());
        Ok(FlowHealth {
            flow_id,
            child_flow_id: child.flow_id,
            minutes_since_update: (now - child.updated_at).num_minutes(),
            is_stuck: !is_terminal && child.updated_at < now - self.config.stuck_threshold(),
            is_terminal,
            status: child.status,
            current_phase: child.current_phase,
            updated_at: child.updated_at,
        })
    }

    /// Apply an operator recovery action.
    ///
    /// Only `mark_failed` is implemented; any other action is reported as not
    /// implemented instead of being silently ignored.
    pub async fn recover_flow(&self, flow_id: Uuid, action: RecoveryAction) -> FlowResult<RecoveryOutcome> {
        let reason = match action {
            RecoveryAction::MarkFailed { reason } => reason,
            other => {
                warn!(flow_id = %flow_id, action = other.name(), "Recovery action not implemented");
                return Err(FlowError::RecoveryActionNotImplemented {
                    action: other.name().to_string(),
                });
            }
        };

        let child = self
            .resolver
            .resolve_child(flow_id)
            .await?
            .ok_or(FlowError::NotFound { flow_id })?;
        state_machine::transition(flow_id, &child.status, FlowEvent::Fail)?;

        let now = Utc::now();
        let (patch, entry) = failure_writes(&child, now, journal_sources::MANUAL_RECOVERY, reason);
        let message = entry.message.clone();
        self.store
            .apply(
                UnitOfWork::new("recover_flow")
                    .with(FlowMutation::UpdateChild {
                        flow_id: child.flow_id,
                        flow_type: child.flow_type,
                        patch,
                    })
                    .with(FlowMutation::RecordFailure(entry)),
            )
            .await
            .map_err(|e| e.for_flow(flow_id))?;

        info!(
            flow_id = %flow_id,
            child_flow_id = %child.flow_id,
            previous_status = %child.status,
            "🩺 HEALTH_MONITOR: Flow marked failed by recovery action"
        );
        Ok(RecoveryOutcome {
            flow_id,
            action: "mark_failed".to_string(),
            previous_status: child.status,
            status: status::FAILED.to_string(),
            message,
        })
    }

    pub fn stats(&self) -> HealthMonitorSnapshot {
        HealthMonitorSnapshot {
            is_running: self.is_running(),
            ticks: self.stats.ticks.load(Ordering::Relaxed),
            flows_failed: self.stats.flows_failed.load(Ordering::Relaxed),
            tick_errors: self.stats.tick_errors.load(Ordering::Relaxed),
            last_tick_at: *self.stats.last_tick_at.lock(),
        }
    }

    fn record_tick_error(&self, err: FlowError) -> FlowError {
        self.stats.tick_errors.fetch_add(1, Ordering::Relaxed);
        error!(
            monitor_id = %self.monitor_id,
            error = %err,
            "❌ HEALTH_MONITOR: Tick failed, rolled back; retrying next interval"
        );
        err
    }
}

/// Clears the running flag when the loop exits, including by panic
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Child patch and journal entry that move `child` to failed
fn failure_writes(
    child: &ChildFlowRecord,
    now: DateTime<Utc>,
    source: &str,
    reason: Option<String>,
) -> (ChildFlowPatch, FailureJournalEntry) {
    let phase = child.current_phase.as_deref().unwrap_or("unknown");
    let minutes_idle = (now - child.updated_at).num_minutes();
    let message = reason.unwrap_or_else(|| format!("No progress for {minutes_idle} minutes in phase {phase}"));
    let diagnostics = json!({
        "source": source,
        "previous_status": child.status,
        "phase": phase,
        "progress_percentage": child.progress_percentage,
        "last_updated_at": child.updated_at.to_rfc3339(),
        "minutes_idle": minutes_idle,
        "master_flow_id": child.master_flow_id,
    });

    let patch = ChildFlowPatch {
        status: Some(status::FAILED.to_string()),
        error_message: Some(Some(message.clone())),
        error_details: Some(Some(diagnostics.clone())),
        ..Default::default()
    };
    let entry = FailureJournalEntry {
        entry_id: Uuid::new_v4(),
        flow_id: child.master_flow_id.unwrap_or(child.flow_id),
        flow_type: child.flow_type,
        tenant_id: child.tenant_id,
        source: source.to_string(),
        phase: child.current_phase.clone(),
        message,
        diagnostics,
        recorded_at: now,
    };
    (patch, entry)
}
