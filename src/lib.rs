#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Flow Core
//!
//! Orchestration and consistency core for long-lived, multi-phase workflows
//! (discovery, assessment, collection, planning, decommission).
//!
//! ## Overview
//!
//! Every workflow instance is tracked by two records: a **master flow** that owns the
//! lifecycle and looks the same for every flow type, and a **child flow** holding the
//! type-specific operational state. The two are written by different parts of the
//! platform and can drift apart. This crate keeps them in agreement:
//!
//! - resolving an identifier that may name either record
//! - reporting drift between a master and its child
//! - lifecycle operations that update both records in one unit of work
//! - phase ordering, legacy phase-name aliases and progress calculation
//! - a background sweep that fails flows which stopped making progress
//!
//! ## Module Organization
//!
//! - [`store`] - Record store trait, PostgreSQL and in-memory implementations
//! - [`models`] - Master/child records, audit and journal rows, [`FlowView`](models::FlowView)
//! - [`registry`] - Master registry and child repository CRUD
//! - [`resolver`] - Identifier resolution across both records
//! - [`consistency`] - Master/child drift reports
//! - [`lifecycle`] - Pause, resume, retry, cancel, archive, soft delete, phase hand-off
//! - [`phases`] - Per-type phase ordering and progress
//! - [`state_machine`] - Flow states and the transition table
//! - [`health_monitor`] - Stuck-flow detection and recovery actions
//! - [`config`] - Layered YAML/environment configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flow_core::config::ConfigManager;
//! use flow_core::lifecycle::FlowLifecycleService;
//! use flow_core::store::{FlowStore, PgFlowStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let store: Arc<dyn FlowStore> = Arc::new(PgFlowStore::connect(&manager.config().database).await?);
//! let lifecycle = FlowLifecycleService::new(store, manager.config().lifecycle.clone());
//!
//! for flow in lifecycle.list_active(None).await? {
//!     println!("{} {} {}", flow.flow_id, flow.flow_type, flow.flow_status);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Unit and integration tests run against [`InMemoryFlowStore`](store::InMemoryFlowStore);
//! no database is needed:
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests
//! ```

pub mod config;
pub mod consistency;
pub mod constants;
pub mod error;
pub mod health_monitor;
pub mod lifecycle;
pub mod logging;
pub mod models;
pub mod phases;
pub mod registry;
pub mod resolver;
pub mod state_machine;
pub mod store;

pub use config::{ConfigManager, DatabaseConfig, FlowCoreConfig, HealthMonitorConfig, LifecycleConfig};
pub use consistency::{FlowConsistencyChecker, FlowConsistencyReport};
pub use constants::{status, status_groups, statuses_equivalent, FlowType};
pub use error::{FlowError, FlowResult, StoreError, StoreResult};
pub use health_monitor::{FlowHealth, FlowHealthMonitor, RecoveryAction, TickReport};
pub use lifecycle::{
    CascadeDeletionOutcome, DeletionRequest, DispatchTrigger, FlowLifecycleService, LifecycleOutcome,
    PhaseDispatch, PhaseDispatcher,
};
pub use models::{ChildFlowRecord, FlowView, MasterFlowRecord, TenantScope};
pub use phases::PhaseTransitionPlanner;
pub use registry::{ChildFlowRepository, MasterFlowRegistry, PhaseProjection};
pub use resolver::FlowLookupResolver;
pub use state_machine::{FlowEvent, FlowState};
pub use store::{AppliedUnit, FlowMutation, FlowStore, InMemoryFlowStore, UnitOfWork};
