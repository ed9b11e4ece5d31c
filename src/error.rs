//! Error types for the flow core.
//!
//! `FlowError` is what callers of the resolver, checker, lifecycle service and
//! health monitor see. `StoreError` is the persistence-layer failure that gets
//! wrapped into `FlowError::Infrastructure` on its way out.

use thiserror::Error;
use uuid::Uuid;

/// Failures raised by a [`FlowStore`](crate::store::FlowStore) implementation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store operation timed out: {0}")]
    Timeout(String),
    /// A patch inside a unit of work matched no row; the whole unit is rolled back
    #[error("No {entity} row found for {id}")]
    RowNotFound { entity: &'static str, id: Uuid },
    #[error("Conflicting write: {0}")]
    Conflict(String),
    #[error("Failed to decode {entity} row: {reason}")]
    Decode { entity: &'static str, reason: String },
    #[error("Migration failed: {0}")]
    Migration(String),
    /// Raised by the in-memory store when a test arms a failure
    #[error("Injected failure: {0}")]
    InjectedFailure(String),
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => StoreError::Timeout("connection pool timed out".to_string()),
            sqlx::Error::PoolClosed => StoreError::Unavailable("connection pool closed".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            sqlx::Error::Io(e) => StoreError::Unavailable(format!("io: {e}")),
            sqlx::Error::ColumnDecode { index, source } => StoreError::Decode {
                entity: "column",
                reason: format!("{index}: {source}"),
            },
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Migration(err.to_string())
    }
}

impl StoreError {
    /// Convert for a caller operating on `flow_id`; a patch that matched no row means
    /// the flow disappeared underneath the operation.
    pub fn for_flow(self, flow_id: Uuid) -> FlowError {
        match self {
            StoreError::RowNotFound { .. } => FlowError::NotFound { flow_id },
            other => FlowError::Infrastructure(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the orchestration core
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowError {
    /// The identifier resolves to neither a master nor a child record
    #[error("Flow {flow_id} not found")]
    NotFound { flow_id: Uuid },

    /// The flow's current status does not permit the requested operation
    #[error(
        "Cannot {operation} flow {flow_id}: current status is '{current_status}', expected one of {allowed:?}"
    )]
    InvalidStateTransition {
        flow_id: Uuid,
        operation: &'static str,
        current_status: String,
        allowed: Vec<String>,
    },

    /// Master and child disagree in a way that needs manual review
    #[error("Flow {flow_id} is inconsistent: {}", .issues.join("; "))]
    ConsistencyViolation { flow_id: Uuid, issues: Vec<String> },

    /// Status changes committed but the cascade did not fully complete
    #[error("Partial cascade failure for flow {flow_id} ({records_updated} records updated): {reason}")]
    PartialCascadeFailure {
        flow_id: Uuid,
        records_updated: usize,
        reason: String,
    },

    #[error("Infrastructure error: {0}")]
    Infrastructure(#[from] StoreError),

    #[error("Failed to dispatch phase '{phase}' for flow {flow_id}: {reason}")]
    DispatchFailed {
        flow_id: Uuid,
        phase: String,
        reason: String,
    },

    #[error("Recovery action '{action}' is not implemented")]
    RecoveryActionNotImplemented { action: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl FlowError {
    /// NotFound and InvalidStateTransition are expected outcomes that callers map to
    /// responses; everything else indicates a fault.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            FlowError::NotFound { .. } | FlowError::InvalidStateTransition { .. }
        )
    }

    pub fn invalid_transition(
        flow_id: Uuid,
        operation: &'static str,
        current_status: impl Into<String>,
        allowed: &[&str],
    ) -> Self {
        FlowError::InvalidStateTransition {
            flow_id,
            operation,
            current_status: current_status.into(),
            allowed: allowed.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for FlowError {
    fn from(err: sqlx::Error) -> Self {
        FlowError::Infrastructure(err.into())
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(error: serde_json::Error) -> Self {
        FlowError::InvalidInput(format!("JSON serialization error: {error}"))
    }
}

pub type FlowResult<T> = Result<T, FlowError>;
