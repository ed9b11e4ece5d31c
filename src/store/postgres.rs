//! PostgreSQL flow store.
//!
//! Queries are runtime-checked (`query_as` + `FromRow` row structs) so the crate
//! builds without a live database. Each [`UnitOfWork`] runs inside one transaction;
//! a patch that matches no row aborts and rolls the whole unit back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgConnection, PgPool, Postgres, QueryBuilder};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use super::{AppliedUnit, FlowMutation, FlowStore, MasterFlowQuery, UnitOfWork};
use crate::config::DatabaseConfig;
use crate::constants::FlowType;
use crate::error::{StoreError, StoreResult};
use crate::models::{
    ChildFlowPatch, ChildFlowRecord, FailureJournalEntry, FlowAsset, MasterFlowPatch, MasterFlowRecord,
    TenantScope,
};

const MASTER_COLUMNS: &str = "flow_id, flow_type, flow_status, flow_name, tenant_id, engagement_id, \
     created_at, updated_at, configuration, current_phase, parent_flow_id, flow_metadata";

const CHILD_COLUMNS: &str = "flow_id, master_flow_id, tenant_id, engagement_id, status, current_phase, \
     next_phase, progress_percentage, phase_state, error_message, error_details, created_at, updated_at";

#[derive(Debug, FromRow)]
struct MasterFlowRow {
    flow_id: Uuid,
    flow_type: String,
    flow_status: String,
    flow_name: String,
    tenant_id: Uuid,
    engagement_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    configuration: Value,
    current_phase: Option<String>,
    parent_flow_id: Option<Uuid>,
    flow_metadata: Value,
}

impl TryFrom<MasterFlowRow> for MasterFlowRecord {
    type Error = StoreError;

    fn try_from(row: MasterFlowRow) -> Result<Self, Self::Error> {
        let flow_type = row.flow_type.parse::<FlowType>().map_err(|reason| StoreError::Decode {
            entity: "master_flow",
            reason,
        })?;
        Ok(MasterFlowRecord {
            flow_id: row.flow_id,
            flow_type,
            flow_status: row.flow_status,
            flow_name: row.flow_name,
            tenant_id: row.tenant_id,
            engagement_id: row.engagement_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            configuration: row.configuration,
            current_phase: row.current_phase,
            parent_flow_id: row.parent_flow_id,
            flow_metadata: row.flow_metadata,
        })
    }
}

#[derive(Debug, FromRow)]
struct ChildFlowRow {
    flow_type: String,
    flow_id: Uuid,
    master_flow_id: Option<Uuid>,
    tenant_id: Uuid,
    engagement_id: Uuid,
    status: String,
    current_phase: Option<String>,
    next_phase: Option<String>,
    progress_percentage: f64,
    phase_state: Value,
    error_message: Option<String>,
    error_details: Option<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ChildFlowRow> for ChildFlowRecord {
    type Error = StoreError;

    fn try_from(row: ChildFlowRow) -> Result<Self, Self::Error> {
        let flow_type = row.flow_type.parse::<FlowType>().map_err(|reason| StoreError::Decode {
            entity: "child_flow",
            reason,
        })?;
        Ok(ChildFlowRecord {
            flow_id: row.flow_id,
            master_flow_id: row.master_flow_id,
            flow_type,
            tenant_id: row.tenant_id,
            engagement_id: row.engagement_id,
            status: row.status,
            current_phase: row.current_phase,
            next_phase: row.next_phase,
            progress_percentage: row.progress_percentage,
            phase_state: row.phase_state,
            error_message: row.error_message,
            error_details: row.error_details,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AssetRow {
    asset_id: Uuid,
    flow_id: Uuid,
    name: String,
    current_phase: Option<String>,
    assessment_flow_id: Option<Uuid>,
    readiness: String,
}

impl TryFrom<AssetRow> for FlowAsset {
    type Error = StoreError;

    fn try_from(row: AssetRow) -> Result<Self, Self::Error> {
        let readiness = row
            .readiness
            .parse()
            .map_err(|reason| StoreError::Decode { entity: "asset", reason })?;
        Ok(FlowAsset {
            asset_id: row.asset_id,
            flow_id: row.flow_id,
            name: row.name,
            current_phase: row.current_phase,
            assessment_flow_id: row.assessment_flow_id,
            readiness,
        })
    }
}

/// `SELECT` over every child table, tagging rows with their flow type
fn child_union_sql(predicate: &str) -> String {
    FlowType::ALL
        .iter()
        .map(|flow_type| {
            format!(
                "SELECT '{}' AS flow_type, {CHILD_COLUMNS} FROM {} WHERE {predicate}",
                flow_type.as_str(),
                flow_type.child_table()
            )
        })
        .collect::<Vec<_>>()
        .join(" UNION ALL ")
}

const SCOPE_PREDICATE: &str = "($2::uuid IS NULL OR tenant_id = $2) AND ($3::uuid IS NULL OR engagement_id = $3)";

fn scope_binds(scope: Option<&TenantScope>) -> (Option<Uuid>, Option<Uuid>) {
    (scope.map(|s| s.tenant_id), scope.and_then(|s| s.engagement_id))
}

fn collect_rows<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// [`FlowStore`] backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgFlowStore {
    pool: PgPool,
}

impl PgFlowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a connection pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            acquire_timeout_seconds = config.acquire_timeout_seconds,
            "💾 DATABASE: Flow store connection pool established"
        );

        Ok(Self { pool })
    }

    /// Apply the reference schema shipped in `migrations/`
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn apply_mutation(conn: &mut PgConnection, mutation: &FlowMutation) -> StoreResult<usize> {
        let affected = match mutation {
            FlowMutation::InsertMaster(m) => sqlx::query(
                r#"
                INSERT INTO master_flows
                (flow_id, flow_type, flow_status, flow_name, tenant_id, engagement_id,
                 created_at, updated_at, configuration, current_phase, parent_flow_id, flow_metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(m.flow_id)
            .bind(m.flow_type.as_str())
            .bind(&m.flow_status)
            .bind(&m.flow_name)
            .bind(m.tenant_id)
            .bind(m.engagement_id)
            .bind(m.created_at)
            .bind(m.updated_at)
            .bind(&m.configuration)
            .bind(&m.current_phase)
            .bind(m.parent_flow_id)
            .bind(&m.flow_metadata)
            .execute(&mut *conn)
            .await?
            .rows_affected(),

            FlowMutation::InsertChild(c) => {
                let sql = format!(
                    "INSERT INTO {} ({CHILD_COLUMNS}) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
                    c.flow_type.child_table()
                );
                sqlx::query(&sql)
                    .bind(c.flow_id)
                    .bind(c.master_flow_id)
                    .bind(c.tenant_id)
                    .bind(c.engagement_id)
                    .bind(&c.status)
                    .bind(&c.current_phase)
                    .bind(&c.next_phase)
                    .bind(c.progress_percentage)
                    .bind(&c.phase_state)
                    .bind(&c.error_message)
                    .bind(&c.error_details)
                    .bind(c.created_at)
                    .bind(c.updated_at)
                    .execute(&mut *conn)
                    .await?
                    .rows_affected()
            }

            FlowMutation::UpdateMaster { flow_id, patch } => {
                let affected = Self::update_master(conn, *flow_id, patch).await?;
                if affected == 0 {
                    return Err(StoreError::RowNotFound {
                        entity: "master_flow",
                        id: *flow_id,
                    });
                }
                affected
            }

            FlowMutation::UpdateChild {
                flow_id,
                flow_type,
                patch,
            } => {
                let affected = Self::update_child(conn, *flow_id, *flow_type, patch, None).await?;
                if affected == 0 {
                    return Err(StoreError::RowNotFound {
                        entity: "child_flow",
                        id: *flow_id,
                    });
                }
                affected
            }

            FlowMutation::MarkAssetReady {
                asset_id,
                current_phase,
                downstream_flow_id,
            } => {
                let affected = sqlx::query(
                    r#"
                    UPDATE assets
                    SET current_phase = $2, assessment_flow_id = $3, readiness = 'ready', updated_at = NOW()
                    WHERE asset_id = $1
                    "#,
                )
                .bind(asset_id)
                .bind(current_phase)
                .bind(downstream_flow_id)
                .execute(&mut *conn)
                .await?
                .rows_affected();
                if affected == 0 {
                    return Err(StoreError::RowNotFound {
                        entity: "asset",
                        id: *asset_id,
                    });
                }
                affected
            }

            FlowMutation::AppendDeletionAudit(a) => sqlx::query(
                r#"
                INSERT INTO flow_deletion_audits
                (audit_id, flow_id, tenant_id, engagement_id, user_id, deletion_type, reason,
                 data_deleted, deletion_impact, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(a.audit_id)
            .bind(a.flow_id)
            .bind(a.tenant_id)
            .bind(a.engagement_id)
            .bind(&a.user_id)
            .bind(&a.deletion_type)
            .bind(&a.reason)
            .bind(&a.data_deleted)
            .bind(&a.deletion_impact)
            .bind(a.created_at)
            .execute(&mut *conn)
            .await?
            .rows_affected(),

            FlowMutation::RecordFailure(entry) => Self::insert_failure(conn, entry).await?,

            FlowMutation::FailIfStale {
                flow_id,
                flow_type,
                cutoff,
                terminal_statuses,
                patch,
                entry,
            } => {
                let guard = StaleGuard {
                    cutoff: *cutoff,
                    terminal_statuses,
                };
                let affected = Self::update_child(conn, *flow_id, *flow_type, patch, Some(guard)).await?;
                if affected == 0 {
                    0
                } else {
                    affected + Self::insert_failure(conn, entry).await?
                }
            }
        };

        Ok(affected as usize)
    }

    async fn insert_failure(conn: &mut PgConnection, e: &FailureJournalEntry) -> StoreResult<u64> {
        Ok(sqlx::query(
            r#"
            INSERT INTO flow_failure_journal
            (entry_id, flow_id, flow_type, tenant_id, source, phase, message, diagnostics, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(e.entry_id)
        .bind(e.flow_id)
        .bind(e.flow_type.as_str())
        .bind(e.tenant_id)
        .bind(&e.source)
        .bind(&e.phase)
        .bind(&e.message)
        .bind(&e.diagnostics)
        .bind(e.recorded_at)
        .execute(&mut *conn)
        .await?
        .rows_affected())
    }

    async fn update_master(conn: &mut PgConnection, flow_id: Uuid, patch: &MasterFlowPatch) -> StoreResult<u64> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE master_flows SET updated_at = NOW()");
        if let Some(flow_status) = &patch.flow_status {
            qb.push(", flow_status = ").push_bind(flow_status.clone());
        }
        if let Some(current_phase) = &patch.current_phase {
            qb.push(", current_phase = ").push_bind(current_phase.clone());
        }
        if let Some(flow_metadata) = &patch.flow_metadata {
            qb.push(", flow_metadata = ").push_bind(flow_metadata.clone());
        }
        qb.push(" WHERE flow_id = ").push_bind(flow_id);

        Ok(qb.build().execute(&mut *conn).await?.rows_affected())
    }

    async fn update_child(
        conn: &mut PgConnection,
        flow_id: Uuid,
        flow_type: FlowType,
        patch: &ChildFlowPatch,
        guard: Option<StaleGuard<'_>>,
    ) -> StoreResult<u64> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("UPDATE {} SET updated_at = NOW()", flow_type.child_table()));
        if let Some(status) = &patch.status {
            qb.push(", status = ").push_bind(status.clone());
        }
        if let Some(master_flow_id) = patch.master_flow_id {
            qb.push(", master_flow_id = ").push_bind(master_flow_id);
        }
        if let Some(current_phase) = &patch.current_phase {
            qb.push(", current_phase = ").push_bind(current_phase.clone());
        }
        if let Some(next_phase) = &patch.next_phase {
            qb.push(", next_phase = ").push_bind(next_phase.clone());
        }
        if let Some(progress) = patch.progress_percentage {
            qb.push(", progress_percentage = ").push_bind(progress);
        }
        if let Some(phase_state) = &patch.phase_state {
            qb.push(", phase_state = ").push_bind(phase_state.clone());
        }
        if let Some(error_message) = &patch.error_message {
            qb.push(", error_message = ").push_bind(error_message.clone());
        }
        if let Some(error_details) = &patch.error_details {
            qb.push(", error_details = ").push_bind(error_details.clone());
        }
        qb.push(" WHERE flow_id = ").push_bind(flow_id);
        if let Some(guard) = guard {
            qb.push(" AND updated_at < ").push_bind(guard.cutoff);
            qb.push(" AND status <> ALL(")
                .push_bind(guard.terminal_statuses.to_vec())
                .push(")");
        }

        Ok(qb.build().execute(&mut *conn).await?.rows_affected())
    }
}

/// Extra predicate for a conditional child update
struct StaleGuard<'a> {
    cutoff: DateTime<Utc>,
    terminal_statuses: &'a [String],
}

#[async_trait]
impl FlowStore for PgFlowStore {
    async fn find_master(&self, flow_id: Uuid, scope: Option<&TenantScope>) -> StoreResult<Option<MasterFlowRecord>> {
        let (tenant_id, engagement_id) = scope_binds(scope);
        let sql = format!("SELECT {MASTER_COLUMNS} FROM master_flows WHERE flow_id = $1 AND {SCOPE_PREDICATE}");
        let row = sqlx::query_as::<_, MasterFlowRow>(&sql)
            .bind(flow_id)
            .bind(tenant_id)
            .bind(engagement_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(MasterFlowRecord::try_from).transpose()
    }

    async fn find_child(&self, id: Uuid, scope: Option<&TenantScope>) -> StoreResult<Option<ChildFlowRecord>> {
        let (tenant_id, engagement_id) = scope_binds(scope);
        let sql = format!(
            "SELECT * FROM ({}) AS children ORDER BY (flow_id = $1) DESC, created_at DESC LIMIT 1",
            child_union_sql(&format!("(flow_id = $1 OR master_flow_id = $1) AND {SCOPE_PREDICATE}"))
        );
        let row = sqlx::query_as::<_, ChildFlowRow>(&sql)
            .bind(id)
            .bind(tenant_id)
            .bind(engagement_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ChildFlowRecord::try_from).transpose()
    }

    async fn find_children_for_master(
        &self,
        master_flow_id: Uuid,
        scope: Option<&TenantScope>,
    ) -> StoreResult<Vec<ChildFlowRecord>> {
        let (tenant_id, engagement_id) = scope_binds(scope);
        let sql = format!(
            "SELECT * FROM ({}) AS children ORDER BY created_at ASC",
            child_union_sql(&format!("(flow_id = $1 OR master_flow_id = $1) AND {SCOPE_PREDICATE}"))
        );
        let rows = sqlx::query_as::<_, ChildFlowRow>(&sql)
            .bind(master_flow_id)
            .bind(tenant_id)
            .bind(engagement_id)
            .fetch_all(&self.pool)
            .await?;

        collect_rows(rows)
    }

    async fn list_masters(&self, query: &MasterFlowQuery) -> StoreResult<Vec<MasterFlowRecord>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {MASTER_COLUMNS} FROM master_flows WHERE TRUE"));
        if let Some(flow_type) = query.flow_type {
            qb.push(" AND flow_type = ").push_bind(flow_type.as_str());
        }
        if !query.exclude_statuses.is_empty() {
            qb.push(" AND flow_status <> ALL(")
                .push_bind(query.exclude_statuses.clone())
                .push(")");
        }
        if let Some(scope) = query.scope {
            qb.push(" AND tenant_id = ").push_bind(scope.tenant_id);
            if let Some(engagement_id) = scope.engagement_id {
                qb.push(" AND engagement_id = ").push_bind(engagement_id);
            }
        }
        qb.push(" ORDER BY created_at DESC");
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb.build_query_as::<MasterFlowRow>().fetch_all(&self.pool).await?;
        collect_rows(rows)
    }

    async fn find_stale_children(
        &self,
        cutoff: DateTime<Utc>,
        exclude_statuses: &[&str],
        limit: usize,
    ) -> StoreResult<Vec<ChildFlowRecord>> {
        let sql = format!(
            "SELECT * FROM ({}) AS children ORDER BY updated_at ASC LIMIT $3",
            child_union_sql("updated_at < $1 AND status <> ALL($2)")
        );
        let excluded: Vec<String> = exclude_statuses.iter().map(|s| (*s).to_string()).collect();
        let rows = sqlx::query_as::<_, ChildFlowRow>(&sql)
            .bind(cutoff)
            .bind(excluded)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        collect_rows(rows)
    }

    async fn get_assets_by_flow(&self, flow_id: Uuid) -> StoreResult<Vec<FlowAsset>> {
        let rows = sqlx::query_as::<_, AssetRow>(
            r#"
            SELECT asset_id, flow_id, name, current_phase, assessment_flow_id, readiness
            FROM assets
            WHERE flow_id = $1
            ORDER BY name
            "#,
        )
        .bind(flow_id)
        .fetch_all(&self.pool)
        .await?;

        collect_rows(rows)
    }

    async fn apply_unit(&self, unit: UnitOfWork) -> StoreResult<AppliedUnit> {
        let started = Instant::now();
        let mut tx = self.pool.begin().await?;
        let mut rows_per_mutation = Vec::with_capacity(unit.len());
        for mutation in unit.mutations() {
            // Dropping `tx` on error rolls the unit back
            rows_per_mutation.push(Self::apply_mutation(&mut *tx, mutation).await?);
        }
        tx.commit().await?;
        let applied = AppliedUnit { rows_per_mutation };

        debug!(
            unit = unit.label(),
            mutations = unit.len(),
            rows = applied.rows(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Unit of work committed"
        );
        Ok(applied)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_union_covers_every_flow_type() {
        let sql = child_union_sql("flow_id = $1");
        for flow_type in FlowType::ALL {
            assert!(sql.contains(flow_type.child_table()));
            assert!(sql.contains(&format!("'{}' AS flow_type", flow_type.as_str())));
        }
        assert_eq!(sql.matches("UNION ALL").count(), FlowType::ALL.len() - 1);
    }

    #[test]
    fn test_row_with_unknown_flow_type_fails_to_decode() {
        let row = MasterFlowRow {
            flow_id: Uuid::new_v4(),
            flow_type: "migration".to_string(),
            flow_status: "running".to_string(),
            flow_name: "x".to_string(),
            tenant_id: Uuid::new_v4(),
            engagement_id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            configuration: Value::Null,
            current_phase: None,
            parent_flow_id: None,
            flow_metadata: Value::Null,
        };
        assert!(matches!(
            MasterFlowRecord::try_from(row),
            Err(StoreError::Decode { entity: "master_flow", .. })
        ));
    }
}
