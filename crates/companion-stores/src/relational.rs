//! Relational store adapter (C1, relational half). Owns TraitVector,
//! EmotionalState, Quirk, PsychologicalNeed, InteractionRecord,
//! SecurityIncident (§3). Every user-scoped query is run through the SQL
//! guard (§7); a distinct, clearly marked `execute_admin_query` path exists
//! for cross-user operations and logs a warning on every invocation.

use std::time::Duration;

use companion_core::GatewayError;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Pool, Postgres, Row};
use tracing::warn;

use crate::sql_guard::validate_user_id_present;

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

#[derive(Clone)]
pub struct RelationalStore {
    pool: Pool<Postgres>,
}

impl RelationalStore {
    pub async fn connect(database_url: &str, min_connections: u32, max_connections: u32) -> Result<Self, GatewayError> {
        let pool = PgPoolOptions::new()
            .min_connections(min_connections)
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|err| {
                warn!(%err, "relational store unreachable");
                GatewayError::ServiceUnavailable { service: "relational store" }
            })?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Runs `sql` through the AST guard before execution. Callers write
    /// statements parameterized as `... WHERE user_id = $1 ...` and supply
    /// `binder` to attach the bind values, keeping interpolation out of the
    /// SQL text entirely.
    pub async fn fetch_all_user_scoped(
        &self,
        sql: &str,
        binder: impl FnOnce(PgQuery<'_>) -> PgQuery<'_>,
    ) -> Result<Vec<PgRow>, GatewayError> {
        validate_user_id_present(sql)?;
        binder(sqlx::query(sql))
            .fetch_all(&self.pool)
            .await
            .map_err(|err| {
                warn!(%err, "user-scoped relational query failed");
                GatewayError::ServiceUnavailable { service: "relational store" }
            })
    }

    pub async fn execute_user_scoped(
        &self,
        sql: &str,
        binder: impl FnOnce(PgQuery<'_>) -> PgQuery<'_>,
    ) -> Result<u64, GatewayError> {
        validate_user_id_present(sql)?;
        let result = binder(sqlx::query(sql))
            .execute(&self.pool)
            .await
            .map_err(|err| {
                warn!(%err, "user-scoped relational statement failed");
                GatewayError::ServiceUnavailable { service: "relational store" }
            })?;
        Ok(result.rows_affected())
    }

    /// Cross-user administrative path (§6 Admin endpoints, §7). Bypasses the
    /// user_id guard entirely — logs a warning on every call so admin access
    /// is always auditable.
    pub async fn execute_admin_query(
        &self,
        sql: &str,
        binder: impl FnOnce(PgQuery<'_>) -> PgQuery<'_>,
    ) -> Result<Vec<PgRow>, GatewayError> {
        warn!(sql = %sql, "admin query executed (bypasses user_id guard)");
        binder(sqlx::query(sql))
            .fetch_all(&self.pool)
            .await
            .map_err(|_| GatewayError::ServiceUnavailable { service: "relational store" })
    }
}

pub fn row_get_string(row: &PgRow, column: &str) -> Result<String, GatewayError> {
    row.try_get(column)
        .map_err(|err| GatewayError::MemoryManagerError(format!("missing column {column}: {err}")))
}
