//! Bulk sweep operations that reconcile stuck rows in the hierarchy.
//!
//! Each operation is a single atomic UPDATE whose predicate is evaluated
//! store-side at write time. Eligibility for the finalize sweeps is a live
//! correlated `NOT EXISTS` probe against the child table, never a cached
//! count, so the statements stay correct against concurrent terminal writes
//! from the result-ingestion path and against overlapping sweep invocations
//! (already-terminal rows are simply not matched again).
//!
//! Ordering matters across one sweep: cancel targets first, then finalize
//! executors, then runs, so an executor aggregates over the cancellations
//! that just landed.

use async_trait::async_trait;

use super::{Database, DbResult};
use crate::backends::{BackendError, BackendResult, SweepBackend};
use crate::status::Status;

impl Database {
    /// Cancel every target still in a non-terminal status whose
    /// `updated_at` is older than `timeout_minutes`.
    ///
    /// Returns the number of targets transitioned. Re-running with no newly
    /// stale rows is a no-op.
    pub async fn cancel_stale_targets(&self, timeout_minutes: u32) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE targets
            SET status = $2, updated_at = NOW()
            WHERE status NOT IN ('success', 'failure', 'canceled')
              AND updated_at < NOW() - $1 * INTERVAL '1 minute'
            "#,
        )
        .bind(i64::from(timeout_minutes))
        .bind(Status::Canceled.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Finalize every executor that has aged past `timeout_minutes`, has at
    /// least one target, and has no target left in a non-terminal status.
    ///
    /// The new status is the worst outcome among the executor's targets
    /// (failure over canceled over success). Executors already terminal are
    /// never touched; an executor with any pending or running target is
    /// excluded no matter how old it is.
    pub async fn finalize_stale_executors(&self, timeout_minutes: u32) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE executors
            SET status = (
                    SELECT t.status
                    FROM targets AS t
                    WHERE t.executor_id = executors.id
                    ORDER BY CASE t.status
                                 WHEN 'failure' THEN 2
                                 WHEN 'canceled' THEN 1
                                 ELSE 0
                             END DESC
                    LIMIT 1
                ),
                updated_at = NOW()
            WHERE executors.status NOT IN ('success', 'failure', 'canceled')
              AND executors.updated_at < NOW() - $1 * INTERVAL '1 minute'
              AND EXISTS (
                    SELECT 1
                    FROM targets AS t
                    WHERE t.executor_id = executors.id
              )
              AND NOT EXISTS (
                    SELECT 1
                    FROM targets AS t
                    WHERE t.executor_id = executors.id
                      AND t.status IN ('pending', 'running')
              )
            "#,
        )
        .bind(i64::from(timeout_minutes))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Finalize every run that has aged past `timeout_minutes`, has at least
    /// one executor, and has no executor left in a non-terminal status.
    ///
    /// Mirrors [`Database::finalize_stale_executors`] one level up.
    pub async fn finalize_stale_runs(&self, timeout_minutes: u32) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = (
                    SELECT e.status
                    FROM executors AS e
                    WHERE e.run_id = runs.id
                    ORDER BY CASE e.status
                                 WHEN 'failure' THEN 2
                                 WHEN 'canceled' THEN 1
                                 ELSE 0
                             END DESC
                    LIMIT 1
                ),
                updated_at = NOW()
            WHERE runs.status NOT IN ('success', 'failure', 'canceled')
              AND runs.updated_at < NOW() - $1 * INTERVAL '1 minute'
              AND EXISTS (
                    SELECT 1
                    FROM executors AS e
                    WHERE e.run_id = runs.id
              )
              AND NOT EXISTS (
                    SELECT 1
                    FROM executors AS e
                    WHERE e.run_id = runs.id
                      AND e.status IN ('pending', 'acked', 'running')
              )
            "#,
        )
        .bind(i64::from(timeout_minutes))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Count stale non-terminal executors with no targets at all.
    ///
    /// Such rows violate the submission path's every-parent-has-a-child
    /// guarantee; the finalize sweep skips them, and the sweeper reports
    /// them instead of inventing an aggregate for an empty child set.
    pub async fn count_childless_stale_executors(&self, timeout_minutes: u32) -> DbResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM executors
            WHERE status NOT IN ('success', 'failure', 'canceled')
              AND updated_at < NOW() - $1 * INTERVAL '1 minute'
              AND NOT EXISTS (
                    SELECT 1
                    FROM targets AS t
                    WHERE t.executor_id = executors.id
              )
            "#,
        )
        .bind(i64::from(timeout_minutes))
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Count stale non-terminal runs with no executors at all.
    pub async fn count_childless_stale_runs(&self, timeout_minutes: u32) -> DbResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM runs
            WHERE status NOT IN ('success', 'failure', 'canceled')
              AND updated_at < NOW() - $1 * INTERVAL '1 minute'
              AND NOT EXISTS (
                    SELECT 1
                    FROM executors AS e
                    WHERE e.run_id = runs.id
              )
            "#,
        )
        .bind(i64::from(timeout_minutes))
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

#[async_trait]
impl SweepBackend for Database {
    async fn cancel_stale_targets(&self, timeout_minutes: u32) -> BackendResult<u64> {
        Database::cancel_stale_targets(self, timeout_minutes)
            .await
            .map_err(BackendError::from)
    }

    async fn finalize_stale_executors(&self, timeout_minutes: u32) -> BackendResult<u64> {
        Database::finalize_stale_executors(self, timeout_minutes)
            .await
            .map_err(BackendError::from)
    }

    async fn finalize_stale_runs(&self, timeout_minutes: u32) -> BackendResult<u64> {
        Database::finalize_stale_runs(self, timeout_minutes)
            .await
            .map_err(BackendError::from)
    }

    async fn count_childless_stale_executors(&self, timeout_minutes: u32) -> BackendResult<i64> {
        Database::count_childless_stale_executors(self, timeout_minutes)
            .await
            .map_err(BackendError::from)
    }

    async fn count_childless_stale_runs(&self, timeout_minutes: u32) -> BackendResult<i64> {
        Database::count_childless_stale_runs(self, timeout_minutes)
            .await
            .map_err(BackendError::from)
    }
}
