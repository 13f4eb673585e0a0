//! Backend interface for the reconciliation sweeps.

use async_trait::async_trait;

use crate::db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl From<DbError> for BackendError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlx(err) => Self::Sqlx(err),
            other => Self::Message(other.to_string()),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Summary of one reconciliation sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub canceled_targets: u64,
    pub finalized_executors: u64,
    pub finalized_runs: u64,
}

impl SweepStats {
    pub fn total(&self) -> u64 {
        self.canceled_targets + self.finalized_executors + self.finalized_runs
    }
}

/// Store capability the whole reconciler depends on: atomic bulk updates
/// whose predicate may probe a related table and whose written value may be
/// derived from an aggregate over related rows.
///
/// All operations take a timeout in whole minutes measured against each
/// row's `updated_at`, and return the number of rows transitioned. All are
/// idempotent: a repeat invocation with no newly eligible rows is a no-op.
#[async_trait]
pub trait SweepBackend: Send + Sync {
    /// Move stale non-terminal targets to canceled.
    async fn cancel_stale_targets(&self, timeout_minutes: u32) -> BackendResult<u64>;

    /// Finalize stale executors whose targets are all terminal, writing the
    /// worst target outcome.
    async fn finalize_stale_executors(&self, timeout_minutes: u32) -> BackendResult<u64>;

    /// Finalize stale runs whose executors are all terminal, writing the
    /// worst executor outcome.
    async fn finalize_stale_runs(&self, timeout_minutes: u32) -> BackendResult<u64>;

    /// Count stale non-terminal executors that have no targets. These are
    /// invariant violations the finalize sweep refuses to touch.
    async fn count_childless_stale_executors(&self, timeout_minutes: u32) -> BackendResult<i64>;

    /// Count stale non-terminal runs that have no executors.
    async fn count_childless_stale_runs(&self, timeout_minutes: u32) -> BackendResult<i64>;
}
