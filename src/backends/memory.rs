//! In-memory backend mirroring the store-side sweep semantics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::base::{BackendResult, SweepBackend};
use crate::db::{ExecutorId, RunId, TargetId};
use crate::status::{Status, aggregate};

#[derive(Clone, Copy, Debug)]
struct RunRow {
    status: Status,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug)]
struct ExecutorRow {
    run_id: Uuid,
    status: Status,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug)]
struct TargetRow {
    executor_id: Uuid,
    status: Status,
    updated_at: DateTime<Utc>,
}

/// Backend that keeps the hierarchy in memory, for tests and local runs.
///
/// The insert and status helpers stand in for the submission and
/// result-ingestion paths that live outside this crate.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    runs: Arc<Mutex<HashMap<Uuid, RunRow>>>,
    executors: Arc<Mutex<HashMap<Uuid, ExecutorRow>>>,
    targets: Arc<Mutex<HashMap<Uuid, TargetRow>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_run(&self, status: Status, updated_at: DateTime<Utc>) -> RunId {
        let id = RunId::new();
        self.runs
            .lock()
            .expect("runs poisoned")
            .insert(id.0, RunRow { status, updated_at });
        id
    }

    pub fn insert_executor(
        &self,
        run_id: RunId,
        status: Status,
        updated_at: DateTime<Utc>,
    ) -> ExecutorId {
        let id = ExecutorId::new();
        self.executors.lock().expect("executors poisoned").insert(
            id.0,
            ExecutorRow {
                run_id: run_id.0,
                status,
                updated_at,
            },
        );
        id
    }

    pub fn insert_target(
        &self,
        executor_id: ExecutorId,
        status: Status,
        updated_at: DateTime<Utc>,
    ) -> TargetId {
        let id = TargetId::new();
        self.targets.lock().expect("targets poisoned").insert(
            id.0,
            TargetRow {
                executor_id: executor_id.0,
                status,
                updated_at,
            },
        );
        id
    }

    /// Write a target status the way the result-ingestion path would,
    /// refreshing `updated_at`.
    pub fn set_target_status(&self, id: TargetId, status: Status) {
        let mut guard = self.targets.lock().expect("targets poisoned");
        if let Some(row) = guard.get_mut(&id.0) {
            row.status = status;
            row.updated_at = Utc::now();
        }
    }

    pub fn run_status(&self, id: RunId) -> Option<Status> {
        self.runs
            .lock()
            .expect("runs poisoned")
            .get(&id.0)
            .map(|row| row.status)
    }

    pub fn executor_status(&self, id: ExecutorId) -> Option<Status> {
        self.executors
            .lock()
            .expect("executors poisoned")
            .get(&id.0)
            .map(|row| row.status)
    }

    pub fn target_status(&self, id: TargetId) -> Option<Status> {
        self.targets
            .lock()
            .expect("targets poisoned")
            .get(&id.0)
            .map(|row| row.status)
    }

    pub fn target_updated_at(&self, id: TargetId) -> Option<DateTime<Utc>> {
        self.targets
            .lock()
            .expect("targets poisoned")
            .get(&id.0)
            .map(|row| row.updated_at)
    }

    fn cutoff(timeout_minutes: u32) -> DateTime<Utc> {
        Utc::now() - Duration::minutes(i64::from(timeout_minutes))
    }
}

#[async_trait]
impl SweepBackend for MemoryBackend {
    async fn cancel_stale_targets(&self, timeout_minutes: u32) -> BackendResult<u64> {
        let cutoff = Self::cutoff(timeout_minutes);
        let now = Utc::now();
        let mut guard = self.targets.lock().expect("targets poisoned");
        let mut updated = 0u64;
        for row in guard.values_mut() {
            if !row.status.is_terminal() && row.updated_at < cutoff {
                row.status = Status::Canceled;
                row.updated_at = now;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn finalize_stale_executors(&self, timeout_minutes: u32) -> BackendResult<u64> {
        let cutoff = Self::cutoff(timeout_minutes);
        let now = Utc::now();
        let targets = self.targets.lock().expect("targets poisoned");
        let mut executors = self.executors.lock().expect("executors poisoned");
        let mut updated = 0u64;
        for (id, row) in executors.iter_mut() {
            if row.status.is_terminal() || row.updated_at >= cutoff {
                continue;
            }
            let children: Vec<Status> = targets
                .values()
                .filter(|target| target.executor_id == *id)
                .map(|target| target.status)
                .collect();
            if children.is_empty() {
                continue;
            }
            if children
                .iter()
                .any(|status| Status::TARGET_ACTIVE.contains(status))
            {
                continue;
            }
            let Some(next) = aggregate(children) else {
                continue;
            };
            row.status = next;
            row.updated_at = now;
            updated += 1;
        }
        Ok(updated)
    }

    async fn finalize_stale_runs(&self, timeout_minutes: u32) -> BackendResult<u64> {
        let cutoff = Self::cutoff(timeout_minutes);
        let now = Utc::now();
        let executors = self.executors.lock().expect("executors poisoned");
        let mut runs = self.runs.lock().expect("runs poisoned");
        let mut updated = 0u64;
        for (id, row) in runs.iter_mut() {
            if row.status.is_terminal() || row.updated_at >= cutoff {
                continue;
            }
            let children: Vec<Status> = executors
                .values()
                .filter(|executor| executor.run_id == *id)
                .map(|executor| executor.status)
                .collect();
            if children.is_empty() {
                continue;
            }
            if children
                .iter()
                .any(|status| Status::EXECUTOR_ACTIVE.contains(status))
            {
                continue;
            }
            let Some(next) = aggregate(children) else {
                continue;
            };
            row.status = next;
            row.updated_at = now;
            updated += 1;
        }
        Ok(updated)
    }

    async fn count_childless_stale_executors(&self, timeout_minutes: u32) -> BackendResult<i64> {
        let cutoff = Self::cutoff(timeout_minutes);
        let targets = self.targets.lock().expect("targets poisoned");
        let executors = self.executors.lock().expect("executors poisoned");
        let count = executors
            .iter()
            .filter(|(id, row)| {
                !row.status.is_terminal()
                    && row.updated_at < cutoff
                    && !targets.values().any(|target| target.executor_id == **id)
            })
            .count();
        Ok(count as i64)
    }

    async fn count_childless_stale_runs(&self, timeout_minutes: u32) -> BackendResult<i64> {
        let cutoff = Self::cutoff(timeout_minutes);
        let executors = self.executors.lock().expect("executors poisoned");
        let runs = self.runs.lock().expect("runs poisoned");
        let count = runs
            .iter()
            .filter(|(id, row)| {
                !row.status.is_terminal()
                    && row.updated_at < cutoff
                    && !executors.values().any(|executor| executor.run_id == **id)
            })
            .count();
        Ok(count as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes_ago(minutes: i64) -> DateTime<Utc> {
        Utc::now() - Duration::minutes(minutes)
    }

    /// Build one run / one executor / N targets, all aged `minutes` back.
    fn hierarchy(
        backend: &MemoryBackend,
        target_statuses: &[Status],
        minutes: i64,
    ) -> (RunId, ExecutorId, Vec<TargetId>) {
        let run_id = backend.insert_run(Status::Running, minutes_ago(minutes));
        let executor_id = backend.insert_executor(run_id, Status::Running, minutes_ago(minutes));
        let target_ids = target_statuses
            .iter()
            .map(|status| backend.insert_target(executor_id, *status, minutes_ago(minutes)))
            .collect();
        (run_id, executor_id, target_ids)
    }

    #[tokio::test]
    async fn cancel_targets_hits_only_stale_active_rows() {
        let backend = MemoryBackend::new();
        let run_id = backend.insert_run(Status::Running, minutes_ago(200));
        let executor_id = backend.insert_executor(run_id, Status::Running, minutes_ago(200));

        let stale_pending = backend.insert_target(executor_id, Status::Pending, minutes_ago(200));
        let stale_running = backend.insert_target(executor_id, Status::Running, minutes_ago(181));
        let fresh_running = backend.insert_target(executor_id, Status::Running, minutes_ago(10));
        let stale_success = backend.insert_target(executor_id, Status::Success, minutes_ago(200));

        let before = Utc::now();
        let updated = backend.cancel_stale_targets(180).await.expect("sweep");

        assert_eq!(updated, 2);
        assert_eq!(backend.target_status(stale_pending), Some(Status::Canceled));
        assert_eq!(backend.target_status(stale_running), Some(Status::Canceled));
        assert_eq!(backend.target_status(fresh_running), Some(Status::Running));
        assert_eq!(backend.target_status(stale_success), Some(Status::Success));

        let refreshed = backend
            .target_updated_at(stale_pending)
            .expect("target exists");
        assert!(refreshed >= before, "cancel must refresh updated_at");
    }

    #[tokio::test]
    async fn executor_with_active_target_is_never_finalized() {
        let backend = MemoryBackend::new();
        let (_, executor_id, _targets) =
            hierarchy(&backend, &[Status::Success, Status::Running], 10_000);

        let updated = backend.finalize_stale_executors(15).await.expect("sweep");

        assert_eq!(updated, 0);
        assert_eq!(backend.executor_status(executor_id), Some(Status::Running));
    }

    #[tokio::test]
    async fn finalize_writes_worst_outcome() {
        let backend = MemoryBackend::new();
        let (_, all_success, _) = hierarchy(&backend, &[Status::Success, Status::Success], 20);
        let (_, with_canceled, _) = hierarchy(&backend, &[Status::Success, Status::Canceled], 20);
        let (_, with_failure, _) = hierarchy(
            &backend,
            &[Status::Success, Status::Failure, Status::Canceled],
            20,
        );

        let updated = backend.finalize_stale_executors(15).await.expect("sweep");

        assert_eq!(updated, 3);
        assert_eq!(backend.executor_status(all_success), Some(Status::Success));
        assert_eq!(
            backend.executor_status(with_canceled),
            Some(Status::Canceled)
        );
        assert_eq!(backend.executor_status(with_failure), Some(Status::Failure));
    }

    #[tokio::test]
    async fn terminal_rows_are_never_rewritten() {
        let backend = MemoryBackend::new();
        let run_id = backend.insert_run(Status::Success, minutes_ago(500));
        let executor_id = backend.insert_executor(run_id, Status::Success, minutes_ago(500));
        backend.insert_target(executor_id, Status::Failure, minutes_ago(500));

        let executors = backend.finalize_stale_executors(15).await.expect("sweep");
        let runs = backend.finalize_stale_runs(15).await.expect("sweep");

        assert_eq!(executors, 0);
        assert_eq!(runs, 0);
        assert_eq!(backend.executor_status(executor_id), Some(Status::Success));
        assert_eq!(backend.run_status(run_id), Some(Status::Success));
    }

    #[tokio::test]
    async fn repeat_sweep_is_a_no_op() {
        let backend = MemoryBackend::new();
        hierarchy(&backend, &[Status::Pending, Status::Running], 300);

        assert_eq!(backend.cancel_stale_targets(180).await.expect("sweep"), 2);
        assert_eq!(
            backend.finalize_stale_executors(15).await.expect("sweep"),
            1
        );
        assert_eq!(backend.finalize_stale_runs(15).await.expect("sweep"), 1);

        assert_eq!(backend.cancel_stale_targets(180).await.expect("sweep"), 0);
        assert_eq!(
            backend.finalize_stale_executors(15).await.expect("sweep"),
            0
        );
        assert_eq!(backend.finalize_stale_runs(15).await.expect("sweep"), 0);
    }

    #[tokio::test]
    async fn run_waits_for_every_executor_then_takes_worst_outcome() {
        let backend = MemoryBackend::new();
        let run_id = backend.insert_run(Status::Running, minutes_ago(20));

        // E1: all targets succeeded, stale since 20 minutes ago.
        let e1 = backend.insert_executor(run_id, Status::Pending, minutes_ago(20));
        backend.insert_target(e1, Status::Success, minutes_ago(20));
        backend.insert_target(e1, Status::Success, minutes_ago(20));

        // E2: one target still running, touched a minute ago.
        let e2 = backend.insert_executor(run_id, Status::Running, minutes_ago(1));
        let e2_target = backend.insert_target(e2, Status::Running, minutes_ago(1));

        assert_eq!(
            backend.finalize_stale_executors(15).await.expect("sweep"),
            1
        );
        assert_eq!(backend.executor_status(e1), Some(Status::Success));
        assert_eq!(backend.executor_status(e2), Some(Status::Running));

        // E2 is still non-terminal, so the run must not move.
        assert_eq!(backend.finalize_stale_runs(15).await.expect("sweep"), 0);
        assert_eq!(backend.run_status(run_id), Some(Status::Running));

        // The last target fails; after E2 ages past its own timeout the
        // cascade completes with the worst outcome.
        backend.set_target_status(e2_target, Status::Failure);
        {
            let mut executors = backend.executors.lock().expect("executors poisoned");
            executors.get_mut(&e2.0).expect("e2 exists").updated_at = minutes_ago(16);
        }
        {
            let mut runs = backend.runs.lock().expect("runs poisoned");
            runs.get_mut(&run_id.0).expect("run exists").updated_at = minutes_ago(16);
        }

        assert_eq!(
            backend.finalize_stale_executors(15).await.expect("sweep"),
            1
        );
        assert_eq!(backend.executor_status(e2), Some(Status::Failure));
        assert_eq!(backend.finalize_stale_runs(15).await.expect("sweep"), 1);
        assert_eq!(backend.run_status(run_id), Some(Status::Failure));
    }

    #[tokio::test]
    async fn childless_parents_are_skipped_and_counted() {
        let backend = MemoryBackend::new();
        let run_id = backend.insert_run(Status::Pending, minutes_ago(60));
        let executor_id = backend.insert_executor(run_id, Status::Pending, minutes_ago(60));

        assert_eq!(
            backend.finalize_stale_executors(15).await.expect("sweep"),
            0
        );
        assert_eq!(backend.executor_status(executor_id), Some(Status::Pending));
        assert_eq!(
            backend
                .count_childless_stale_executors(15)
                .await
                .expect("count"),
            1
        );

        let orphan_run = backend.insert_run(Status::Acked, minutes_ago(60));
        assert_eq!(
            backend.count_childless_stale_runs(15).await.expect("count"),
            1
        );
        assert_eq!(backend.run_status(orphan_run), Some(Status::Acked));
    }

    #[tokio::test]
    async fn zero_timeout_makes_everything_stale() {
        let backend = MemoryBackend::new();
        let (run_id, executor_id, targets) =
            hierarchy(&backend, &[Status::Pending, Status::Success], 1);

        assert_eq!(backend.cancel_stale_targets(0).await.expect("sweep"), 1);
        assert_eq!(backend.target_status(targets[0]), Some(Status::Canceled));

        assert_eq!(backend.finalize_stale_executors(0).await.expect("sweep"), 1);
        assert_eq!(
            backend.executor_status(executor_id),
            Some(Status::Canceled)
        );
        assert_eq!(backend.finalize_stale_runs(0).await.expect("sweep"), 1);
        assert_eq!(backend.run_status(run_id), Some(Status::Canceled));
    }
}
