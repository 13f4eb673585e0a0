//! Background sweeper task.
//!
//! Periodically runs the three reconciliation passes, leaves first: cancel
//! stale targets, finalize stale executors, finalize stale runs. The order
//! is a correctness requirement, not a convenience: an executor can only
//! aggregate over cancellations that have already landed.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::backends::{BackendResult, SweepBackend, SweepStats};

/// Configuration for the sweeper task.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often to run a reconciliation sweep.
    pub interval: Duration,
    /// Age after which a non-terminal target is force-canceled.
    pub target_timeout_minutes: u32,
    /// Age before an executor with all-terminal targets may be finalized.
    pub executor_timeout_minutes: u32,
    /// Age before a run with all-terminal executors may be finalized.
    pub run_timeout_minutes: u32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            target_timeout_minutes: 180,
            executor_timeout_minutes: 15,
            run_timeout_minutes: 15,
        }
    }
}

/// Background sweeper task.
pub struct SweeperTask<B> {
    backend: B,
    config: SweeperConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl<B> SweeperTask<B>
where
    B: SweepBackend + Clone + Send + Sync + 'static,
{
    pub fn new(backend: B, config: SweeperConfig, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            backend,
            config,
            shutdown_rx,
        }
    }

    /// Run the sweeper loop.
    pub async fn run(mut self) {
        info!(
            interval_ms = self.config.interval.as_millis(),
            target_timeout_minutes = self.config.target_timeout_minutes,
            executor_timeout_minutes = self.config.executor_timeout_minutes,
            run_timeout_minutes = self.config.run_timeout_minutes,
            "sweeper task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("sweeper task shutting down");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(err) = self.sweep_once().await {
                        error!(error = ?err, "reconciliation sweep failed");
                    }
                }
            }
        }
    }

    /// Run one full reconciliation pass and return the transition counts.
    ///
    /// A failed pass leaves every row in its prior state; the next tick
    /// simply retries, since each operation is idempotent.
    pub async fn sweep_once(&self) -> BackendResult<SweepStats> {
        let stats = SweepStats {
            canceled_targets: self
                .backend
                .cancel_stale_targets(self.config.target_timeout_minutes)
                .await?,
            finalized_executors: self
                .backend
                .finalize_stale_executors(self.config.executor_timeout_minutes)
                .await?,
            finalized_runs: self
                .backend
                .finalize_stale_runs(self.config.run_timeout_minutes)
                .await?,
        };

        if stats.total() > 0 {
            info!(
                canceled_targets = stats.canceled_targets,
                finalized_executors = stats.finalized_executors,
                finalized_runs = stats.finalized_runs,
                "reconciled stuck work items"
            );
        }

        self.report_childless_parents().await?;

        Ok(stats)
    }

    /// Surface parents the finalize passes refuse to touch: stale,
    /// non-terminal, and without a single child. The submission path
    /// guarantees at least one child per parent, so these are invariant
    /// violations to alert on rather than rows to guess a status for.
    async fn report_childless_parents(&self) -> BackendResult<()> {
        let executors = self
            .backend
            .count_childless_stale_executors(self.config.executor_timeout_minutes)
            .await?;
        if executors > 0 {
            warn!(
                count = executors,
                "stale executors without targets; refusing to finalize"
            );
        }

        let runs = self
            .backend
            .count_childless_stale_runs(self.config.run_timeout_minutes)
            .await?;
        if runs > 0 {
            warn!(
                count = runs,
                "stale runs without executors; refusing to finalize"
            );
        }

        Ok(())
    }
}

/// Convenience function to spawn a sweeper task.
pub fn spawn_sweeper<B>(
    backend: B,
    config: SweeperConfig,
) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>)
where
    B: SweepBackend + Clone + Send + Sync + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = SweeperTask::new(backend, config, shutdown_rx);
    let handle = tokio::spawn(task.run());
    (handle, shutdown_tx)
}
