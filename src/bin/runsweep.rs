//! Main entry point for the runsweep reconciler.
//!
//! Runs the reconciliation sweep against the configured database, either
//! once (for an external scheduler such as cron) or as a periodic loop.

use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use runsweep::{Config, Database, SweeperConfig, SweeperTask, spawn_sweeper};
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "runsweep", about = "Reconcile stuck runs, executors, and targets")]
struct Args {
    /// Run a single sweep and exit instead of looping
    #[arg(long, default_value = "false")]
    once: bool,

    /// Override RUNSWEEP_TARGET_TIMEOUT_MINUTES
    #[arg(long)]
    target_timeout_minutes: Option<u32>,

    /// Override RUNSWEEP_EXECUTOR_TIMEOUT_MINUTES
    #[arg(long)]
    executor_timeout_minutes: Option<u32>,

    /// Override RUNSWEEP_RUN_TIMEOUT_MINUTES
    #[arg(long)]
    run_timeout_minutes: Option<u32>,

    /// Override RUNSWEEP_SWEEP_INTERVAL_MS
    #[arg(long)]
    interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let db = Database::connect(&config.database_url).await?;
    info!("Connected to database");

    db.migrate().await?;
    info!("Database migrations complete");

    let sweeper_config = SweeperConfig {
        interval: Duration::from_millis(args.interval_ms.unwrap_or(config.sweep_interval_ms)),
        target_timeout_minutes: args
            .target_timeout_minutes
            .unwrap_or(config.target_timeout_minutes),
        executor_timeout_minutes: args
            .executor_timeout_minutes
            .unwrap_or(config.executor_timeout_minutes),
        run_timeout_minutes: args.run_timeout_minutes.unwrap_or(config.run_timeout_minutes),
    };

    if args.once {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = SweeperTask::new(db, sweeper_config, shutdown_rx);
        let stats = task.sweep_once().await?;
        println!(
            "canceled_targets={} finalized_executors={} finalized_runs={}",
            stats.canceled_targets, stats.finalized_executors, stats.finalized_runs
        );
        return Ok(());
    }

    let (handle, shutdown_tx) = spawn_sweeper(db, sweeper_config);
    info!("Sweeper started, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown_tx.send(true)?;
    handle.await?;

    Ok(())
}
