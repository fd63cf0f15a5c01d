//! Subscription-to-roster synchronization: pipeline stages, run guard and cron scheduler.

use std::sync::Arc;

use anyhow::{Context, Result};
use roster_core::SyncRunStats;
use roster_guru::GuruClient;
use roster_storage::PgRosterStore;
use tracing::info;

pub mod bootstrap;
pub mod classes;
pub mod classify;
pub mod config;
pub mod lock;
pub mod notify;
pub mod pipeline;
pub mod scheduler;
pub mod students;

pub use classify::{classify, Classification};
pub use config::{AllowList, ConfigError, LockMode, SyncConfig};
pub use lock::{LocalRunLock, PgAdvisoryRunLock, RunLease, RunLock};
pub use notify::{LogNotifier, SyncNotifier};
pub use pipeline::{PipelineSettings, SyncJob, SyncPipeline};
pub use scheduler::{
    RunOutcome, SchedulerSettings, SchedulerStatus, SyncScheduler, Trigger, TriggerError,
};

pub const CRATE_NAME: &str = "roster-sync";

/// Connect to the roster database and build the production pipeline.
pub async fn build_pipeline(config: &SyncConfig) -> Result<(SyncPipeline, PgRosterStore)> {
    let store = PgRosterStore::connect(&config.database_url)
        .await
        .context("connecting to roster database")?;
    let client = GuruClient::new(config.guru.clone()).context("building subscription client")?;
    let pipeline = SyncPipeline::new(
        Arc::new(client),
        Arc::new(store.clone()),
        PipelineSettings::from(config),
    );
    Ok((pipeline, store))
}

/// Build a scheduler around the production pipeline. Call [`SyncScheduler::start`] to begin ticking.
pub async fn build_scheduler(config: &SyncConfig) -> Result<SyncScheduler> {
    let (pipeline, store) = build_pipeline(config).await?;
    let lock: Arc<dyn RunLock> = match config.lock_mode {
        LockMode::Local => Arc::new(LocalRunLock::new()),
        LockMode::Postgres => Arc::new(PgAdvisoryRunLock::new(store.pool().clone())),
    };
    info!(lock = lock.describe(), "roster sync run lock selected");
    Ok(SyncScheduler::new(
        Arc::new(pipeline),
        lock,
        Arc::new(LogNotifier),
        SchedulerSettings {
            cron: config.cron_schedule.clone(),
            timezone: config.timezone,
            run_on_startup: config.sync_on_startup,
        },
    ))
}

pub async fn run_sync_once_from_env() -> Result<SyncRunStats> {
    let config = SyncConfig::from_env()?;
    let (pipeline, _store) = build_pipeline(&config).await?;
    pipeline.run_once().await
}
