//! Cron-driven, single-flight runner for the sync pipeline.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use roster_core::SyncRunStats;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::lock::RunLock;
use crate::notify::SyncNotifier;
use crate::pipeline::SyncJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Cron,
    Manual,
    Startup,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::Cron => "cron",
            Trigger::Manual => "manual",
            Trigger::Startup => "startup",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded { trigger: Trigger, stats: SyncRunStats },
    Failed { trigger: Trigger, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub scheduled: bool,
    pub cron: String,
    pub timezone: String,
    pub lock: &'static str,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<RunOutcome>,
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("a roster sync is already running")]
    AlreadyRunning,
    #[error("acquiring run lock: {0:#}")]
    Lock(anyhow::Error),
    #[error("roster sync failed: {0:#}")]
    Failed(anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub cron: String,
    pub timezone: FixedOffset,
    pub run_on_startup: bool,
}

#[derive(Debug, Default)]
struct SchedulerState {
    last_run_at: Option<DateTime<Utc>>,
    next_run_at: Option<DateTime<Utc>>,
    last_outcome: Option<RunOutcome>,
}

struct CronHandle {
    scheduler: JobScheduler,
    job_id: Uuid,
}

struct SchedulerInner {
    job: Arc<dyn SyncJob>,
    lock: Arc<dyn RunLock>,
    notifier: Arc<dyn SyncNotifier>,
    settings: SchedulerSettings,
    running: AtomicBool,
    state: Mutex<SchedulerState>,
    cron: Mutex<Option<CronHandle>>,
}

/// Clears the running flag when the run ends, including by panic.
struct RunningFlag<'a>(&'a AtomicBool);

impl<'a> RunningFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cheap to clone; all clones share one schedule, lock and status.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<SchedulerInner>,
}

impl SyncScheduler {
    pub fn new(
        job: Arc<dyn SyncJob>,
        lock: Arc<dyn RunLock>,
        notifier: Arc<dyn SyncNotifier>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                job,
                lock,
                notifier,
                settings,
                running: AtomicBool::new(false),
                state: Mutex::new(SchedulerState::default()),
                cron: Mutex::new(None),
            }),
        }
    }

    /// Register the cron job and start ticking. An invalid cron expression fails here.
    pub async fn start(&self) -> Result<()> {
        let mut cron = self.inner.cron.lock().await;
        if cron.is_some() {
            warn!("roster sync scheduler already started");
            return Ok(());
        }

        let expression = self.inner.settings.cron.as_str();
        let this = self.clone();
        let job = Job::new_async_tz(expression, self.inner.settings.timezone, move |_uuid, _l| {
            let this = this.clone();
            Box::pin(async move {
                let _ = this.run_guarded(Trigger::Cron).await;
            })
        })
        .with_context(|| format!("invalid cron expression `{expression}`"))?;

        let scheduler = JobScheduler::new().await.context("creating scheduler")?;
        let job_id = scheduler.add(job).await.context("adding roster sync job")?;
        scheduler.start().await.context("starting scheduler")?;
        *cron = Some(CronHandle { scheduler, job_id });
        drop(cron);

        self.refresh_next_run().await;
        let next_run_at = self.inner.state.lock().await.next_run_at;
        info!(
            cron = expression,
            timezone = %self.inner.settings.timezone,
            next_run_at = ?next_run_at,
            lock = self.inner.lock.describe(),
            "roster sync scheduler started"
        );

        if self.inner.settings.run_on_startup {
            let this = self.clone();
            tokio::spawn(async move {
                let _ = this.run_guarded(Trigger::Startup).await;
            });
        }
        Ok(())
    }

    /// Run the pipeline now, subject to the same single-flight guard as cron ticks.
    pub async fn trigger_now(&self) -> Result<SyncRunStats, TriggerError> {
        self.run_guarded(Trigger::Manual).await
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> SchedulerStatus {
        self.refresh_next_run().await;
        let scheduled = self.inner.cron.lock().await.is_some();
        let state = self.inner.state.lock().await;
        SchedulerStatus {
            is_running: self.is_running(),
            scheduled,
            cron: self.inner.settings.cron.clone(),
            timezone: self.inner.settings.timezone.to_string(),
            lock: self.inner.lock.describe(),
            last_run_at: state.last_run_at,
            next_run_at: state.next_run_at,
            last_outcome: state.last_outcome.clone(),
        }
    }

    /// Stop ticking. A run already in progress is left to finish.
    pub async fn shutdown(&self) -> Result<()> {
        let handle = self.inner.cron.lock().await.take();
        if let Some(mut handle) = handle {
            handle
                .scheduler
                .shutdown()
                .await
                .context("shutting down scheduler")?;
            info!("roster sync scheduler stopped");
        }
        self.inner.state.lock().await.next_run_at = None;
        Ok(())
    }

    async fn run_guarded(&self, trigger: Trigger) -> Result<SyncRunStats, TriggerError> {
        let lease = match self.inner.lock.try_acquire().await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                warn!(%trigger, "roster sync already running; trigger ignored");
                return Err(TriggerError::AlreadyRunning);
            }
            Err(err) => {
                error!(%trigger, error = %format!("{err:#}"), "could not acquire roster sync lock");
                return Err(TriggerError::Lock(err));
            }
        };
        let _running = RunningFlag::raise(&self.inner.running);

        let started_at = Utc::now();
        info!(%trigger, "roster sync triggered");
        let result = self.inner.job.run().await;

        let outcome = match &result {
            Ok(stats) => {
                self.inner.notifier.run_succeeded(stats).await;
                RunOutcome::Succeeded {
                    trigger,
                    stats: stats.clone(),
                }
            }
            Err(err) => {
                error!(%trigger, error = %format!("{err:#}"), "roster sync failed");
                self.inner.notifier.run_failed(err, started_at).await;
                RunOutcome::Failed {
                    trigger,
                    error: format!("{err:#}"),
                }
            }
        };

        {
            let mut state = self.inner.state.lock().await;
            state.last_run_at = Some(Utc::now());
            state.last_outcome = Some(outcome);
        }
        self.refresh_next_run().await;

        if let Err(err) = lease.release().await {
            warn!(error = %format!("{err:#}"), "releasing roster sync lock failed");
        }
        result.map_err(TriggerError::Failed)
    }

    /// Ask the cron engine for the job's next fire time.
    async fn refresh_next_run(&self) {
        let handle = self.inner.cron.lock().await;
        let Some(handle) = handle.as_ref() else {
            return;
        };
        let mut scheduler = handle.scheduler.clone();
        match scheduler.next_tick_for_job(handle.job_id).await {
            Ok(next) => self.inner.state.lock().await.next_run_at = next,
            Err(err) => warn!(error = %err, "could not read next scheduled roster sync"),
        }
    }
}
