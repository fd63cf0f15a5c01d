use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roster_core::SyncRunStats;
use tracing::{error, info, warn};

/// Alerting hook invoked once at the end of every scheduled or manual run.
#[async_trait]
pub trait SyncNotifier: Send + Sync {
    async fn run_succeeded(&self, stats: &SyncRunStats);
    async fn run_failed(&self, error: &anyhow::Error, started_at: DateTime<Utc>);
}

/// Emits notifications as structured log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl SyncNotifier for LogNotifier {
    async fn run_succeeded(&self, stats: &SyncRunStats) {
        if stats.has_errors() {
            warn!(
                run_id = %stats.run_id,
                errors = stats.errors.len(),
                first_error = stats.errors.first().map(String::as_str).unwrap_or_default(),
                "roster sync finished with item errors"
            );
        }
        info!(
            run_id = %stats.run_id,
            subscriptions = stats.total_subscriptions,
            active = stats.active,
            inactive = stats.inactive,
            classes_created = stats.classes_created,
            students_created = stats.students_created,
            students_updated = stats.students_updated,
            students_deleted = stats.students_deleted,
            "notification: roster sync succeeded"
        );
    }

    async fn run_failed(&self, err: &anyhow::Error, started_at: DateTime<Utc>) {
        error!(
            %started_at,
            error = %format!("{err:#}"),
            "notification: roster sync failed"
        );
    }
}
