use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use roster_core::SyncRunStats;
use roster_guru::SubscriptionSource;
use roster_storage::{Argon2Hasher, PasswordHasher, RosterStore};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::bootstrap::ensure_default_teacher;
use crate::classes::reconcile_classes;
use crate::classify::classify;
use crate::config::{AllowList, SyncConfig, DEFAULT_BATCH_SIZE, DEFAULT_TEACHER_EMAIL};
use crate::students::{
    BatchExecutor, CredentialPolicy, DocumentCredentialPolicy, SequentialExecutor, StudentReconciler,
};

/// One complete sync invocation, as seen by the scheduler.
#[async_trait]
pub trait SyncJob: Send + Sync {
    async fn run(&self) -> Result<SyncRunStats>;
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub allow_list: AllowList,
    pub default_teacher_email: String,
    pub batch_size: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            allow_list: AllowList::default(),
            default_teacher_email: DEFAULT_TEACHER_EMAIL.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl From<&SyncConfig> for PipelineSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            allow_list: config.allow_list.clone(),
            default_teacher_email: config.default_teacher_email.clone(),
            batch_size: config.batch_size,
        }
    }
}

/// Fetch, classify, bootstrap the teacher, reconcile classes, then reconcile students.
///
/// Stages run strictly in order. The remote fetch completes before the first roster write, so
/// a fetch failure never leaves a half-applied roster.
pub struct SyncPipeline<E = SequentialExecutor> {
    source: Arc<dyn SubscriptionSource>,
    store: Arc<dyn RosterStore>,
    hasher: Arc<dyn PasswordHasher>,
    credentials: Arc<dyn CredentialPolicy>,
    executor: E,
    settings: PipelineSettings,
}

impl SyncPipeline<SequentialExecutor> {
    pub fn new(
        source: Arc<dyn SubscriptionSource>,
        store: Arc<dyn RosterStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            store,
            hasher: Arc::new(Argon2Hasher),
            credentials: Arc::new(DocumentCredentialPolicy),
            executor: SequentialExecutor,
            settings,
        }
    }
}

impl<E: BatchExecutor> SyncPipeline<E> {
    pub fn with_hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_credential_policy(mut self, credentials: Arc<dyn CredentialPolicy>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_executor<E2: BatchExecutor>(self, executor: E2) -> SyncPipeline<E2> {
        SyncPipeline {
            source: self.source,
            store: self.store,
            hasher: self.hasher,
            credentials: self.credentials,
            executor,
            settings: self.settings,
        }
    }

    pub async fn run_once(&self) -> Result<SyncRunStats> {
        let run_id = Uuid::new_v4();
        let span = info_span!("roster_sync", %run_id);
        self.execute(run_id).instrument(span).await
    }

    async fn execute(&self, run_id: Uuid) -> Result<SyncRunStats> {
        let mut stats = SyncRunStats::new(run_id, Utc::now());
        info!("roster sync starting");

        let raw = self
            .source
            .fetch_all()
            .await
            .context("fetching subscriptions")?;

        let classification = classify(raw, &self.settings.allow_list);
        stats.total_subscriptions = classification.total;
        stats.allowed_subscriptions = classification.allowed;
        stats.unique_contacts = classification.unique_contacts();
        stats.active = classification.active.len();
        stats.inactive = classification.inactive.len();
        info!(
            total = stats.total_subscriptions,
            allowed = stats.allowed_subscriptions,
            active = stats.active,
            inactive = stats.inactive,
            "subscriptions classified"
        );

        let store = self.store.as_ref();
        let teacher = ensure_default_teacher(
            store,
            self.hasher.as_ref(),
            &self.settings.default_teacher_email,
        )
        .await?;

        let classes = reconcile_classes(store, &classification.active, teacher.id).await;
        stats.classes_created = classes.created;
        stats.classes_found = classes.found;
        stats.errors.extend(classes.errors);

        let reconciler = StudentReconciler::new(
            store,
            self.hasher.as_ref(),
            self.credentials.as_ref(),
            &self.executor,
            self.settings.batch_size,
        );

        let active = reconciler
            .reconcile_active(&classification.active, &classes.classes)
            .await;
        stats.students_created = active.created;
        stats.students_updated = active.updated;
        stats.students_unchanged = active.unchanged;
        stats.skipped_without_class = active.skipped_without_class;
        stats.errors.extend(active.errors);

        let inactive = reconciler.reconcile_inactive(&classification.inactive).await;
        stats.students_deleted = inactive.deleted;
        stats.errors.extend(inactive.errors);

        stats.finished_at = Some(Utc::now());
        info!(
            classes_created = stats.classes_created,
            students_created = stats.students_created,
            students_updated = stats.students_updated,
            students_unchanged = stats.students_unchanged,
            students_deleted = stats.students_deleted,
            errors = stats.errors.len(),
            "roster sync finished"
        );
        Ok(stats)
    }
}

#[async_trait]
impl<E: BatchExecutor> SyncJob for SyncPipeline<E> {
    async fn run(&self) -> Result<SyncRunStats> {
        self.run_once().await
    }
}
