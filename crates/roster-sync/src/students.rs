//! Student create/update/delete reconciliation against the classified subscription set.

use anyhow::{Context, Result};
use async_trait::async_trait;
use roster_core::{NewStudent, StudentUpdate, Subscription};
use roster_storage::{PasswordHasher, StudentRepository};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::classes::ClassMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialCredentials {
    pub enrollment_number: Option<String>,
    pub password: String,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("contact has no identification document")]
    MissingDocument,
}

/// Derives the enrollment number and first password for a newly provisioned student.
pub trait CredentialPolicy: Send + Sync {
    fn derive(&self, sub: &Subscription) -> Result<InitialCredentials, CredentialError>;
}

/// Uses the contact's national identification number as both enrollment number and initial
/// password.
#[derive(Debug, Clone, Default)]
pub struct DocumentCredentialPolicy;

impl CredentialPolicy for DocumentCredentialPolicy {
    fn derive(&self, sub: &Subscription) -> Result<InitialCredentials, CredentialError> {
        let doc = sub
            .contact
            .doc
            .as_deref()
            .map(str::trim)
            .filter(|doc| !doc.is_empty())
            .ok_or(CredentialError::MissingDocument)?;
        Ok(InitialCredentials {
            enrollment_number: Some(doc.to_string()),
            password: doc.to_string(),
        })
    }
}

/// Work applied to a single subscription during a reconciliation pass.
#[async_trait]
pub trait ItemHandler: Send + Sync {
    type Outcome: Send;

    async fn handle(&self, sub: &Subscription) -> Result<Self::Outcome>;
}

/// Runs one batch of items through a handler, returning results in input order.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    async fn process_batch<H>(&self, handler: &H, batch: &[Subscription]) -> Vec<Result<H::Outcome>>
    where
        H: ItemHandler;
}

/// Processes items strictly one after another.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialExecutor;

#[async_trait]
impl BatchExecutor for SequentialExecutor {
    async fn process_batch<H>(&self, handler: &H, batch: &[Subscription]) -> Vec<Result<H::Outcome>>
    where
        H: ItemHandler,
    {
        let mut results = Vec::with_capacity(batch.len());
        for sub in batch {
            results.push(handler.handle(sub).await);
        }
        results
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveOutcome {
    Created,
    Updated,
    Unchanged,
    SkippedWithoutClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InactiveOutcome {
    Deleted,
    Absent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivePassOutcome {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped_without_class: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InactivePassOutcome {
    pub deleted: usize,
    pub absent: usize,
    pub errors: Vec<String>,
}

fn display_name(sub: &Subscription, email: &str) -> String {
    sub.contact
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| email.split('@').next().unwrap_or(email).to_string())
}

pub struct ActiveStudentHandler<'a, S: ?Sized> {
    store: &'a S,
    hasher: &'a dyn PasswordHasher,
    credentials: &'a dyn CredentialPolicy,
    classes: &'a ClassMap,
}

#[async_trait]
impl<'a, S> ItemHandler for ActiveStudentHandler<'a, S>
where
    S: StudentRepository + ?Sized,
{
    type Outcome = ActiveOutcome;

    async fn handle(&self, sub: &Subscription) -> Result<ActiveOutcome> {
        let email = sub.normalized_email().context("subscription has no contact email")?;
        let class_id = match sub.product_name().and_then(|name| self.classes.get(name)) {
            Some(id) => *id,
            None => {
                warn!(
                    subscription = sub.id.as_deref().unwrap_or_default(),
                    %email,
                    product = sub.product_name().unwrap_or_default(),
                    "no class for subscription product; skipping student"
                );
                return Ok(ActiveOutcome::SkippedWithoutClass);
            }
        };

        match self.store.find_student_by_email(&email).await? {
            None => {
                let credentials = self.credentials.derive(sub)?;
                let password_hash = self.hasher.hash(&credentials.password)?;
                self.store
                    .create_student(NewStudent {
                        email: email.clone(),
                        password_hash,
                        full_name: display_name(sub, &email),
                        enrollment_number: credentials.enrollment_number,
                        class_id: Some(class_id),
                    })
                    .await?;
                Ok(ActiveOutcome::Created)
            }
            Some(existing) if existing.class_id == Some(class_id) => Ok(ActiveOutcome::Unchanged),
            Some(existing) => {
                self.store
                    .update_student(
                        existing.id,
                        StudentUpdate {
                            class_id: Some(class_id),
                        },
                    )
                    .await?;
                Ok(ActiveOutcome::Updated)
            }
        }
    }
}

pub struct InactiveStudentHandler<'a, S: ?Sized> {
    store: &'a S,
}

#[async_trait]
impl<'a, S> ItemHandler for InactiveStudentHandler<'a, S>
where
    S: StudentRepository + ?Sized,
{
    type Outcome = InactiveOutcome;

    async fn handle(&self, sub: &Subscription) -> Result<InactiveOutcome> {
        let email = sub.normalized_email().context("subscription has no contact email")?;
        match self.store.find_student_by_email(&email).await? {
            Some(student) => {
                self.store.delete_student(student.id).await?;
                Ok(InactiveOutcome::Deleted)
            }
            None => Ok(InactiveOutcome::Absent),
        }
    }
}

/// Walks the active and inactive groups in fixed-size batches.
///
/// The batch size only controls progress logging granularity; the executor decides how the
/// items inside a batch are scheduled.
pub struct StudentReconciler<'a, S: ?Sized, E> {
    store: &'a S,
    hasher: &'a dyn PasswordHasher,
    credentials: &'a dyn CredentialPolicy,
    executor: &'a E,
    batch_size: usize,
}

impl<'a, S, E> StudentReconciler<'a, S, E>
where
    S: StudentRepository + ?Sized,
    E: BatchExecutor,
{
    pub fn new(
        store: &'a S,
        hasher: &'a dyn PasswordHasher,
        credentials: &'a dyn CredentialPolicy,
        executor: &'a E,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            hasher,
            credentials,
            executor,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn reconcile_active(&self, active: &[Subscription], classes: &ClassMap) -> ActivePassOutcome {
        let handler = ActiveStudentHandler {
            store: self.store,
            hasher: self.hasher,
            credentials: self.credentials,
            classes,
        };
        let mut out = ActivePassOutcome::default();
        let batches = active.len().div_ceil(self.batch_size);

        for (index, batch) in active.chunks(self.batch_size).enumerate() {
            let results = self.executor.process_batch(&handler, batch).await;
            for (sub, result) in batch.iter().zip(results) {
                match result {
                    Ok(ActiveOutcome::Created) => out.created += 1,
                    Ok(ActiveOutcome::Updated) => out.updated += 1,
                    Ok(ActiveOutcome::Unchanged) => out.unchanged += 1,
                    Ok(ActiveOutcome::SkippedWithoutClass) => out.skipped_without_class += 1,
                    Err(err) => {
                        error!(item = %sub.label(), error = %format!("{err:#}"), "active student reconciliation failed");
                        out.errors.push(format!("{}: {err:#}", sub.label()));
                    }
                }
            }
            info!(
                batch = index + 1,
                batches,
                processed = (index * self.batch_size + batch.len()),
                total = active.len(),
                "active pass progress"
            );
        }

        info!(
            created = out.created,
            updated = out.updated,
            unchanged = out.unchanged,
            skipped = out.skipped_without_class,
            errors = out.errors.len(),
            "active pass finished"
        );
        out
    }

    pub async fn reconcile_inactive(&self, inactive: &[Subscription]) -> InactivePassOutcome {
        let handler = InactiveStudentHandler { store: self.store };
        let mut out = InactivePassOutcome::default();
        let batches = inactive.len().div_ceil(self.batch_size);

        for (index, batch) in inactive.chunks(self.batch_size).enumerate() {
            let results = self.executor.process_batch(&handler, batch).await;
            for (sub, result) in batch.iter().zip(results) {
                match result {
                    Ok(InactiveOutcome::Deleted) => out.deleted += 1,
                    Ok(InactiveOutcome::Absent) => out.absent += 1,
                    Err(err) => {
                        error!(item = %sub.label(), error = %format!("{err:#}"), "inactive student removal failed");
                        out.errors.push(format!("{}: {err:#}", sub.label()));
                    }
                }
            }
            info!(
                batch = index + 1,
                batches,
                processed = (index * self.batch_size + batch.len()),
                total = inactive.len(),
                "inactive pass progress"
            );
        }

        info!(
            deleted = out.deleted,
            absent = out.absent,
            errors = out.errors.len(),
            "inactive pass finished"
        );
        out
    }
}
