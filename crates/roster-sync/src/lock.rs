//! Single-flight run locks. Holding a [`RunLease`] means no other sync may start.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

/// Advisory lock key shared by every replica ("roster" in ASCII).
pub const ADVISORY_LOCK_KEY: i64 = 0x726f_7374_6572;

#[async_trait]
pub trait RunLock: Send + Sync {
    /// `Ok(None)` means another run currently holds the lock.
    async fn try_acquire(&self) -> Result<Option<RunLease>>;

    fn describe(&self) -> &'static str;
}

/// Proof of lock ownership. Dropping it releases the lock, whatever way the run ended.
pub struct RunLease {
    inner: LeaseInner,
}

enum LeaseInner {
    Local(LocalRelease),
    Postgres(Transaction<'static, Postgres>),
}

impl RunLease {
    /// Release eagerly. For the Postgres lock this rolls back the holding transaction now
    /// instead of when the connection is next reused.
    pub async fn release(self) -> Result<()> {
        match self.inner {
            LeaseInner::Local(release) => {
                drop(release);
                Ok(())
            }
            LeaseInner::Postgres(tx) => tx.rollback().await.context("releasing advisory lock"),
        }
    }
}

struct LocalRelease(Arc<AtomicBool>);

impl Drop for LocalRelease {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// In-process flag. Guarantees one run per process only.
#[derive(Debug, Clone, Default)]
pub struct LocalRunLock {
    held: Arc<AtomicBool>,
}

impl LocalRunLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

#[async_trait]
impl RunLock for LocalRunLock {
    async fn try_acquire(&self) -> Result<Option<RunLease>> {
        if self
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(None);
        }
        Ok(Some(RunLease {
            inner: LeaseInner::Local(LocalRelease(self.held.clone())),
        }))
    }

    fn describe(&self) -> &'static str {
        "local"
    }
}

/// Transaction-scoped Postgres advisory lock, so replicas sharing the roster database never
/// run concurrently.
#[derive(Debug, Clone)]
pub struct PgAdvisoryRunLock {
    pool: PgPool,
    key: i64,
}

impl PgAdvisoryRunLock {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            key: ADVISORY_LOCK_KEY,
        }
    }

    pub fn with_key(mut self, key: i64) -> Self {
        self.key = key;
        self
    }
}

#[async_trait]
impl RunLock for PgAdvisoryRunLock {
    async fn try_acquire(&self) -> Result<Option<RunLease>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("opening advisory lock transaction")?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
            .bind(self.key)
            .fetch_one(&mut *tx)
            .await
            .context("requesting advisory lock")?;
        if !acquired {
            tx.rollback().await.context("closing advisory lock transaction")?;
            return Ok(None);
        }
        Ok(Some(RunLease {
            inner: LeaseInner::Postgres(tx),
        }))
    }

    fn describe(&self) -> &'static str {
        "postgres-advisory"
    }
}
