use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::job::Job;

use super::Middleware;

/// The host-supplied half of the legacy atomic-transaction middleware: a
/// begin/commit/rollback hook triple standing in for the host ORM's
/// transaction boundary, which is out of scope for this crate.
#[async_trait]
pub trait AtomicScope: Send + Sync {
    async fn begin(&self) -> anyhow::Result<()>;
    async fn commit(&self) -> anyhow::Result<()>;
    async fn rollback(&self) -> anyhow::Result<()>;
}

/// An `AtomicScope` with no host ORM behind it. Used when a task declares
/// `atomic = true` but nothing needs to actually wrap a database
/// transaction, and as the default when embedding this crate standalone.
#[derive(Debug, Default)]
pub struct NullAtomicScope;

#[async_trait]
impl AtomicScope for NullAtomicScope {
    async fn begin(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn commit(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn rollback(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Deprecated: prefer setting `atomic = true` on the task (or
/// `ATOMIC_JOBS` in settings) instead of installing this middleware.
/// Carried forward from the source system's `TransactionMiddleware` for
/// hosts migrating off it.
pub struct LegacyAtomicMiddleware {
    scope: Box<dyn AtomicScope>,
}

impl LegacyAtomicMiddleware {
    pub fn new(scope: Box<dyn AtomicScope>) -> Self {
        tracing::warn!(
            "using legacy LegacyAtomicMiddleware; set atomic=true on the task instead"
        );
        LegacyAtomicMiddleware { scope }
    }
}

#[async_trait]
impl Middleware for LegacyAtomicMiddleware {
    async fn process_job(&self, _job: &Job) -> anyhow::Result<()> {
        self.scope.begin().await
    }

    async fn process_result(&self, _job: &Job, _result: &Value, _duration: Duration) -> anyhow::Result<()> {
        self.scope.commit().await
    }

    async fn process_exception(
        &self,
        _job: &Job,
        _duration: Duration,
        _error: &anyhow::Error,
    ) -> anyhow::Result<()> {
        self.scope.rollback().await
    }
}
