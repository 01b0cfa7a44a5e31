pub mod logging;
pub mod transaction;

use async_trait::async_trait;
use serde_json::Value;

use crate::job::Job;

/// Hooks invoked around every job's execution.
///
/// Default method bodies are Rust's replacement for the source system's
/// `hasattr(instance, 'process_job')` probing: a middleware only overrides
/// the hooks it cares about. Each hook returns a `Result` so a failure can
/// be logged and isolated by the caller instead of, as in the source,
/// silently propagating out of a `for` loop over middleware instances.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn process_job(&self, _job: &Job) -> anyhow::Result<()> {
        Ok(())
    }

    async fn process_result(
        &self,
        _job: &Job,
        _result: &Value,
        _duration: std::time::Duration,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn process_exception(
        &self,
        _job: &Job,
        _duration: std::time::Duration,
        _error: &anyhow::Error,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Runs `process_job` for every middleware, in order, isolating each
/// failure so one broken middleware cannot stop the rest from seeing the
/// job.
pub async fn run_process_job(middleware: &[Box<dyn Middleware>], job: &Job) {
    for instance in middleware {
        if let Err(err) = instance.process_job(job).await {
            tracing::error!(error = %err, job = %job.path, "middleware process_job failed");
        }
    }
}

/// Runs in reverse order, same as [`run_process_exception`]: the
/// middleware entered last is innermost around the job and should see its
/// result first.
pub async fn run_process_result(
    middleware: &[Box<dyn Middleware>],
    job: &Job,
    result: &Value,
    duration: std::time::Duration,
) {
    for instance in middleware.iter().rev() {
        if let Err(err) = instance.process_result(job, result, duration).await {
            tracing::error!(error = %err, job = %job.path, "middleware process_result failed");
        }
    }
}

/// Runs in reverse order, so the middleware that entered last (and is
/// therefore innermost around the failing job) sees the exception first -
/// mirroring a context-manager-style unwind.
pub async fn run_process_exception(
    middleware: &[Box<dyn Middleware>],
    job: &Job,
    duration: std::time::Duration,
    error: &anyhow::Error,
) {
    for instance in middleware.iter().rev() {
        if let Err(err) = instance.process_exception(job, duration, error).await {
            tracing::error!(error = %err, job = %job.path, "middleware process_exception failed");
        }
    }
}
