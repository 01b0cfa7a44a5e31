use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::job::Job;

use super::Middleware;

/// The default middleware: logs a job's start, successful completion, and
/// any exception, via `tracing` rather than the source's bare `print`.
#[derive(Debug, Default)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn process_job(&self, job: &Job) -> anyhow::Result<()> {
        tracing::info!(
            path = %job.path,
            args = %serde_json::to_string(&job.args).unwrap_or_default(),
            kwargs = %serde_json::to_string(&job.kwargs).unwrap_or_default(),
            "running job"
        );
        Ok(())
    }

    async fn process_result(&self, job: &Job, result: &Value, duration: Duration) -> anyhow::Result<()> {
        tracing::info!(
            path = %job.path,
            result = %result,
            duration_secs = duration.as_secs_f64(),
            "finished job"
        );
        Ok(())
    }

    async fn process_exception(
        &self,
        job: &Job,
        duration: Duration,
        error: &anyhow::Error,
    ) -> anyhow::Result<()> {
        tracing::error!(
            path = %job.path,
            duration_secs = duration.as_secs_f64(),
            error = %error,
            "job failed"
        );
        Ok(())
    }
}
