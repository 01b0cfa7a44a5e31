use std::sync::Arc;
use std::time::Instant;

use crate::job::Job;
use crate::middleware::{self, Middleware};
use crate::middleware::transaction::AtomicScope;
use crate::task::TaskRegistry;

/// Runs a single job to completion: resolves it against the registry, wraps
/// it in an atomic scope if the task asks for one, and drives the
/// middleware chain around it. Exceptions never propagate out of `run` -
/// they're converted into a `process_exception` pass and a `false` return,
/// exactly as `Job.run` does in the source system.
pub struct JobExecutor {
    registry: Arc<TaskRegistry>,
    middleware: Vec<Box<dyn Middleware>>,
    atomic_scope: Arc<dyn AtomicScope>,
}

impl JobExecutor {
    pub fn new(
        registry: Arc<TaskRegistry>,
        middleware: Vec<Box<dyn Middleware>>,
        atomic_scope: Arc<dyn AtomicScope>,
    ) -> Self {
        JobExecutor {
            registry,
            middleware,
            atomic_scope,
        }
    }

    pub async fn run(&self, job: &Job) -> bool {
        let start = Instant::now();

        middleware::run_process_job(&self.middleware, job).await;

        let task = match self.registry.resolve(&job.path) {
            Ok(task) => task,
            Err(err) => {
                let duration = start.elapsed();
                let error = anyhow::anyhow!(err);
                middleware::run_process_exception(&self.middleware, job, duration, &error).await;
                return false;
            }
        };

        let atomic = self
            .registry
            .options(&job.path)
            .map(|o| o.atomic)
            .unwrap_or(false);

        let result = if atomic {
            self.run_atomic(task, job).await
        } else {
            task.call(job.args.clone(), job.kwargs.clone()).await
        };

        let duration = start.elapsed();

        match result {
            Ok(()) => {
                middleware::run_process_result(
                    &self.middleware,
                    job,
                    &serde_json::Value::Null,
                    duration,
                )
                .await;
                true
            }
            Err(err) => {
                middleware::run_process_exception(&self.middleware, job, duration, &err).await;
                false
            }
        }
    }

    async fn run_atomic(&self, task: &dyn crate::task::TaskFn, job: &Job) -> anyhow::Result<()> {
        self.atomic_scope.begin().await?;
        match task.call(job.args.clone(), job.kwargs.clone()).await {
            Ok(()) => {
                self.atomic_scope.commit().await?;
                Ok(())
            }
            Err(err) => {
                // Best-effort: the original error is what the caller needs to see,
                // so a rollback failure is logged rather than replacing it.
                if let Err(rollback_err) = self.atomic_scope.rollback().await {
                    tracing::error!(error = %rollback_err, "rollback failed after job error");
                }
                Err(err)
            }
        }
    }
}
