use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::executor::JobExecutor;
use crate::job::Job;
use crate::types::{QueueName, WorkerNumber};

use super::Backend;

/// Runs every enqueued job inline, on the calling task, with at-most-once
/// semantics (a crash mid-job loses it). Useful for tests and for hosts
/// that don't want a separate worker process.
///
/// `dequeue` can never produce a job - there's no queue to pull from - so
/// it emulates blocking by sleeping for the requested timeout, exactly as
/// the source backend does.
pub struct SynchronousBackend {
    executor: Arc<JobExecutor>,
}

impl SynchronousBackend {
    pub fn new(executor: Arc<JobExecutor>) -> Self {
        SynchronousBackend { executor }
    }
}

#[async_trait]
impl Backend for SynchronousBackend {
    async fn enqueue(&self, job: &Job, _queue: &QueueName) -> Result<()> {
        self.executor.run(job).await;
        Ok(())
    }

    async fn dequeue(
        &self,
        _queue: &QueueName,
        _worker_num: WorkerNumber,
        timeout: u64,
    ) -> Result<Option<Job>> {
        tokio::time::sleep(Duration::from_secs(timeout)).await;
        Ok(None)
    }

    async fn length(&self, _queue: &QueueName) -> Result<u64> {
        Ok(0)
    }
}
