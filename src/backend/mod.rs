pub mod reliable_redis;
pub mod redis_backend;
pub mod synchronous;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::job::Job;
use crate::types::{QueueName, WorkerNumber};

/// The operations every queue backend must support.
///
/// Mirrors the source system's `BaseBackend` ABC: `startup` and
/// `processed_job` default to no-ops, `bulk_enqueue` defaults to a loop
/// over `enqueue` (a backend that can do better should override it), and
/// the rest are required.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn startup(&self, _queue: &QueueName) -> Result<()> {
        Ok(())
    }

    async fn enqueue(&self, job: &Job, queue: &QueueName) -> Result<()>;

    async fn bulk_enqueue(&self, jobs: &[Job], queue: &QueueName) -> Result<()> {
        for job in jobs {
            self.enqueue(job, queue).await?;
        }
        Ok(())
    }

    async fn dequeue(
        &self,
        queue: &QueueName,
        worker_num: WorkerNumber,
        timeout: u64,
    ) -> Result<Option<Job>>;

    async fn length(&self, queue: &QueueName) -> Result<u64>;

    async fn processed_job(&self, _queue: &QueueName, _worker_num: WorkerNumber, _job: &Job) -> Result<()> {
        Ok(())
    }
}

/// Result of [`BackendWithDeduplicate::deduplicate`]: `(original_size, new_size)`.
pub type DeduplicateResult = (u64, u64);

#[async_trait]
pub trait BackendWithDeduplicate: Backend {
    async fn deduplicate(&self, queue: &QueueName) -> Result<DeduplicateResult>;
}

#[async_trait]
pub trait BackendWithClear: Backend {
    async fn clear(&self, queue: &QueueName) -> Result<()>;
}

#[async_trait]
pub trait BackendWithPause: Backend {
    async fn pause(&self, queue: &QueueName, until: DateTime<Utc>) -> Result<()>;
    async fn is_paused(&self, queue: &QueueName) -> Result<bool>;
}

#[async_trait]
pub trait BackendWithPauseResume: BackendWithPause {
    async fn resume(&self, queue: &QueueName) -> Result<()>;
}

/// Returned by a backend that doesn't implement an optional capability,
/// when something up the stack (a CLI subcommand, typically) asks for it
/// anyway.
pub fn unsupported(backend: &'static str, capability: &'static str) -> Error {
    Error::UnsupportedCapability { backend, capability }
}

/// The well-known backend names recognised by `QUEUE_BACKEND` /
/// `QUEUE_BACKEND_OVERRIDES`, mirroring the source system's dotted
/// `BACKEND` import paths (`...backends.synchronous.SynchronousBackend`
/// etc), collapsed to short names since this crate has no dynamic import
/// mechanism to key off of.
pub async fn build(
    name: &str,
    settings: &crate::settings::Settings,
    queue: &QueueName,
    executor: std::sync::Arc<crate::executor::JobExecutor>,
) -> Result<std::sync::Arc<dyn Backend>> {
    match name {
        "synchronous" => Ok(std::sync::Arc::new(synchronous::SynchronousBackend::new(executor))),
        "redis" => {
            let pool = crate::redis_pool::RedisPool::new(&settings.redis)?;
            Ok(std::sync::Arc::new(redis_backend::RedisBackend::new(pool)))
        }
        "reliable_redis" => {
            let pool = crate::redis_pool::RedisPool::new(&settings.redis)?;
            let counts = settings.get_queue_counts();
            Ok(std::sync::Arc::new(reliable_redis::ReliableRedisBackend::new(
                pool, counts,
            )))
        }
        other => Err(Error::ConfigError(format!(
            "unknown backend '{}' for queue '{}'",
            other, queue
        ))),
    }
}

/// Like [`build`], but for CLI subcommands that need a specific optional
/// capability. Returns [`Error::UnsupportedCapability`] when the configured
/// backend is real but doesn't implement it, and [`Error::ConfigError`] when
/// the name itself isn't recognised.
pub async fn build_with_pause(
    name: &str,
    settings: &crate::settings::Settings,
    queue: &QueueName,
) -> Result<std::sync::Arc<dyn BackendWithPause>> {
    match name {
        "synchronous" => Err(unsupported("synchronous", "pausing")),
        "redis" => {
            let pool = crate::redis_pool::RedisPool::new(&settings.redis)?;
            Ok(std::sync::Arc::new(redis_backend::RedisBackend::new(pool)))
        }
        "reliable_redis" => {
            let pool = crate::redis_pool::RedisPool::new(&settings.redis)?;
            let counts = settings.get_queue_counts();
            Ok(std::sync::Arc::new(reliable_redis::ReliableRedisBackend::new(
                pool, counts,
            )))
        }
        other => Err(Error::ConfigError(format!(
            "unknown backend '{}' for queue '{}'",
            other, queue
        ))),
    }
}

pub async fn build_with_pause_resume(
    name: &str,
    settings: &crate::settings::Settings,
    queue: &QueueName,
) -> Result<std::sync::Arc<dyn BackendWithPauseResume>> {
    match name {
        "synchronous" => Err(unsupported("synchronous", "resuming")),
        "redis" => {
            let pool = crate::redis_pool::RedisPool::new(&settings.redis)?;
            Ok(std::sync::Arc::new(redis_backend::RedisBackend::new(pool)))
        }
        "reliable_redis" => {
            let pool = crate::redis_pool::RedisPool::new(&settings.redis)?;
            let counts = settings.get_queue_counts();
            Ok(std::sync::Arc::new(reliable_redis::ReliableRedisBackend::new(
                pool, counts,
            )))
        }
        other => Err(Error::ConfigError(format!(
            "unknown backend '{}' for queue '{}'",
            other, queue
        ))),
    }
}

pub async fn build_with_clear(
    name: &str,
    settings: &crate::settings::Settings,
    queue: &QueueName,
) -> Result<std::sync::Arc<dyn BackendWithClear>> {
    match name {
        "synchronous" => Err(unsupported("synchronous", "clearing")),
        "redis" => {
            let pool = crate::redis_pool::RedisPool::new(&settings.redis)?;
            Ok(std::sync::Arc::new(redis_backend::RedisBackend::new(pool)))
        }
        "reliable_redis" => {
            let pool = crate::redis_pool::RedisPool::new(&settings.redis)?;
            let counts = settings.get_queue_counts();
            Ok(std::sync::Arc::new(reliable_redis::ReliableRedisBackend::new(
                pool, counts,
            )))
        }
        other => Err(Error::ConfigError(format!(
            "unknown backend '{}' for queue '{}'",
            other, queue
        ))),
    }
}

pub async fn build_with_deduplicate(
    name: &str,
    settings: &crate::settings::Settings,
    queue: &QueueName,
) -> Result<std::sync::Arc<dyn BackendWithDeduplicate>> {
    match name {
        "synchronous" => Err(unsupported("synchronous", "deduplication")),
        "redis" => Err(unsupported("redis", "deduplication")),
        "reliable_redis" => {
            let pool = crate::redis_pool::RedisPool::new(&settings.redis)?;
            let counts = settings.get_queue_counts();
            Ok(std::sync::Arc::new(reliable_redis::ReliableRedisBackend::new(
                pool, counts,
            )))
        }
        other => Err(Error::ConfigError(format!(
            "unknown backend '{}' for queue '{}'",
            other, queue
        ))),
    }
}
