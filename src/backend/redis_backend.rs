use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;

use crate::error::Result;
use crate::job::{Job, JobId};
use crate::redis_pool::RedisPool;
use crate::types::{QueueName, WorkerNumber};

use super::{Backend, BackendWithClear, BackendWithPause, BackendWithPauseResume};

/// At-most-once Redis backend. A crash between BRPOP returning and the job
/// finishing loses the job - there is no processing list to recover it
/// from. See [`super::reliable_redis::ReliableRedisBackend`] for an
/// at-least-once alternative.
pub struct RedisBackend {
    pool: RedisPool,
}

impl RedisBackend {
    pub fn new(pool: RedisPool) -> Self {
        RedisBackend { pool }
    }

    fn key(&self, queue: &QueueName) -> String {
        prefixed(self.pool.key_prefix(), &format!("django_lightweight_queue:{}", queue))
    }

    fn pause_key(&self, queue: &QueueName) -> String {
        format!("{}:pause", self.key(queue))
    }

    /// Cooperative wait used when `dequeue` observes the pause marker:
    /// polls until either the marker disappears or `timeout` seconds have
    /// elapsed, then returns without touching the main list.
    async fn block_while_paused(&self, queue: &QueueName, timeout: u64) -> Result<()> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout);
        const CHECK_FREQUENCY: Duration = Duration::from_secs(5);

        while self.is_paused(queue).await? {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(CHECK_FREQUENCY.min(deadline - now)).await;
        }
        Ok(())
    }
}

pub(super) fn prefixed(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, key),
        _ => key.to_string(),
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn enqueue(&self, job: &Job, queue: &QueueName) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let data = job.to_json()?;
        conn.lpush(self.key(queue), data).await?;
        Ok(())
    }

    async fn dequeue(
        &self,
        queue: &QueueName,
        _worker_num: WorkerNumber,
        timeout: u64,
    ) -> Result<Option<Job>> {
        if self.is_paused(queue).await? {
            self.block_while_paused(queue, timeout).await?;
            return Ok(None);
        }

        let mut conn = self.pool.get().await?;
        let result: Option<(String, Vec<u8>)> = conn.brpop(self.key(queue), timeout as usize).await?;
        match result {
            Some((_, data)) => Ok(Some(Job::from_json(JobId::Auto, &data)?)),
            None => Ok(None),
        }
    }

    async fn length(&self, queue: &QueueName) -> Result<u64> {
        let mut conn = self.pool.get().await?;
        let len: u64 = conn.llen(self.key(queue)).await?;
        Ok(len)
    }
}

#[async_trait]
impl BackendWithClear for RedisBackend {
    async fn clear(&self, queue: &QueueName) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.del(self.key(queue)).await?;
        Ok(())
    }
}

#[async_trait]
impl BackendWithPause for RedisBackend {
    async fn pause(&self, queue: &QueueName, until: DateTime<Utc>) -> Result<()> {
        if until <= Utc::now() {
            return Err(crate::error::Error::PauseInThePast);
        }
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let remaining = (until - now).num_seconds().max(0) as usize;
        let value = until.format("%Y-%m-%d %H:%M:%S%.6f").to_string();
        conn.set_ex(self.pause_key(queue), value, remaining).await?;
        Ok(())
    }

    async fn is_paused(&self, queue: &QueueName) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let exists: bool = conn.exists(self.pause_key(queue)).await?;
        Ok(exists)
    }
}

#[async_trait]
impl BackendWithPauseResume for RedisBackend {
    async fn resume(&self, queue: &QueueName) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.del(self.pause_key(queue)).await?;
        Ok(())
    }
}
