use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;

use crate::error::Result;
use crate::job::{Job, JobId};
use crate::redis_pool::RedisPool;
use crate::types::{QueueName, WorkerNumber};

use super::redis_backend::prefixed;
use super::{Backend, BackendWithClear, BackendWithDeduplicate, BackendWithPause, BackendWithPauseResume, DeduplicateResult};

const RECONCILE_RETRIES: u32 = 5;

/// Manages a per-queue-per-worker "processing" list. A job is moved off
/// the main list into a worker's processing list via `BRPOPLPUSH`
/// atomically; it only leaves the processing list once the worker
/// confirms it finished via [`Backend::processed_job`]. If a worker
/// crashes mid-job the job sits in its processing list until `startup`
/// next reconciles it back onto the main list - this backend has
/// at-least-once semantics, unlike [`super::redis_backend::RedisBackend`].
pub struct ReliableRedisBackend {
    pool: RedisPool,
    expected_worker_counts: HashMap<QueueName, u32>,
}

impl ReliableRedisBackend {
    pub fn new(pool: RedisPool, expected_worker_counts: HashMap<QueueName, u32>) -> Self {
        ReliableRedisBackend {
            pool,
            expected_worker_counts,
        }
    }

    fn key(&self, queue: &QueueName) -> String {
        prefixed(self.pool.key_prefix(), &format!("django_lightweight_queue:{}", queue))
    }

    fn pause_key(&self, queue: &QueueName) -> String {
        format!("{}:pause", self.key(queue))
    }

    fn processing_key(&self, queue: &QueueName, worker_number: WorkerNumber) -> String {
        format!("{}:processing:{}", self.key(queue), worker_number)
    }

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

#[async_trait]
impl Backend for ReliableRedisBackend {
    /// Moves jobs stranded in processing lists with no corresponding live
    /// worker back onto the main queue, so lowering a queue's worker count
    /// (or a prior crash) doesn't lose them. Races against workers on
    /// other machines validly repopulating their own processing lists, so
    /// the move is done inside a WATCH/MULTI transaction retried a bounded
    /// number of times on conflict.
    async fn startup(&self, queue: &QueueName) -> Result<()> {
        let mut conn = self.pool.get().await?;

        let pattern = prefixed(
            self.pool.key_prefix(),
            &format!("django_lightweight_queue:{}:processing:*", queue),
        );
        let current_keys: Vec<String> = conn.keys(&pattern).await?;

        let expected_count = self.expected_worker_counts.get(queue).copied().unwrap_or(1);
        let expected_keys: std::collections::HashSet<String> = (1..=expected_count)
            .map(|n| self.processing_key(queue, WorkerNumber(n)))
            .collect();

        let stale_keys: Vec<String> = current_keys
            .into_iter()
            .filter(|k| !expected_keys.contains(k))
            .collect();

        if stale_keys.is_empty() {
            return Ok(());
        }

        let main_key = self.key(queue);

        for attempt in 0..RECONCILE_RETRIES {
            let () = redis::cmd("WATCH")
                .arg(&stale_keys)
                .query_async(&mut *conn)
                .await?;

            let mut all_data: Vec<Vec<u8>> = Vec::new();
            for key in &stale_keys {
                let mut data: Vec<Vec<u8>> = conn.lrange(key, 0, -1).await?;
                all_data.append(&mut data);
            }

            let mut pipe = redis::pipe();
            pipe.atomic();
            if !all_data.is_empty() {
                pipe.rpush(&main_key, &all_data);
            }
            for key in &stale_keys {
                pipe.del(key);
            }

            let result: redis::RedisResult<()> = pipe.query_async(&mut *conn).await;
            match result {
                Ok(()) => return Ok(()),
                Err(err) if attempt + 1 < RECONCILE_RETRIES => {
                    tracing::warn!(error = %err, attempt, "processing-queue reconciliation conflict, retrying");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }

    async fn enqueue(&self, job: &Job, queue: &QueueName) -> Result<()> {
        self.bulk_enqueue(std::slice::from_ref(job), queue).await
    }

    async fn bulk_enqueue(&self, jobs: &[Job], queue: &QueueName) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let data: Result<Vec<Vec<u8>>> = jobs.iter().map(|j| j.to_json()).collect();
        conn.lpush(self.key(queue), data?).await?;
        Ok(())
    }

    async fn dequeue(
        &self,
        queue: &QueueName,
        worker_number: WorkerNumber,
        timeout: u64,
    ) -> Result<Option<Job>> {
        if self.is_paused(queue).await? {
            self.block_while_paused(queue, timeout).await?;
            return Ok(None);
        }

        let mut conn = self.pool.get().await?;
        let processing_key = self.processing_key(queue, worker_number);

        // Catch a job left behind by a previous crash of this exact worker
        // before blocking on the main queue - different purpose than the
        // reconciliation `startup` does.
        let leftover: Option<Vec<u8>> = conn.lindex(&processing_key, -1).await?;
        if let Some(data) = leftover {
            return Ok(Some(Job::from_json(JobId::Auto, &data)?));
        }

        let data: Option<Vec<u8>> = conn
            .brpoplpush(self.key(queue), &processing_key, timeout as usize)
            .await?;

        match data {
            Some(data) => Ok(Some(Job::from_json(JobId::Auto, &data)?)),
            None => Ok(None),
        }
    }

    async fn length(&self, queue: &QueueName) -> Result<u64> {
        let mut conn = self.pool.get().await?;
        let len: u64 = conn.llen(self.key(queue)).await?;
        Ok(len)
    }

    async fn processed_job(&self, queue: &QueueName, worker_num: WorkerNumber, job: &Job) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let data = job.to_json()?;
        let _: i64 = conn
            .lrem(self.processing_key(queue, worker_num), 1, data)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BackendWithClear for ReliableRedisBackend {
    async fn clear(&self, queue: &QueueName) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.del(self.key(queue)).await?;
        Ok(())
    }
}

#[async_trait]
impl BackendWithPause for ReliableRedisBackend {
    async fn pause(&self, queue: &QueueName, until: DateTime<Utc>) -> Result<()> {
        if until <= Utc::now() {
            return Err(crate::error::Error::PauseInThePast);
        }
        let mut conn = self.pool.get().await?;
        let remaining = (until - Utc::now()).num_seconds().max(0) as usize;
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
impl BackendWithPauseResume for ReliableRedisBackend {
    async fn resume(&self, queue: &QueueName) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.del(self.pause_key(queue)).await?;
        Ok(())
    }
}

#[async_trait]
impl BackendWithDeduplicate for ReliableRedisBackend {
    /// Removes duplicate jobs from `queue`, comparing by
    /// [`Job::identity_without_created`] so jobs that differ only by
    /// timestamp still count as duplicates. The oldest copy of each
    /// duplicate group is kept. Returns `(original_size, new_size)`.
    async fn deduplicate(&self, queue: &QueueName) -> Result<DeduplicateResult> {
        let main_key = self.key(queue);
        let mut conn = self.pool.get().await?;

        let original_size: u64 = conn.llen(&main_key).await?;
        if original_size == 0 {
            return Ok((0, 0));
        }

        let raw_jobs: Vec<Vec<u8>> = conn.lrange(&main_key, 0, -1).await?;

        // Newest-first, since LRANGE on a list built with LPUSH returns
        // newest-to-oldest; group by identity so we can keep the last
        // (oldest) entry of each group below.
        let mut groups: HashMap<(String, String, String, Option<u64>, bool), Vec<Vec<u8>>> = HashMap::new();
        for raw in &raw_jobs {
            let job = Job::from_json(JobId::Auto, raw)?;
            groups
                .entry(job.identity_without_created())
                .or_default()
                .push(raw.clone());
        }

        for raw_group in groups.values() {
            for raw in &raw_group[..raw_group.len().saturating_sub(1)] {
                let _: i64 = conn.lrem(&main_key, 1, raw.clone()).await?;
            }
        }

        let new_size: u64 = conn.llen(&main_key).await?;
        Ok((original_size, new_size))
    }
}
