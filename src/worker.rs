use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

use crate::backend::Backend;
use crate::executor::JobExecutor;
use crate::types::{QueueName, WorkerNumber};

/// Exit policies that bound a worker process's lifetime, so a leaking
/// connection or slow memory creep never accumulates indefinitely - the
/// master simply respawns a worker that exits this way. Configurable
/// rather than hard-coded, unlike the source system's fixed 30
/// minutes/1000 jobs.
#[derive(Debug, Clone, Copy)]
pub struct WorkerLimits {
    pub max_idle: Duration,
    pub max_jobs_processed: u64,
}

impl Default for WorkerLimits {
    fn default() -> Self {
        WorkerLimits {
            max_idle: Duration::from_secs(30 * 60),
            max_jobs_processed: 1000,
        }
    }
}

/// The dequeue timeout passed to `backend.dequeue` on each iteration while
/// idle, matching the source worker's poll interval.
const DEQUEUE_TIMEOUT_SECS: u64 = 15;

/// A single `(queue, worker#)` process's main loop. Owns its own backend
/// instance - backends are never shared across workers.
pub struct Worker {
    queue: QueueName,
    worker_num: WorkerNumber,
    backend: Arc<dyn Backend>,
    executor: Arc<JobExecutor>,
    limits: WorkerLimits,
    touch_file: Option<std::path::PathBuf>,
}

/// Shared state the worker's SIGTERM handler consults to decide whether to
/// terminate immediately or let the in-flight job finish. "Armed" before
/// each dequeued job with that job's own `sigkill_on_stop`, and with
/// `sigkill_on_stop = true` while idle (an idle worker has nothing to lose
/// by dying immediately).
struct CancellationState {
    sigkill_on_stop: AtomicBool,
    running: AtomicBool,
}

impl Worker {
    pub fn new(
        queue: QueueName,
        worker_num: WorkerNumber,
        backend: Arc<dyn Backend>,
        executor: Arc<JobExecutor>,
        limits: WorkerLimits,
        touch_file: Option<std::path::PathBuf>,
    ) -> Self {
        Worker {
            queue,
            worker_num,
            backend,
            executor,
            limits,
            touch_file,
        }
    }

    /// Runs until an exit policy triggers or a shutdown signal is
    /// observed between jobs. Never returns early mid-job: timeouts and
    /// `sigkill_on_stop` terminate the whole process instead of unwinding
    /// this function, exactly as the cooperative single-threaded model in
    /// spec requires.
    pub async fn run(self) {
        tracing::info!(queue = %self.queue, worker = %self.worker_num, "worker starting");

        // Reconciliation of stranded processing lists is the master's
        // responsibility (it runs once per queue before any worker is
        // spawned); a worker never calls `backend.startup` itself.
        let state = Arc::new(CancellationState {
            sigkill_on_stop: AtomicBool::new(true),
            running: AtomicBool::new(true),
        });
        spawn_sigterm_listener(state.clone());

        let mut last_processed_at = Instant::now();
        let mut jobs_processed: u64 = 0;

        loop {
            if !state.running.load(Ordering::Acquire) {
                tracing::info!(queue = %self.queue, worker = %self.worker_num, "exiting: shutdown requested");
                return;
            }

            if last_processed_at.elapsed() > self.limits.max_idle {
                tracing::info!(queue = %self.queue, worker = %self.worker_num, "exiting: idle limit exceeded");
                return;
            }

            if jobs_processed > self.limits.max_jobs_processed {
                tracing::info!(queue = %self.queue, worker = %self.worker_num, "exiting: job limit exceeded");
                return;
            }

            // Idle between jobs: arm for immediate termination, there's
            // nothing in-flight to lose.
            state.sigkill_on_stop.store(true, Ordering::Release);

            let job = match self
                .backend
                .dequeue(&self.queue, self.worker_num, DEQUEUE_TIMEOUT_SECS)
                .await
            {
                Ok(job) => job,
                Err(err) => {
                    tracing::error!(error = %err, "dequeue failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let job = match job {
                Some(job) => job,
                None => continue,
            };

            state
                .sigkill_on_stop
                .store(job.sigkill_on_stop, Ordering::Release);

            let timeout_guard = job.timeout.map(|secs| spawn_timeout_guard(secs));

            tracing::debug!(path = %job.path, "running job");
            let success = self.executor.run(&job).await;

            if let Some(handle) = timeout_guard {
                handle.abort();
            }

            if success {
                if let Some(path) = &self.touch_file {
                    touch(path);
                }
            }

            if let Err(err) = self.backend.processed_job(&self.queue, self.worker_num, &job).await {
                tracing::error!(error = %err, "processed_job failed");
            }

            jobs_processed += 1;
            last_processed_at = Instant::now();
        }
    }
}

/// Installs the SIGTERM handler that enforces the cancellation contract:
/// if armed for `sigkill_on_stop`, die immediately; otherwise flip
/// `running` and let the loop observe it after the current iteration.
fn spawn_sigterm_listener(state: Arc<CancellationState>) {
    tokio::spawn(async move {
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                return;
            }
        };

        loop {
            term.recv().await;
            tracing::debug!("caught SIGTERM");

            if state.sigkill_on_stop.load(Ordering::Acquire) {
                std::process::exit(143); // 128 + SIGTERM
            }
            state.running.store(false, Ordering::Release);
        }
    });
}

/// The Rust-idiomatic replacement for the source system's `SIGALRM`-based
/// "default fatal action": a sibling task that sleeps for the job's
/// declared timeout and then kills the whole process. Runs independently
/// of the job's own future, so it terminates the process regardless of
/// whether that future is cooperating. Aborted if the job finishes first.
fn spawn_timeout_guard(timeout_secs: u64) -> JoinHandle<()> {
    let wait = Duration::from_secs(timeout_secs.max(1));
    tokio::spawn(async move {
        tokio::time::sleep(wait).await;
        tracing::error!(timeout_secs, "job exceeded its timeout, terminating process");
        std::process::exit(124);
    })
}

fn touch(path: &std::path::Path) {
    use std::fs::OpenOptions;
    let file = match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => file,
        Err(err) => {
            tracing::warn!(error = %err, path = %path.display(), "failed to touch file");
            return;
        }
    };
    if let Err(err) = file.set_modified(std::time::SystemTime::now()) {
        tracing::warn!(error = %err, path = %path.display(), "failed to update touch file mtime");
    }
}
