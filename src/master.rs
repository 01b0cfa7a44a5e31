use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::backend::Backend;
use crate::context::AppContext;
use crate::cron::CronEntry;
use crate::machine::Machine;
use crate::settings::Settings;
use crate::shutdown::GracefulShutdown;
use crate::types::{QueueName, WorkerNumber};

/// Turns a `(queue, worker#)` pair into the `--touch-file` path a worker
/// should report job completion to, or `None` if touch-files aren't in
/// use. Mirrors the source's `touch_filename_fn(queue) -> Optional[str]`
/// closure, generalised to take the worker number too since a touch-file
/// pattern may want to vary per worker as well as per queue.
pub type TouchFileFn = Arc<dyn Fn(&QueueName, WorkerNumber) -> Option<std::path::PathBuf> + Send + Sync>;

pub struct MasterOptions {
    pub touch_file: Option<TouchFileFn>,
    pub extra_settings_file: Option<String>,
    pub prometheus_start_port: u16,
    /// The cron configuration this host knows about, the backend to enqueue
    /// its jobs onto, and the registry to validate them against. Only
    /// consulted when `machine.run_cron()` is true.
    pub cron: Option<(Vec<CronEntry>, Arc<dyn Backend>, Arc<crate::task::TaskRegistry>)>,
}

/// Supervises every `(queue, worker#)` pair a [`Machine`] assigns to this
/// host: spawns one real OS subprocess per worker (re-invoking its own
/// executable with `queue-worker <queue> <number>`), restarts any that
/// exit, and relays shutdown signals to all of them.
pub struct Master {
    machine: Box<dyn Machine>,
    settings: Arc<Settings>,
    ctx: AppContext,
    options: MasterOptions,
}

impl Master {
    pub fn new(
        machine: Box<dyn Machine>,
        settings: Arc<Settings>,
        ctx: AppContext,
        options: MasterOptions,
    ) -> Self {
        Master {
            machine,
            settings,
            ctx,
            options,
        }
    }

    pub async fn run(mut self) -> crate::error::Result<()> {
        tracing::info!("starting queue master");

        let mut shutdown = GracefulShutdown::new();

        let worker_names = self.machine.worker_names(&self.settings);

        // Some backends need per-queue startup logic (the reliable Redis
        // backend's processing-queue reconciliation, for instance); this
        // must happen after every queue-contributing task/cron entry has
        // registered, i.e. after `worker_names` has frozen the implied
        // queue set.
        let queues_to_start_up: std::collections::HashSet<&QueueName> =
            worker_names.iter().map(|(q, _)| q).collect();
        for queue in queues_to_start_up {
            tracing::debug!(queue = %queue, "running startup for queue");
            match crate::cmd::get_backend(&self.ctx, queue).await {
                Ok(backend) => {
                    if let Err(err) = backend.startup(queue).await {
                        tracing::error!(error = %err, queue = %queue, "backend startup failed");
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, queue = %queue, "failed to build backend for startup");
                }
            }
        }

        if self.machine.run_cron() {
            if let Some((config, backend, registry)) = self.options.cron.take() {
                tracing::info!("starting cron scheduler");
                let scheduler = crate::cron::CronScheduler::new(config, backend, registry);
                tokio::spawn(scheduler.run(shutdown.consumer()));
            } else {
                tracing::warn!("machine requested cron but no cron configuration was supplied");
            }
        }

        let mut children: HashMap<(QueueName, WorkerNumber), Child> = HashMap::new();

        loop {
            if shutdown.consumer().shutting_down() {
                break;
            }

            for (index, (queue, worker_num)) in worker_names.iter().enumerate() {
                let key = (queue.clone(), *worker_num);
                let needs_spawn = match children.get_mut(&key) {
                    None => true,
                    Some(child) => matches!(child.try_wait(), Ok(Some(_))),
                };

                if needs_spawn {
                    tracing::info!(queue = %queue, worker = %worker_num, "starting worker");
                    match self.spawn_worker(queue, *worker_num, index) {
                        Ok(child) => {
                            children.insert(key, child);
                        }
                        Err(err) => {
                            tracing::error!(error = %err, queue = %queue, worker = %worker_num, "failed to spawn worker");
                        }
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(1)) => {},
                _ = shutdown.consumer().wait_for_shutdown() => break,
            }
        }

        tracing::info!("signalling workers to stop");
        for child in children.values() {
            if let Some(pid) = child.id() {
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }
        }

        for ((queue, worker_num), mut child) in children {
            tracing::info!(queue = %queue, worker = %worker_num, "waiting for worker to terminate");
            let _ = child.wait().await;
        }

        shutdown.shutdown();
        tracing::info!("all processes finished");

        Ok(())
    }

    fn spawn_worker(
        &self,
        queue: &QueueName,
        worker_num: WorkerNumber,
        index: usize,
    ) -> crate::error::Result<Child> {
        let exe = std::env::current_exe()?;

        let mut command = Command::new(exe);
        command
            .arg("queue-worker")
            .arg(queue.as_str())
            .arg(worker_num.0.to_string())
            .arg("--prometheus-port")
            .arg((self.options.prometheus_start_port as u32 + index as u32).to_string())
            .stdin(Stdio::null());

        if let Some(touch_file_fn) = &self.options.touch_file {
            if let Some(path) = touch_file_fn(queue, worker_num) {
                command.arg("--touch-file").arg(path);
            }
        }

        if let Some(extra_settings) = &self.options.extra_settings_file {
            command.arg("--extra-settings").arg(extra_settings);
        }

        Ok(command.spawn()?)
    }
}
