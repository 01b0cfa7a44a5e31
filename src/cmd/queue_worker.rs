use std::path::PathBuf;

use structopt::StructOpt;

use crate::context::AppContext;
use crate::error::Result;
use crate::types::{QueueName, WorkerNumber};
use crate::worker::{Worker, WorkerLimits};

/// A single `(queue, worker#)` process, always invoked by a [`Master`][crate::master::Master]
/// re-execing itself - never run directly, though nothing stops it.
#[derive(Debug, StructOpt)]
pub struct Args {
    pub queue: String,

    pub worker_number: u32,

    #[structopt(long = "prometheus-port", help = "port to serve metrics on")]
    pub prometheus_port: Option<u16>,

    #[structopt(long = "touch-file", help = "touch(1) this path after running a job")]
    pub touch_file: Option<PathBuf>,

    #[structopt(long = "extra-settings", help = "path to an additional settings file to merge in")]
    pub extra_settings: Option<String>,
}

pub async fn main(args: Args, ctx: AppContext) -> Result<()> {
    crate::tracing_config::configure("lwqueue-worker");

    let queue = QueueName::from(args.queue);
    let worker_num = WorkerNumber(args.worker_number);

    tracing::info!(queue = %queue, worker = %worker_num, "worker process starting");

    let backend = super::get_backend(&ctx, &queue).await?;
    let executor = std::sync::Arc::new(crate::executor::JobExecutor::new(
        ctx.registry.clone(),
        (ctx.middleware_factory)(),
        ctx.atomic_scope.clone(),
    ));

    let worker = Worker::new(
        queue,
        worker_num,
        backend,
        executor,
        WorkerLimits::default(),
        args.touch_file,
    );

    worker.run().await;
    Ok(())
}
