//! Reference binary demonstrating how a host embeds this crate: registers a
//! handful of example tasks and a cron entry, then dispatches into whichever
//! subcommand the operator invoked. A real host would replace `build_context`
//! with its own task/cron/middleware registration.

use std::sync::Arc;

use structopt::StructOpt;

use lwqueue::context::AppContext;
use lwqueue::cron::CronEntry;
use lwqueue::error::Result;
use lwqueue::middleware::logging::LoggingMiddleware;
use lwqueue::middleware::transaction::NullAtomicScope;
use lwqueue::middleware::Middleware;
use lwqueue::settings::Settings;
use lwqueue::task::{TaskOptions, TaskRegistry};

#[derive(Debug, StructOpt)]
#[structopt(name = "lwqueue", about = "lightweight task-queue runtime")]
struct Args {
    #[structopt(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, StructOpt)]
enum Cmd {
    #[structopt(name = "queue-runner")]
    QueueRunner(lwqueue::cmd::queue_runner::Args),
    #[structopt(name = "queue-worker")]
    QueueWorker(lwqueue::cmd::queue_worker::Args),
    #[structopt(name = "queue-pause")]
    QueuePause(lwqueue::cmd::queue_pause::Args),
    #[structopt(name = "queue-resume")]
    QueueResume(lwqueue::cmd::queue_resume::Args),
    #[structopt(name = "queue-clear")]
    QueueClear(lwqueue::cmd::queue_clear::Args),
    #[structopt(name = "queue-deduplicate")]
    QueueDeduplicate(lwqueue::cmd::queue_deduplicate::Args),
    #[structopt(name = "queue-configuration")]
    QueueConfiguration(lwqueue::cmd::queue_configuration::Args),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::from_args();
    let ctx = build_context()?;

    match args.cmd {
        Cmd::QueueRunner(a) => lwqueue::cmd::queue_runner::main(a, ctx).await,
        Cmd::QueueWorker(a) => lwqueue::cmd::queue_worker::main(a, ctx).await,
        Cmd::QueuePause(a) => lwqueue::cmd::queue_pause::main(a, ctx).await,
        Cmd::QueueResume(a) => lwqueue::cmd::queue_resume::main(a, ctx).await,
        Cmd::QueueClear(a) => lwqueue::cmd::queue_clear::main(a, ctx).await,
        Cmd::QueueDeduplicate(a) => lwqueue::cmd::queue_deduplicate::main(a, ctx).await,
        Cmd::QueueConfiguration(a) => lwqueue::cmd::queue_configuration::main(a, ctx).await,
    }
}

fn build_context() -> Result<AppContext> {
    let settings = Arc::new(Settings::load(None)?);
    let mut registry = TaskRegistry::new();

    let log_message = registry.register(
        "lwqueue.examples.log_message",
        TaskOptions::new("default"),
        |args, _kwargs| async move {
            tracing::info!(?args, "log_message task ran");
            Ok(())
        },
    );

    let cleanup = registry.register(
        "lwqueue.examples.cleanup",
        TaskOptions::new("maintenance").timeout(300),
        |_args, _kwargs| async move {
            tracing::info!("cleanup task ran");
            Ok(())
        },
    );

    settings.contribute_implied_queue_name(log_message.options.queue.clone())?;
    settings.contribute_implied_queue_name(cleanup.options.queue.clone())?;

    let cron = vec![CronEntry::new("lwqueue.examples.cleanup")?
        .hours("3")?
        .minutes("0")?
        .queue(cleanup.options.queue.clone())];

    for entry in &cron {
        settings.contribute_implied_queue_name(entry.queue.clone())?;
    }

    Ok(AppContext {
        settings,
        registry: Arc::new(registry),
        cron: Arc::new(cron),
        middleware_factory: Arc::new(|| -> Vec<Box<dyn Middleware>> { vec![Box::new(LoggingMiddleware::default())] }),
        atomic_scope: Arc::new(NullAtomicScope),
    })
}
