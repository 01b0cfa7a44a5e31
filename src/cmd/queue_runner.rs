use std::sync::Arc;

use structopt::StructOpt;

use crate::context::AppContext;
use crate::error::Result;
use crate::machine::{DirectlyConfiguredMachine, Machine, PooledMachine};
use crate::master::{Master, MasterOptions};
use crate::types::QueueName;

#[derive(Debug, StructOpt)]
pub struct Args {
    #[structopt(long, help = "fork and write a pidfile to this path")]
    pub pidfile: Option<String>,

    #[structopt(long, help = "touch(1) this path (with %-substitution of the queue name) after running a job")]
    pub touchfile: Option<String>,

    #[structopt(long, help = "machine number, for parallelism")]
    pub machine: Option<u32>,

    #[structopt(long = "of", help = "total number of machines running the queues")]
    pub machine_count: Option<u32>,

    #[structopt(long = "only-queue", help = "only run the given queue, useful for local debugging")]
    pub only_queue: Option<String>,

    #[structopt(
        long,
        requires = "extra_settings",
        conflicts_with_all = &["machine", "machine_count", "only_queue"],
        help = "run queues on this machine exactly as specified; requires --extra-settings"
    )]
    pub exact_configuration: bool,

    #[structopt(long = "extra-settings", help = "path to an additional settings file to merge in")]
    pub extra_settings: Option<String>,
}

pub async fn main(args: Args, ctx: AppContext) -> Result<()> {
    crate::tracing_config::configure("lwqueue-master");

    if args.exact_configuration && args.extra_settings.is_none() {
        return Err(super::command_error(
            "must provide --extra-settings when using --exact-configuration",
        ));
    }

    let machine_count = args.machine_count.unwrap_or(1);
    let machine_number = args.machine.unwrap_or(1);
    if machine_count < machine_number {
        return Err(super::command_error(
            "machine number must be less than or equal to machine count",
        ));
    }

    let machine: Box<dyn Machine> = if args.exact_configuration {
        Box::new(DirectlyConfiguredMachine)
    } else {
        Box::new(PooledMachine::new(
            machine_number,
            machine_count,
            args.only_queue.map(QueueName::from),
        ))
    };

    for entry in ctx.cron.iter() {
        ctx.settings.contribute_implied_queue_name(entry.queue.clone())?;
    }

    let cron_config = if machine.configure_cron() && !ctx.cron.is_empty() {
        let queue = crate::cron::cron_queue_name();
        let backend = super::get_backend(&ctx, &queue).await?;
        Some(((*ctx.cron).clone(), backend, ctx.registry.clone()))
    } else {
        None
    };

    if let Some(pidfile) = &args.pidfile {
        std::fs::write(pidfile, std::process::id().to_string())?;
        tracing::info!(
            pidfile = %pidfile,
            "wrote pidfile; running in the foreground (no fork - forking a tokio runtime is unsound)"
        );
    }

    let options = MasterOptions {
        touch_file: args.touchfile.map(|pattern| {
            let factory: crate::master::TouchFileFn = Arc::new(move |queue, _worker| {
                Some(std::path::PathBuf::from(pattern.replace("%s", queue.as_str())))
            });
            factory
        }),
        extra_settings_file: args.extra_settings,
        prometheus_start_port: ctx.settings.prometheus_start_port,
        cron: cron_config,
    };

    let master = Master::new(machine, ctx.settings.clone(), ctx.clone(), options);
    master.run().await
}
