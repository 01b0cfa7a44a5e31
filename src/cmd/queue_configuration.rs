use structopt::StructOpt;

use crate::context::AppContext;
use crate::error::Result;

/// Prints the resolved queue/concurrency/backend table, the configured
/// middleware chain, and the cron configuration.
#[derive(Debug, StructOpt)]
pub struct Args {}

pub async fn main(_args: Args, ctx: AppContext) -> Result<()> {
    println!("lwqueue");
    println!("=======");
    println!();
    println!("{:<55}{:<12}{}", "Queue name", "Concurrency", "Backend");
    println!("{}", "-".repeat(27));

    let mut counts: Vec<_> = ctx.settings.get_queue_counts().into_iter().collect();
    counts.sort_by(|a, b| a.0.cmp(&b.0));

    for (queue, concurrency) in counts {
        println!(
            " {:<54}{:<12}{}",
            queue.to_string(),
            concurrency,
            ctx.settings.backend_for_queue(&queue),
        );
    }

    println!();
    println!("Middleware:");
    for m in &ctx.settings.middleware {
        println!(" * {}", m);
    }

    println!();
    println!("Cron configuration");

    for entry in ctx.cron.iter() {
        println!();
        println!("{:20}: {}", "command", entry.command);
        println!("{:20}: {:?}", "args", entry.args);
        println!("{:20}: {}", "hour", entry.hour);
        println!("{:20}: {}", "minute", entry.minute);
        println!("{:20}: {}", "queue", entry.queue);
        println!(
            "{:20}: {}",
            "timeout",
            entry.timeout.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string())
        );
        println!("{:20}: {}", "sigkill_on_stop", entry.sigkill_on_stop);
    }

    Ok(())
}
