use std::io::Write;

use structopt::StructOpt;

use crate::backend::BackendWithClear;
use crate::context::AppContext;
use crate::error::Result;
use crate::types::QueueName;

/// Deletes every pending job on a queue. In-flight jobs are unaffected.
#[derive(Debug, StructOpt)]
pub struct Args {
    pub queue: String,

    #[structopt(long, help = "skip the confirmation prompt")]
    pub yes: bool,
}

pub async fn main(args: Args, ctx: AppContext) -> Result<()> {
    let queue = QueueName::from(args.queue);
    let backend_name = ctx.settings.backend_for_queue(&queue).to_string();
    let backend = crate::backend::build_with_clear(&backend_name, &ctx.settings, &queue).await?;

    if !args.yes {
        print!("Clear all jobs from queue {}? [y/N] ", queue);
        std::io::stdout().flush().ok();

        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if answer.trim().to_lowercase() != "y" {
            return Err(super::command_error("aborting"));
        }
    }

    backend.clear(&queue).await?;

    println!("Cleared queue {}.", queue);
    Ok(())
}
