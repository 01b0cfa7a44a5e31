use structopt::StructOpt;

use crate::backend::BackendWithDeduplicate;
use crate::context::AppContext;
use crate::error::Result;
use crate::types::QueueName;

/// Removes duplicate pending jobs from a queue, keeping the oldest copy of
/// each duplicate group.
#[derive(Debug, StructOpt)]
pub struct Args {
    pub queue: String,
}

pub async fn main(args: Args, ctx: AppContext) -> Result<()> {
    let queue = QueueName::from(args.queue);
    let backend_name = ctx.settings.backend_for_queue(&queue).to_string();
    let backend = crate::backend::build_with_deduplicate(&backend_name, &ctx.settings, &queue).await?;

    let (original_size, new_size) = backend.deduplicate(&queue).await?;

    if original_size == new_size {
        println!("No duplicate jobs detected (queue length remains {})", original_size);
    } else {
        println!(
            "Deduplication reduced the queue from {} jobs to {} job(s)",
            original_size, new_size
        );
    }

    Ok(())
}
