use structopt::StructOpt;

use crate::backend::BackendWithPauseResume;
use crate::context::AppContext;
use crate::error::Result;
use crate::types::QueueName;

/// Removes a pause on a queue; does not force idle workers to notice
/// immediately.
#[derive(Debug, StructOpt)]
pub struct Args {
    pub queue: String,
}

pub async fn main(args: Args, ctx: AppContext) -> Result<()> {
    let queue = QueueName::from(args.queue);
    let backend_name = ctx.settings.backend_for_queue(&queue).to_string();
    let backend = crate::backend::build_with_pause_resume(&backend_name, &ctx.settings, &queue).await?;

    backend.resume(&queue).await?;

    println!("Resumed queue {}.", queue);
    Ok(())
}
