pub mod queue_clear;
pub mod queue_configuration;
pub mod queue_deduplicate;
pub mod queue_pause;
pub mod queue_resume;
pub mod queue_runner;
pub mod queue_worker;

use std::sync::Arc;

use crate::backend::Backend;
use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::types::QueueName;

/// Resolves the configured backend for `queue` and builds the
/// `JobExecutor` it needs, mirroring `get_backend(queue)` in the source
/// system (minus the `lru_cache`, since `build` is cheap enough here that
/// callers construct a backend once per command invocation).
pub async fn get_backend(ctx: &AppContext, queue: &QueueName) -> Result<Arc<dyn Backend>> {
    let executor = Arc::new(crate::executor::JobExecutor::new(
        ctx.registry.clone(),
        (ctx.middleware_factory)(),
        ctx.atomic_scope.clone(),
    ));
    let backend_name = ctx.settings.backend_for_queue(queue).to_string();
    crate::backend::build(&backend_name, &ctx.settings, queue, executor).await
}

pub(crate) fn command_error(message: impl Into<String>) -> Error {
    Error::Command(message.into())
}
