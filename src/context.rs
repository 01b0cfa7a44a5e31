use std::sync::Arc;

use crate::cron::CronEntry;
use crate::middleware::transaction::AtomicScope;
use crate::middleware::Middleware;
use crate::settings::Settings;
use crate::task::TaskRegistry;

/// Builds a fresh middleware chain. A factory rather than a shared value
/// since `Box<dyn Middleware>` isn't `Clone` and each worker process wants
/// its own instances - mirrors the source's `get_middleware()`, minus the
/// dotted-path dynamic import Rust has no equivalent of.
pub type MiddlewareFactory = Arc<dyn Fn() -> Vec<Box<dyn Middleware>> + Send + Sync>;

/// Everything a host embedding this crate must supply before dispatching
/// into any `cmd::*` subcommand: the task registry it populated, the cron
/// entries it wants scheduled, and the settings it loaded.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub registry: Arc<TaskRegistry>,
    pub cron: Arc<Vec<CronEntry>>,
    pub middleware_factory: MiddlewareFactory,
    pub atomic_scope: Arc<dyn AtomicScope>,
}
