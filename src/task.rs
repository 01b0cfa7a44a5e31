use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::job::{Job, JobId};
use crate::types::QueueName;

/// A registered unit of work. Unlike the source system's decorator-populated
/// globals, this crate requires an explicit `TaskRegistry::register` call,
/// since Rust has no module-import-time side effects to hang a decorator on.
#[async_trait]
pub trait TaskFn: Send + Sync {
    async fn call(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> TaskFn for F
where
    F: Fn(Vec<Value>, Map<String, Value>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send,
{
    async fn call(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> anyhow::Result<()> {
        (self)(args, kwargs).await
    }
}

/// Default options a task is declared with. Per-call overrides are applied
/// on top of these when a `TaskHandle` is asked to enqueue a job, replacing
/// the `django_lightweight_queue_*`-prefixed kwarg popping of the source
/// implementation with explicit typed parameters.
#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub queue: QueueName,
    pub timeout: Option<u64>,
    pub sigkill_on_stop: bool,
    pub atomic: bool,
}

impl TaskOptions {
    pub fn new(queue: impl Into<QueueName>) -> Self {
        TaskOptions {
            queue: queue.into(),
            timeout: None,
            sigkill_on_stop: false,
            atomic: true,
        }
    }

    pub fn timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn sigkill_on_stop(mut self, value: bool) -> Self {
        self.sigkill_on_stop = value;
        self
    }

    pub fn atomic(mut self, value: bool) -> Self {
        self.atomic = value;
        self
    }
}

struct RegisteredTask {
    options: TaskOptions,
    func: Arc<dyn TaskFn>,
}

/// Maps dotted task paths to their implementation and default options.
/// Populated once at startup by the host embedding this crate.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, RegisteredTask>,
}

/// Optional per-call overrides, mirroring the source's
/// `django_lightweight_queue_{timeout,sigkill_on_stop,queue}` kwargs.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOverrides {
    pub timeout: Option<u64>,
    pub sigkill_on_stop: Option<bool>,
    pub queue: Option<QueueName>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        TaskRegistry::default()
    }

    /// Registers a task under `path`, returning a handle callers use to
    /// enqueue jobs against it. Also contributes `options.queue` to the
    /// implied queue set (see [`crate::settings::Settings::contribute_implied_queue_name`]).
    pub fn register(
        &mut self,
        path: impl Into<String>,
        options: TaskOptions,
        func: impl TaskFn + 'static,
    ) -> TaskHandle {
        let path = path.into();
        self.tasks.insert(
            path.clone(),
            RegisteredTask {
                options: options.clone(),
                func: Arc::new(func),
            },
        );
        TaskHandle { path, options }
    }

    pub fn resolve(&self, path: &str) -> Result<&dyn TaskFn> {
        self.tasks
            .get(path)
            .map(|t| t.func.as_ref())
            .ok_or_else(|| Error::UnknownTask(path.to_string()))
    }

    pub fn options(&self, path: &str) -> Result<&TaskOptions> {
        self.tasks
            .get(path)
            .map(|t| &t.options)
            .ok_or_else(|| Error::UnknownTask(path.to_string()))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.tasks.contains_key(path)
    }
}

/// A lightweight reference to a registered task, returned by
/// `TaskRegistry::register`, used to build a `Job` ready for enqueueing.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub path: String,
    pub options: TaskOptions,
}

impl TaskHandle {
    /// Builds a job from this task's defaults, `overrides`, and the given
    /// call arguments, validating it against `registry` before returning so
    /// that a caller can never hand a backend a job that would fail to
    /// round-trip or resolve to an unknown path.
    pub fn build_job(
        &self,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        overrides: EnqueueOverrides,
        registry: &TaskRegistry,
    ) -> Result<(QueueName, Job)> {
        let timeout = overrides.timeout.or(self.options.timeout);
        let sigkill_on_stop = overrides
            .sigkill_on_stop
            .unwrap_or(self.options.sigkill_on_stop);
        let queue = overrides.queue.unwrap_or_else(|| self.options.queue.clone());

        let job = Job::new(
            JobId::Auto,
            self.path.clone(),
            args,
            kwargs,
            timeout,
            sigkill_on_stop,
        );
        job.validate(registry)?;

        Ok((queue, job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_resolve() {
        let mut registry = TaskRegistry::new();
        let handle = registry.register(
            "tasks.noop",
            TaskOptions::new("default"),
            |_args, _kwargs| async move { Ok(()) },
        );

        assert!(registry.contains("tasks.noop"));
        let (queue, job) = handle
            .build_job(vec![], Map::new(), EnqueueOverrides::default(), &registry)
            .unwrap();
        assert_eq!(queue.as_str(), "default");
        assert_eq!(job.path, "tasks.noop");
    }

    #[test]
    fn build_job_rejects_unregistered_path() {
        let registry = TaskRegistry::new();
        let handle = TaskHandle {
            path: "tasks.vanished".to_string(),
            options: TaskOptions::new("default"),
        };

        let err = handle.build_job(vec![], Map::new(), EnqueueOverrides::default(), &registry);
        assert_matches::assert_matches!(err, Err(Error::UnknownTask(_)));
    }

    #[test]
    fn unknown_task_errors() {
        let registry = TaskRegistry::new();
        assert_matches::assert_matches!(registry.resolve("tasks.missing"), Err(Error::UnknownTask(_)));
    }

    #[test]
    fn overrides_win_over_defaults() {
        let mut registry = TaskRegistry::new();
        let handle = registry.register(
            "tasks.slow",
            TaskOptions::new("default").timeout(60).sigkill_on_stop(true),
            |_args, _kwargs| async move { Ok(()) },
        );

        let overrides = EnqueueOverrides {
            timeout: Some(30),
            sigkill_on_stop: None,
            queue: None,
        };
        let (_, job) = handle
            .build_job(vec![], Map::new(), overrides, &registry)
            .unwrap();
        assert_eq!(job.timeout, Some(30));
        assert!(job.sigkill_on_stop);
    }
}
