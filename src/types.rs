use std::fmt;

/// Name of a queue. Opaque beyond being a non-empty string; used both as a
/// Redis key component and as a key into the `WORKERS` concurrency map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct QueueName(pub String);

impl QueueName {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for QueueName {
    fn from(s: &str) -> Self {
        QueueName(s.to_string())
    }
}

impl From<String> for QueueName {
    fn from(s: String) -> Self {
        QueueName(s)
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A worker's position within its queue, 1-based. Together with a
/// `QueueName` this identifies a worker uniquely on a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerNumber(pub u32);

impl fmt::Display for WorkerNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for WorkerNumber {
    fn from(n: u32) -> Self {
        WorkerNumber(n)
    }
}

/// The queue onto which the cron scheduler enqueues its `execute` jobs, and
/// which a `PooledMachine` runs on machine 1 by default.
pub const CRON_QUEUE_NAME: &str = "cron_scheduler";
