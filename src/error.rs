use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Redis error {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Redis connection error {0}")]
    RedisPoolError(#[from] deadpool::managed::PoolError<::redis::RedisError>),

    #[error("Redis pool creation error {0}")]
    RedisPoolCreationError(#[from] deadpool_redis::ConfigError),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    #[error(transparent)]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error(transparent)]
    ChronoParseError(#[from] chrono::ParseError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{0}")]
    Command(String),

    #[error("Unknown task path '{0}'")]
    UnknownTask(String),

    #[error("Job is not JSON-serialisable: {0}")]
    InvalidJob(String),

    #[error("Backend '{backend}' does not support {capability}")]
    UnsupportedCapability {
        backend: &'static str,
        capability: &'static str,
    },

    #[error("Refusing to pause until a time in the past")]
    PauseInThePast,

    #[error("Queues have already been enumerated; contribute_implied_queue_name \
             must be called during setup")]
    QueuesAlreadyFrozen,

    #[error("Invalid cron spec: {0}")]
    InvalidCronSpec(String),

    #[error("Job error: {0}")]
    JobError(#[source] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
