pub mod backend;
pub mod cmd;
pub mod context;
pub mod cron;
pub mod error;
pub mod executor;
pub mod job;
pub mod machine;
pub mod middleware;
pub mod redis_pool;
pub mod settings;
pub mod shutdown;
pub mod task;
pub mod tracing_config;
pub mod types;
pub mod worker;
pub mod master;
