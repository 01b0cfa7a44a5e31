//! Process-wide configuration, assembled once at startup.
//!
//! Layered the way the teacher's `cmd::server` reads its own configuration:
//! `.env` (via `dotenv`) is loaded first, then typed environment variables
//! are read with defaults (`envoption`), then an optional extra-settings
//! file is merged on top via the `config` crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::QueueName;

const SETTING_NAME_PREFIX: &str = "QUEUE_";

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub prefix: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        RedisSettings {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            prefix: String::new(),
        }
    }
}

/// Raw, overridable values loaded from the environment and/or an extra
/// settings file. Kept separate from [`Settings`] so the merge logic stays
/// plain-data and testable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawSettings {
    pub backend: Option<String>,
    pub backend_overrides: HashMap<String, String>,
    pub middleware: Vec<String>,
    pub ignore_apps: Vec<String>,
    pub redis_host: Option<String>,
    pub redis_port: Option<u16>,
    pub redis_password: Option<String>,
    pub redis_prefix: Option<String>,
    pub enable_prometheus: Option<bool>,
    pub prometheus_start_port: Option<u16>,
    pub atomic_jobs: Option<bool>,
}

pub const DEFAULT_BACKEND: &str = "synchronous";

/// Immutable process-wide settings plus the one piece of startup-time
/// mutable state: the implied queue worker-count map, which may be
/// contributed to until the first read via [`Settings::get_queue_counts`],
/// after which further contributions are a programming error.
pub struct Settings {
    pub backend: String,
    pub backend_overrides: HashMap<QueueName, String>,
    pub middleware: Vec<String>,
    pub ignore_apps: Vec<String>,
    pub redis: RedisSettings,
    pub enable_prometheus: bool,
    pub prometheus_start_port: u16,
    pub atomic_jobs: bool,

    workers: Mutex<HashMap<QueueName, u32>>,
    accepting_implied_queues: AtomicBool,
}

impl Settings {
    /// Loads settings from the process environment (via `dotenv` + typed
    /// env reads) and, if `extra_settings_file` is given, merges a file on
    /// top of them using the `config` crate.
    pub fn load(extra_settings_file: Option<&str>) -> Result<Settings> {
        dotenv::dotenv().ok();

        let mut raw = RawSettings {
            backend: std::env::var("QUEUE_BACKEND").ok(),
            middleware: vec!["lwqueue::middleware::logging::LoggingMiddleware".to_string()],
            ..Default::default()
        };

        raw.redis_host = Some(envoption::with_default("QUEUE_REDIS_HOST", "127.0.0.1".to_string())?);
        raw.redis_port = Some(envoption::with_default("QUEUE_REDIS_PORT", 6379u16)?);
        raw.redis_password = std::env::var("QUEUE_REDIS_PASSWORD").ok();
        raw.redis_prefix = Some(envoption::with_default("QUEUE_REDIS_PREFIX", String::new())?);
        raw.enable_prometheus = Some(envoption::with_default("QUEUE_ENABLE_PROMETHEUS", false)?);
        raw.prometheus_start_port =
            Some(envoption::with_default("QUEUE_PROMETHEUS_START_PORT", 9300u16)?);
        raw.atomic_jobs = Some(envoption::with_default("QUEUE_ATOMIC_JOBS", true)?);

        if let Some(path) = extra_settings_file {
            raw = merge_extra_settings(raw, path)?;
        }

        Ok(Settings {
            backend: raw.backend.unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            backend_overrides: raw
                .backend_overrides
                .into_iter()
                .map(|(k, v)| (QueueName::from(k), v))
                .collect(),
            middleware: raw.middleware,
            ignore_apps: raw.ignore_apps,
            redis: RedisSettings {
                host: raw.redis_host.unwrap_or_else(|| "127.0.0.1".to_string()),
                port: raw.redis_port.unwrap_or(6379),
                password: raw.redis_password,
                prefix: raw.redis_prefix.unwrap_or_default(),
            },
            enable_prometheus: raw.enable_prometheus.unwrap_or(false),
            prometheus_start_port: raw.prometheus_start_port.unwrap_or(9300),
            atomic_jobs: raw.atomic_jobs.unwrap_or(true),
            workers: Mutex::new(HashMap::new()),
            accepting_implied_queues: AtomicBool::new(true),
        })
    }

    pub fn backend_for_queue(&self, queue: &QueueName) -> &str {
        self.backend_overrides
            .get(queue)
            .map(|s| s.as_str())
            .unwrap_or(&self.backend)
    }

    /// Registers that `queue` exists with a default worker count of 1 if
    /// not already present. Callable freely during setup; once
    /// [`Settings::get_queue_counts`] has been read this errors instead of
    /// silently being ignored, matching `contribute_implied_queue_name`'s
    /// freeze-after-first-read contract.
    pub fn contribute_implied_queue_name(&self, queue: QueueName) -> Result<()> {
        if !self.accepting_implied_queues.load(Ordering::Acquire) {
            return Err(Error::QueuesAlreadyFrozen);
        }
        self.workers.lock().unwrap().entry(queue).or_insert(1);
        Ok(())
    }

    /// Explicitly sets the worker count for `queue`, overriding the
    /// implied default of 1. Must be called before the first
    /// `get_queue_counts` read.
    pub fn set_worker_count(&self, queue: QueueName, count: u32) -> Result<()> {
        if !self.accepting_implied_queues.load(Ordering::Acquire) {
            return Err(Error::QueuesAlreadyFrozen);
        }
        self.workers.lock().unwrap().insert(queue, count);
        Ok(())
    }

    /// Freezes the implied-queue set and returns a snapshot of it. Once
    /// called, further calls to `contribute_implied_queue_name` fail.
    pub fn get_queue_counts(&self) -> HashMap<QueueName, u32> {
        self.refuse_further_implied_queues();
        self.workers.lock().unwrap().clone()
    }

    pub fn refuse_further_implied_queues(&self) {
        self.accepting_implied_queues.store(false, Ordering::Release);
    }

    pub fn get_worker_numbers(&self, queue: &QueueName) -> Vec<u32> {
        let count = self
            .get_queue_counts()
            .get(queue)
            .copied()
            .unwrap_or(1);
        (1..=count).collect()
    }
}

fn merge_extra_settings(mut raw: RawSettings, path: &str) -> Result<RawSettings> {
    let config = config::Config::builder()
        .add_source(config::File::with_name(path))
        .build()
        .map_err(|e| Error::ConfigError(e.to_string()))?;

    let known_names = [
        "BACKEND",
        "BACKEND_OVERRIDES",
        "MIDDLEWARE",
        "IGNORE_APPS",
        "REDIS_HOST",
        "REDIS_PORT",
        "REDIS_PASSWORD",
        "REDIS_PREFIX",
        "ENABLE_PROMETHEUS",
        "PROMETHEUS_START_PORT",
        "ATOMIC_JOBS",
    ];

    for (key, _) in config.collect().map_err(|e| Error::ConfigError(e.to_string()))? {
        let upper = key.to_uppercase();
        if !known_names.contains(&upper.as_str()) {
            tracing::warn!(
                setting = %key,
                "ignoring unexpected setting '{}{}' in extra settings file",
                SETTING_NAME_PREFIX,
                key
            );
        }
    }

    if let Ok(v) = config.get_string("backend") {
        raw.backend = Some(v);
    }
    if let Ok(v) = config.get_table("backend_overrides") {
        raw.backend_overrides = v
            .into_iter()
            .filter_map(|(k, v)| v.into_string().ok().map(|v| (k, v)))
            .collect();
    }
    if let Ok(v) = config.get_array("middleware") {
        raw.middleware = v.into_iter().filter_map(|v| v.into_string().ok()).collect();
    }
    if let Ok(v) = config.get_array("ignore_apps") {
        raw.ignore_apps = v.into_iter().filter_map(|v| v.into_string().ok()).collect();
    }
    if let Ok(v) = config.get_string("redis_host") {
        raw.redis_host = Some(v);
    }
    if let Ok(v) = config.get_int("redis_port") {
        raw.redis_port = Some(v as u16);
    }
    if let Ok(v) = config.get_string("redis_password") {
        raw.redis_password = Some(v);
    }
    if let Ok(v) = config.get_string("redis_prefix") {
        raw.redis_prefix = Some(v);
    }
    if let Ok(v) = config.get_bool("enable_prometheus") {
        raw.enable_prometheus = Some(v);
    }
    if let Ok(v) = config.get_int("prometheus_start_port") {
        raw.prometheus_start_port = Some(v as u16);
    }
    if let Ok(v) = config.get_bool("atomic_jobs") {
        raw.atomic_jobs = Some(v);
    }

    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implied_queues_freeze_after_first_read() {
        let settings = Settings {
            backend: DEFAULT_BACKEND.to_string(),
            backend_overrides: HashMap::new(),
            middleware: vec![],
            ignore_apps: vec![],
            redis: RedisSettings::default(),
            enable_prometheus: false,
            prometheus_start_port: 9300,
            atomic_jobs: true,
            workers: Mutex::new(HashMap::new()),
            accepting_implied_queues: AtomicBool::new(true),
        };

        settings
            .contribute_implied_queue_name(QueueName::from("default"))
            .unwrap();
        let counts = settings.get_queue_counts();
        assert_eq!(counts.get(&QueueName::from("default")), Some(&1));

        let err = settings.contribute_implied_queue_name(QueueName::from("late"));
        assert_matches::assert_matches!(err, Err(Error::QueuesAlreadyFrozen));
    }

    #[test]
    fn backend_overrides_take_priority() {
        let mut overrides = HashMap::new();
        overrides.insert(QueueName::from("fast"), "redis".to_string());

        let settings = Settings {
            backend: DEFAULT_BACKEND.to_string(),
            backend_overrides: overrides,
            middleware: vec![],
            ignore_apps: vec![],
            redis: RedisSettings::default(),
            enable_prometheus: false,
            prometheus_start_port: 9300,
            atomic_jobs: true,
            workers: Mutex::new(HashMap::new()),
            accepting_implied_queues: AtomicBool::new(true),
        };

        assert_eq!(settings.backend_for_queue(&QueueName::from("fast")), "redis");
        assert_eq!(
            settings.backend_for_queue(&QueueName::from("default")),
            DEFAULT_BACKEND
        );
    }
}
