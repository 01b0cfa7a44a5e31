use std::ops::Deref;
use std::sync::Arc;

use crate::error::Result;
use crate::settings::RedisSettings;

/// Shared connection pool used by both Redis-backed backends, wrapping
/// `deadpool_redis::Pool` behind a cheaply-clonable newtype that also
/// carries the optional key prefix so key construction stays in one place.
#[derive(Clone)]
pub struct RedisPool(Arc<RedisPoolInner>);

struct RedisPoolInner {
    pool: deadpool_redis::Pool,
    key_prefix: Option<String>,
}

impl Deref for RedisPool {
    type Target = deadpool_redis::Pool;

    fn deref(&self) -> &Self::Target {
        &self.0.pool
    }
}

impl RedisPool {
    pub fn new(settings: &RedisSettings) -> Result<RedisPool> {
        let url = match &settings.password {
            Some(password) => format!(
                "redis://:{}@{}:{}",
                password, settings.host, settings.port
            ),
            None => format!("redis://{}:{}", settings.host, settings.port),
        };

        let pool = deadpool_redis::Config {
            url: Some(url),
            connection: None,
            pool: None,
        }
        .create_pool()?;

        let key_prefix = if settings.prefix.is_empty() {
            None
        } else {
            Some(settings.prefix.clone())
        };

        Ok(RedisPool(Arc::new(RedisPoolInner { pool, key_prefix })))
    }

    pub fn pool(&self) -> &deadpool_redis::Pool {
        &self.0.pool
    }

    pub fn key_prefix(&self) -> Option<&str> {
        self.0.key_prefix.as_deref()
    }
}
