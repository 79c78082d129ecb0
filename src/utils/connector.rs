use crate::common::model::RedisConfig;
use crate::errors::{Result, StoreError};
use deadpool_redis::{Config, Pool, PoolConfig, Runtime};

pub fn redis_url(config: &RedisConfig) -> String {
    let auth = match (&config.redis_username, &config.redis_password) {
        (Some(user), Some(password)) => format!("{user}:{password}@"),
        (None, Some(password)) => format!(":{password}@"),
        (Some(user), None) => format!("{user}@"),
        (None, None) => String::new(),
    };
    format!(
        "redis://{}{}:{}/{}",
        auth, config.redis_host, config.redis_port, config.redis_db
    )
}

pub fn create_redis_pool(config: &RedisConfig) -> Result<Pool> {
    let mut cfg = Config::from_url(redis_url(config));
    cfg.pool = Some(PoolConfig::new(config.pool_size.unwrap_or(100)));
    cfg.create_pool(Some(Runtime::Tokio1))
        .map_err(|e| StoreError::ConnectionFailed(e.to_string()).into())
}
