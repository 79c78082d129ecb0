//! Cross-worker coordination: the shared key-value store and the locks built
//! on top of it.

pub mod local;
pub mod lock;
pub mod redis;
pub mod store;

pub use local::LocalStore;
pub use lock::DistributedLock;
pub use redis::RedisStore;
pub use store::{CoordinationStore, ListEnd};

use crate::common::model::RedisConfig;
use crate::errors::Result;
use log::warn;
use std::sync::Arc;

/// Redis when configured; otherwise an in-process store, which only
/// coordinates the workers of a single process.
pub fn store_from_config(redis: Option<&RedisConfig>) -> Result<Arc<dyn CoordinationStore>> {
    match redis {
        Some(config) => Ok(Arc::new(RedisStore::from_config(config)?)),
        None => {
            warn!("No [redis] section, using an in-process coordination store");
            Ok(Arc::new(LocalStore::new()))
        }
    }
}
