use crate::common::interface::PersistenceSink;
use crate::common::model::RedisConfig;
use crate::errors::{DataStoreError, Result};
use crate::utils::connector::create_redis_pool;
use async_trait::async_trait;
use deadpool_redis::Pool;
use deadpool_redis::redis::AsyncCommands;
use log::info;
use serde_json::{Map, Value};

/// Stores each record as a Redis hash `<name>:items:<key>`.
pub struct RedisSink {
    pool: Pool,
    prefix: String,
}

impl RedisSink {
    pub fn new(pool: Pool, name: &str) -> Self {
        Self {
            pool,
            prefix: format!("{name}:items"),
        }
    }

    pub fn from_config(name: &str, config: &RedisConfig) -> Result<Self> {
        Ok(Self::new(create_redis_pool(config)?, name))
    }

    pub fn item_key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }
}

/// Hash field value: strings verbatim, everything else as JSON.
pub fn field_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl PersistenceSink for RedisSink {
    async fn upsert(&self, key: &str, fields: Map<String, Value>) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let items: Vec<(String, String)> = fields
            .iter()
            .map(|(k, v)| (k.clone(), field_value(v)))
            .collect();
        let mut conn = self.pool.get().await?;
        let _: () = conn
            .hset_multiple(self.item_key(key), &items)
            .await
            .map_err(|e| DataStoreError::SaveFailed(Box::new(e)))?;
        Ok(())
    }

    async fn disconnect(&self) {
        info!("Closing persistence pool for {}", self.prefix);
        self.pool.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_value() {
        assert_eq!(field_value(&json!("3室1厅")), "3室1厅");
        assert_eq!(field_value(&json!(4200)), "4200");
        assert_eq!(field_value(&json!(["地铁", "近公园"])), r#"["地铁","近公园"]"#);
        assert_eq!(field_value(&Value::Null), "null");
    }

    #[tokio::test]
    async fn test_item_key_and_disconnect() {
        let config = RedisConfig {
            redis_host: "127.0.0.1".into(),
            redis_port: 6379,
            redis_db: 0,
            redis_username: None,
            redis_password: None,
            pool_size: Some(2),
        };
        // building the pool does not connect
        let sink = RedisSink::from_config("ziroom", &config).unwrap();
        assert_eq!(sink.item_key("sh_60123"), "ziroom:items:sh_60123");
        sink.disconnect().await;
        // empty records never touch the server
        assert!(sink.upsert("sh_60123", Map::new()).await.is_ok());
    }
}
