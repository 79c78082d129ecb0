use super::store::{CoordinationStore, ListEnd};
use crate::common::model::RedisConfig;
use crate::errors::Result;
use crate::utils::connector::create_redis_pool;
use async_trait::async_trait;
use deadpool_redis::Pool;
use deadpool_redis::redis::{self, AsyncCommands, ExistenceCheck, Script, SetExpiry, SetOptions};
use std::time::Duration;

const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed coordination store over a `deadpool-redis` pool.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &RedisConfig) -> Result<Self> {
        Ok(Self::new(create_redis_pool(config)?))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn close(&self) {
        self.pool.close();
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let opts = SetOptions::default()
            .conditional_set(ExistenceCheck::NX)
            .with_expiration(SetExpiry::PX(ttl.as_millis().max(1) as u64));
        let result: Option<String> = conn.set_options(key, value, opts).await?;
        Ok(result.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let removed: i32 = Script::new(COMPARE_AND_DELETE)
            .key(key)
            .arg(value)
            .invoke_async(&mut *conn)
            .await?;
        Ok(removed == 1)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        Ok(conn.exists(key).await?)
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: i64 = conn.lpush(key, value).await?;
        Ok(())
    }

    async fn list_pop(&self, key: &str, end: ListEnd) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value = match end {
            ListEnd::Head => conn.lpop(key, None).await?,
            ListEnd::Tail => conn.rpop(key, None).await?,
        };
        Ok(value)
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        Ok(conn.llen(key).await?)
    }

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: i64 = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zset_pop_min(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        // MULTI/EXEC keeps read-and-remove atomic across workers
        let (members, _removed): (Vec<String>, i64) = redis::pipe()
            .atomic()
            .zrange(key, 0, 0)
            .zremrangebyrank(key, 0, 0)
            .query_async(&mut *conn)
            .await?;
        Ok(members.into_iter().next())
    }

    async fn zset_len(&self, key: &str) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        Ok(conn.zcard(key).await?)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let added: i64 = conn.sadd(key, member).await?;
        Ok(added == 1)
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        Ok(conn.sismember(key, member).await?)
    }

    async fn set_pop(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.spop(key).await?)
    }

    async fn set_len(&self, key: &str) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        Ok(conn.scard(key).await?)
    }
}
