use crate::errors::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Which end of a list `list_pop` takes from. `list_push` always pushes to
/// the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEnd {
    Head,
    Tail,
}

/// Key-value coordination store shared by every worker of a crawl.
///
/// Mirrors the Redis primitives the crawler relies on: atomic set-if-absent
/// with expiry, compare-and-delete, lists, sorted sets and sets. Keys are
/// used verbatim; callers namespace them.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    /// `SET key value NX EX ttl`; true when the key was absent and is now set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Deletes `key` only while it still holds `value`.
    async fn delete_if_eq(&self, key: &str, value: &str) -> Result<bool>;
    async fn exists(&self, key: &str) -> Result<bool>;

    async fn list_push(&self, key: &str, value: &str) -> Result<()>;
    async fn list_pop(&self, key: &str, end: ListEnd) -> Result<Option<String>>;
    async fn list_len(&self, key: &str) -> Result<usize>;

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<()>;
    async fn zset_pop_min(&self, key: &str) -> Result<Option<String>>;
    async fn zset_len(&self, key: &str) -> Result<usize>;

    /// True when `member` was not yet in the set.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool>;
    async fn set_contains(&self, key: &str, member: &str) -> Result<bool>;
    async fn set_pop(&self, key: &str) -> Result<Option<String>>;
    async fn set_len(&self, key: &str) -> Result<usize>;
}
