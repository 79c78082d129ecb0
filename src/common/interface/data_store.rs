use async_trait::async_trait;
use crate::errors::Result;
use serde_json::{Map, Value};

/// Persistence sink the extraction pipeline writes records to.
///
/// The crawler core only ever calls [`PersistenceSink::disconnect`], once, when
/// the worker closes.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn upsert(&self, key: &str, fields: Map<String, Value>) -> Result<()>;
    async fn disconnect(&self);
}
