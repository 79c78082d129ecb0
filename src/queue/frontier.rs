use crate::common::model::{QueuePolicy, Request};
use crate::errors::{QueueError, Result};
use crate::sync::{CoordinationStore, ListEnd};
use std::sync::Arc;

/// Shared queue of pending requests, visible to every worker of the crawl.
///
/// Priority keeps a sorted set scored by `-priority` (highest priority pops
/// first); Fifo and Lifo keep a list pushed at the head and popped from the
/// tail or the head respectively.
#[derive(Clone)]
pub struct Frontier {
    store: Arc<dyn CoordinationStore>,
    key: String,
    policy: QueuePolicy,
}

impl Frontier {
    pub fn new(store: Arc<dyn CoordinationStore>, name: &str, policy: QueuePolicy) -> Self {
        Self {
            store,
            key: format!("{name}:requests"),
            policy,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    pub async fn push(&self, request: &Request) -> Result<()> {
        let payload =
            serde_json::to_string(request).map_err(|e| QueueError::PushFailed(Box::new(e)))?;
        match self.policy {
            QueuePolicy::Priority => {
                self.store
                    .zset_add(&self.key, &payload, -(request.priority as f64))
                    .await
            }
            QueuePolicy::Fifo | QueuePolicy::Lifo => self.store.list_push(&self.key, &payload).await,
        }
    }

    pub async fn pop(&self) -> Result<Option<Request>> {
        let payload = match self.policy {
            QueuePolicy::Priority => self.store.zset_pop_min(&self.key).await?,
            QueuePolicy::Fifo => self.store.list_pop(&self.key, ListEnd::Tail).await?,
            QueuePolicy::Lifo => self.store.list_pop(&self.key, ListEnd::Head).await?,
        };
        payload
            .map(|p| {
                serde_json::from_str::<Request>(&p)
                    .map_err(|e| QueueError::InvalidPayload(Box::new(e)).into())
            })
            .transpose()
    }

    pub async fn len(&self) -> Result<usize> {
        match self.policy {
            QueuePolicy::Priority => self.store.zset_len(&self.key).await,
            QueuePolicy::Fifo | QueuePolicy::Lifo => self.store.list_len(&self.key).await,
        }
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.delete(&self.key).await
    }
}
