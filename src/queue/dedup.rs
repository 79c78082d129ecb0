use crate::errors::Result;
use crate::sync::CoordinationStore;
use metrics::counter;
use std::sync::Arc;

/// Fleet-wide request fingerprint set.
#[derive(Clone)]
pub struct Deduplicator {
    store: Arc<dyn CoordinationStore>,
    key: String,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn CoordinationStore>, name: &str) -> Self {
        Self {
            store,
            key: format!("{name}:dupefilter"),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Records `fingerprint`; returns true when it had already been seen.
    pub async fn seen_or_insert(&self, fingerprint: &str) -> Result<bool> {
        let added = self.store.set_add(&self.key, fingerprint).await?;
        if !added {
            counter!("dedup_hits_total").increment(1);
        }
        Ok(!added)
    }

    pub async fn contains(&self, fingerprint: &str) -> Result<bool> {
        self.store.set_contains(&self.key, fingerprint).await
    }

    pub async fn len(&self) -> Result<usize> {
        self.store.set_len(&self.key).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.delete(&self.key).await
    }
}
