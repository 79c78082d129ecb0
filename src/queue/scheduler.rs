use super::{Deduplicator, Frontier, SeedQueue};
use crate::common::model::{QueuePolicy, Request};
use crate::errors::Result;
use crate::sync::CoordinationStore;
use log::{debug, info};
use std::sync::Arc;

/// Worker-side view of the shared crawl queue: dupefilter in front of the
/// frontier, with the seed set as a fallback source when the frontier is dry.
#[derive(Clone)]
pub struct Scheduler {
    frontier: Frontier,
    dedup: Deduplicator,
    seeds: SeedQueue,
    seed_batch_size: usize,
    persist: bool,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        name: &str,
        policy: QueuePolicy,
        seed_key: impl Into<String>,
    ) -> Self {
        Self {
            frontier: Frontier::new(store.clone(), name, policy),
            dedup: Deduplicator::new(store.clone(), name),
            seeds: SeedQueue::new(store, seed_key),
            seed_batch_size: 16,
            persist: true,
        }
    }

    pub fn with_seed_batch_size(mut self, n: usize) -> Self {
        self.seed_batch_size = n.max(1);
        self
    }

    /// When false, `close` flushes the frontier and the dupefilter.
    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    pub fn seeds(&self) -> &SeedQueue {
        &self.seeds
    }

    /// Returns false when the request was filtered as a duplicate.
    pub async fn enqueue(&self, request: &Request) -> Result<bool> {
        if !request.dont_filter && self.dedup.seen_or_insert(&request.fingerprint()).await? {
            debug!("Filtered duplicate request: {}", request.url);
            return Ok(false);
        }
        self.frontier.push(request).await?;
        Ok(true)
    }

    /// Next request from the frontier, refilled from the seed set when empty.
    pub async fn next_request(&self) -> Result<Option<Request>> {
        if let Some(request) = self.frontier.pop().await? {
            return Ok(Some(request));
        }
        let batch = self.seeds.pop_batch(self.seed_batch_size).await?;
        if batch.is_empty() {
            return Ok(None);
        }
        debug!("Scheduling {} seed requests", batch.len());
        for seed in batch {
            // start urls are always (re)crawled
            self.enqueue(&seed.with_dont_filter(true)).await?;
        }
        self.frontier.pop().await
    }

    /// Puts a popped request back, bypassing the dupefilter that already
    /// holds its fingerprint.
    pub async fn requeue(&self, request: &Request) -> Result<()> {
        self.frontier.push(&request.clone().with_dont_filter(true)).await
    }

    pub fn persist(&self) -> bool {
        self.persist
    }

    pub async fn has_pending(&self) -> Result<bool> {
        Ok(!self.frontier.is_empty().await?)
    }

    pub async fn close(&self) -> Result<()> {
        if self.persist {
            return Ok(());
        }
        info!("Flushing frontier {} and dupefilter {}", self.frontier.key(), self.dedup.key());
        self.frontier.clear().await?;
        self.dedup.clear().await
    }
}
