use crate::common::model::Request;
use crate::errors::Result;
use crate::sync::CoordinationStore;
use log::warn;
use std::sync::Arc;

/// Externally fed start urls.
///
/// Operators add urls to the seed set; workers pop them when their frontier
/// runs dry. The key vanishes once the set is drained, which the idle monitor
/// reads as "no more seed work".
#[derive(Clone)]
pub struct SeedQueue {
    store: Arc<dyn CoordinationStore>,
    key: String,
}

impl SeedQueue {
    pub fn new(store: Arc<dyn CoordinationStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn exists(&self) -> Result<bool> {
        self.store.exists(&self.key).await
    }

    pub async fn add(&self, url: &str) -> Result<bool> {
        self.store.set_add(&self.key, url).await
    }

    /// Pops up to `n` seeds; blank or malformed urls are logged and skipped.
    pub async fn pop_batch(&self, n: usize) -> Result<Vec<Request>> {
        let mut requests = Vec::with_capacity(n);
        for _ in 0..n {
            let Some(url) = self.store.set_pop(&self.key).await? else {
                break;
            };
            let url = url.trim();
            if url.is_empty() {
                continue;
            }
            let request = Request::new(url);
            if let Err(e) = request.validate() {
                warn!("Dropping malformed seed {url}: {e}");
                continue;
            }
            requests.push(request);
        }
        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::LocalStore;

    #[tokio::test]
    async fn test_pop_batch_drains_and_removes_key() {
        let seeds = SeedQueue::new(Arc::new(LocalStore::new()), "listings:start_urls");
        seeds.add("http://sh.example.com/").await.unwrap();
        seeds.add("not a url").await.unwrap();
        seeds.add("http://bj.example.com/").await.unwrap();
        assert!(seeds.exists().await.unwrap());

        let batch = seeds.pop_batch(16).await.unwrap();
        let mut urls: Vec<_> = batch.into_iter().map(|r| r.url).collect();
        urls.sort();
        assert_eq!(urls, vec!["http://bj.example.com/", "http://sh.example.com/"]);
        assert!(!seeds.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_pop_batch_respects_limit() {
        let seeds = SeedQueue::new(Arc::new(LocalStore::new()), "s");
        for i in 0..5 {
            seeds.add(&format!("http://x/{i}")).await.unwrap();
        }
        assert_eq!(seeds.pop_batch(2).await.unwrap().len(), 2);
        assert!(seeds.exists().await.unwrap());
    }
}
