use super::store::CoordinationStore;
use crate::errors::Result;
use log::{trace, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Fleet-wide mutual exclusion on a single store key.
///
/// Acquired with `SET NX` plus a mandatory expiry, so a holder that dies
/// without releasing only blocks the fleet until the TTL lapses. Release
/// deletes the key only while it still carries this holder's token.
pub struct DistributedLock {
    store: Arc<dyn CoordinationStore>,
    key: String,
    token: String,
    ttl: Duration,
    acquired_at: Instant,
    released: bool,
}

impl DistributedLock {
    /// Single attempt; `Ok(None)` when another holder owns the key.
    pub async fn try_acquire(
        store: Arc<dyn CoordinationStore>,
        key: impl Into<String>,
        ttl: Duration,
    ) -> Result<Option<Self>> {
        let key = key.into();
        let token = Uuid::now_v7().to_string();
        if !store.set_nx_ex(&key, &token, ttl).await? {
            trace!("Lock busy: {key}");
            return Ok(None);
        }
        trace!("Lock acquired: {key}");
        Ok(Some(Self {
            store,
            key,
            token,
            ttl,
            acquired_at: Instant::now(),
            released: false,
        }))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Time left before the store expires the lock on its own.
    pub fn remaining(&self) -> Duration {
        self.ttl.saturating_sub(self.acquired_at.elapsed())
    }

    pub async fn is_held(&self) -> Result<bool> {
        Ok(self.store.get(&self.key).await?.as_deref() == Some(self.token.as_str()))
    }

    /// Returns false when the lock had already expired or changed hands.
    pub async fn release(mut self) -> Result<bool> {
        self.released = true;
        let released = self.store.delete_if_eq(&self.key, &self.token).await?;
        if !released {
            warn!(
                "Lock {} expired before release (held {:?}, ttl {:?})",
                self.key,
                self.acquired_at.elapsed(),
                self.ttl
            );
        }
        Ok(released)
    }
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for DistributedLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // cancelled or panicked holder: release in the background
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let store = self.store.clone();
            let key = std::mem::take(&mut self.key);
            let token = std::mem::take(&mut self.token);
            handle.spawn(async move {
                let _ = store.delete_if_eq(&key, &token).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::LocalStore;

    #[tokio::test]
    async fn test_exclusive_until_released() {
        let store: Arc<dyn CoordinationStore> = Arc::new(LocalStore::new());
        let lock = DistributedLock::try_acquire(store.clone(), "proxy:api_locked", Duration::from_secs(5))
            .await
            .unwrap()
            .expect("first acquire succeeds");
        assert!(lock.is_held().await.unwrap());

        let second =
            DistributedLock::try_acquire(store.clone(), "proxy:api_locked", Duration::from_secs(5))
                .await
                .unwrap();
        assert!(second.is_none());

        assert!(lock.release().await.unwrap());
        let third =
            DistributedLock::try_acquire(store.clone(), "proxy:api_locked", Duration::from_secs(5))
                .await
                .unwrap();
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn test_crashed_holder_expires() {
        let store: Arc<dyn CoordinationStore> = Arc::new(LocalStore::new());
        let lock =
            DistributedLock::try_acquire(store.clone(), "k", Duration::from_millis(40))
                .await
                .unwrap()
                .unwrap();
        // simulate a crash: the holder never releases
        std::mem::forget(lock);
        tokio::time::sleep(Duration::from_millis(70)).await;
        let next = DistributedLock::try_acquire(store.clone(), "k", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn test_release_after_expiry_does_not_steal() {
        let store: Arc<dyn CoordinationStore> = Arc::new(LocalStore::new());
        let stale = DistributedLock::try_acquire(store.clone(), "k", Duration::from_millis(30))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let owner = DistributedLock::try_acquire(store.clone(), "k", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert!(!stale.release().await.unwrap());
        assert!(owner.is_held().await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_lock_is_released() {
        let store: Arc<dyn CoordinationStore> = Arc::new(LocalStore::new());
        {
            let _lock = DistributedLock::try_acquire(store.clone(), "k", Duration::from_secs(30))
                .await
                .unwrap()
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!store.exists("k").await.unwrap());
    }
}
