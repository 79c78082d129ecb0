use super::store::{CoordinationStore, ListEnd};
use crate::errors::{Result, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

/// In-process coordination store.
///
/// Follows Redis semantics closely enough for single-host crawls and tests:
/// string keys honour their expiry, collections disappear once emptied, and
/// a key holds exactly one type.
#[derive(Debug, Default)]
pub struct LocalStore {
    strings: DashMap<String, (String, Option<Instant>)>,
    lists: DashMap<String, VecDeque<String>>,
    zsets: DashMap<String, Vec<(f64, String)>>,
    sets: DashMap<String, HashSet<String>>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_string(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let expired = match self.strings.get(key) {
            Some(entry) => match entry.1 {
                Some(expire_at) if expire_at <= now => true,
                _ => return Some(entry.0.clone()),
            },
            None => return None,
        };
        if expired {
            self.strings
                .remove_if(key, |_, (_, exp)| exp.is_some_and(|e| e <= now));
        }
        None
    }

    fn ensure_type(&self, key: &str, kind: KeyKind) -> Result<()> {
        let clash = (kind != KeyKind::String && self.live_string(key).is_some())
            || (kind != KeyKind::List && self.lists.contains_key(key))
            || (kind != KeyKind::ZSet && self.zsets.contains_key(key))
            || (kind != KeyKind::Set && self.sets.contains_key(key));
        if clash {
            return Err(StoreError::WrongType(key.to_string()).into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    String,
    List,
    ZSet,
    Set,
}

#[async_trait]
impl CoordinationStore for LocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.ensure_type(key, KeyKind::String)?;
        Ok(self.live_string(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_type(key, KeyKind::String)?;
        self.strings
            .insert(key.to_string(), (value.to_string(), None));
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.ensure_type(key, KeyKind::String)?;
        let now = Instant::now();
        let fresh = (value.to_string(), Some(now + ttl));
        match self.strings.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().1.is_some_and(|e| e <= now) {
                    entry.insert(fresh);
                    return Ok(true);
                }
                Ok(false)
            }
            Entry::Vacant(entry) => {
                entry.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.strings.remove(key);
        self.lists.remove(key);
        self.zsets.remove(key);
        self.sets.remove(key);
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, value: &str) -> Result<bool> {
        let now = Instant::now();
        let removed = self.strings.remove_if(key, |_, (current, exp)| {
            current == value && !exp.is_some_and(|e| e <= now)
        });
        Ok(removed.is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live_string(key).is_some()
            || self.lists.contains_key(key)
            || self.zsets.contains_key(key)
            || self.sets.contains_key(key))
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_type(key, KeyKind::List)?;
        self.lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn list_pop(&self, key: &str, end: ListEnd) -> Result<Option<String>> {
        self.ensure_type(key, KeyKind::List)?;
        let Some(mut list) = self.lists.get_mut(key) else {
            return Ok(None);
        };
        let value = match end {
            ListEnd::Head => list.pop_front(),
            ListEnd::Tail => list.pop_back(),
        };
        drop(list);
        self.lists.remove_if(key, |_, l| l.is_empty());
        Ok(value)
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        self.ensure_type(key, KeyKind::List)?;
        Ok(self.lists.get(key).map(|l| l.len()).unwrap_or(0))
    }

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.ensure_type(key, KeyKind::ZSet)?;
        let mut zset = self.zsets.entry(key.to_string()).or_default();
        zset.retain(|(_, m)| m != member);
        // ties are ordered by member, like Redis
        let position = zset
            .iter()
            .position(|(s, m)| *s > score || (*s == score && m.as_str() > member))
            .unwrap_or(zset.len());
        zset.insert(position, (score, member.to_string()));
        Ok(())
    }

    async fn zset_pop_min(&self, key: &str) -> Result<Option<String>> {
        self.ensure_type(key, KeyKind::ZSet)?;
        let Some(mut zset) = self.zsets.get_mut(key) else {
            return Ok(None);
        };
        let value = if zset.is_empty() {
            None
        } else {
            Some(zset.remove(0).1)
        };
        drop(zset);
        self.zsets.remove_if(key, |_, z| z.is_empty());
        Ok(value)
    }

    async fn zset_len(&self, key: &str) -> Result<usize> {
        self.ensure_type(key, KeyKind::ZSet)?;
        Ok(self.zsets.get(key).map(|z| z.len()).unwrap_or(0))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        self.ensure_type(key, KeyKind::Set)?;
        Ok(self
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        self.ensure_type(key, KeyKind::Set)?;
        Ok(self.sets.get(key).is_some_and(|s| s.contains(member)))
    }

    async fn set_pop(&self, key: &str) -> Result<Option<String>> {
        self.ensure_type(key, KeyKind::Set)?;
        let Some(mut set) = self.sets.get_mut(key) else {
            return Ok(None);
        };
        let member = set.iter().next().cloned();
        if let Some(ref m) = member {
            set.remove(m);
        }
        drop(set);
        self.sets.remove_if(key, |_, s| s.is_empty());
        Ok(member)
    }

    async fn set_len(&self, key: &str) -> Result<usize> {
        self.ensure_type(key, KeyKind::Set)?;
        Ok(self.sets.get(key).map(|s| s.len()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_nx_ex_respects_expiry() {
        let store = LocalStore::new();
        assert!(store
            .set_nx_ex("lock", "a", Duration::from_millis(50))
            .await
            .unwrap());
        assert!(!store
            .set_nx_ex("lock", "b", Duration::from_millis(50))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!store.exists("lock").await.unwrap());
        assert!(store
            .set_nx_ex("lock", "b", Duration::from_secs(5))
            .await
            .unwrap());
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_delete_if_eq_only_removes_owner_value() {
        let store = LocalStore::new();
        store.set("lock", "owner").await.unwrap();
        assert!(!store.delete_if_eq("lock", "intruder").await.unwrap());
        assert!(store.exists("lock").await.unwrap());
        assert!(store.delete_if_eq("lock", "owner").await.unwrap());
        assert!(!store.exists("lock").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_ends() {
        let store = LocalStore::new();
        for v in ["a", "b", "c"] {
            store.list_push("q", v).await.unwrap();
        }
        assert_eq!(store.list_len("q").await.unwrap(), 3);
        assert_eq!(store.list_pop("q", ListEnd::Tail).await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.list_pop("q", ListEnd::Head).await.unwrap().as_deref(), Some("c"));
        assert_eq!(store.list_pop("q", ListEnd::Head).await.unwrap().as_deref(), Some("b"));
        assert!(!store.exists("q").await.unwrap());
    }

    #[tokio::test]
    async fn test_zset_orders_by_score_then_member() {
        let store = LocalStore::new();
        store.zset_add("z", "late", 5.0).await.unwrap();
        store.zset_add("z", "b", -1.0).await.unwrap();
        store.zset_add("z", "a", -1.0).await.unwrap();
        store.zset_add("z", "late", -10.0).await.unwrap();
        assert_eq!(store.zset_len("z").await.unwrap(), 3);
        assert_eq!(store.zset_pop_min("z").await.unwrap().as_deref(), Some("late"));
        assert_eq!(store.zset_pop_min("z").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.zset_pop_min("z").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.zset_pop_min("z").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_disappears_when_drained() {
        let store = LocalStore::new();
        assert!(store.set_add("seeds", "http://a").await.unwrap());
        assert!(!store.set_add("seeds", "http://a").await.unwrap());
        assert!(store.set_contains("seeds", "http://a").await.unwrap());
        assert!(store.exists("seeds").await.unwrap());
        assert_eq!(store.set_pop("seeds").await.unwrap().as_deref(), Some("http://a"));
        assert!(!store.exists("seeds").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = LocalStore::new();
        store.set("k", "v").await.unwrap();
        let err = store.list_push("k", "x").await.unwrap_err();
        assert!(err.is_store());
    }
}
