//! Concurrent map of expiring entries.
//!
//! Reads that find an expired entry evict it, so correctness never depends
//! on the background sweep having run.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// An entry with an absolute expiry instant.
pub trait Expires {
    fn expires_at(&self) -> DateTime<Utc>;

    /// Expired at or after the expiry instant.
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

/// Outcome of a lookup that distinguishes "never there" from "lapsed".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    Missing,
    /// The entry existed but had expired; it has been evicted.
    Expired,
    Live(V),
}

impl<V> Lookup<V> {
    pub fn live(self) -> Option<V> {
        match self {
            Lookup::Live(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ExpiringMap<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for ExpiringMap<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> ExpiringMap<K, V>
where
    K: Eq + Hash,
    V: Expires + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Returns the previous entry, if any.
    pub async fn insert(&self, key: K, value: V) -> Option<V> {
        self.entries.write().await.insert(key, value)
    }

    pub async fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.write().await.remove(key)
    }

    /// Look up a key, evicting it if it has expired.
    pub async fn lookup<Q>(&self, key: &Q, now: DateTime<Utc>) -> Lookup<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Lookup::Missing,
                Some(v) if !v.is_expired_at(now) => return Lookup::Live(v.clone()),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        // Re-check: a concurrent insert may have replaced the stale entry.
        match entries.get(key) {
            None => Lookup::Expired,
            Some(v) if !v.is_expired_at(now) => Lookup::Live(v.clone()),
            Some(_) => {
                entries.remove(key);
                Lookup::Expired
            }
        }
    }

    /// Live entry for `key`, if any.
    pub async fn get<Q>(&self, key: &Q, now: DateTime<Utc>) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lookup(key, now).await.live()
    }

    /// Apply `f` to a live entry in place. Returns `None` when the entry is
    /// missing or expired.
    pub async fn modify<Q, R, F>(&self, key: &Q, now: DateTime<Utc>, f: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&mut V) -> R,
    {
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(v) if !v.is_expired_at(now) => Some(f(v)),
            _ => None,
        }
    }

    /// Remove every expired entry. Returns how many were removed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, v| !v.is_expired_at(now));
        before - entries.len()
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use chrono::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Entry {
        value: u32,
        expires: DateTime<Utc>,
    }

    impl Expires for Entry {
        fn expires_at(&self) -> DateTime<Utc> {
            self.expires
        }
    }

    fn entry(value: u32, expires: DateTime<Utc>) -> Entry {
        Entry { value, expires }
    }

    #[tokio::test]
    async fn test_lookup_distinguishes_missing_and_expired() {
        let now = Utc::now();
        let map = ExpiringMap::new();
        map.insert("a".to_string(), entry(1, now + Duration::seconds(10))).await;
        map.insert("b".to_string(), entry(2, now)).await;

        assert_eq!(map.lookup("a", now).await, Lookup::Live(entry(1, now + Duration::seconds(10))));
        assert_eq!(map.lookup("b", now).await, Lookup::Expired);
        // Evicted on the previous read.
        assert_eq!(map.lookup("b", now).await, Lookup::Missing);
        assert_eq!(map.lookup("zzz", now).await, Lookup::Missing);
    }

    #[tokio::test]
    async fn test_insert_replaces() {
        let now = Utc::now();
        let map = ExpiringMap::new();
        assert!(map.insert("k".to_string(), entry(1, now + Duration::seconds(5))).await.is_none());
        let old = map.insert("k".to_string(), entry(2, now + Duration::seconds(5))).await;
        assert_eq!(old.map(|e| e.value), Some(1));
        assert_eq!(map.get("k", now).await.map(|e| e.value), Some(2));
        assert_eq!(map.len().await, 1);
    }

    #[tokio::test]
    async fn test_modify_skips_expired() {
        let now = Utc::now();
        let map = ExpiringMap::new();
        map.insert("k".to_string(), entry(1, now + Duration::seconds(5))).await;

        assert_eq!(map.modify("k", now, |e| { e.value = 7; e.value }).await, Some(7));
        assert_eq!(map.modify("k", now + Duration::seconds(5), |e| e.value).await, None);
        assert_eq!(map.modify("missing", now, |e| e.value).await, None);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let now = Utc::now();
        let map = ExpiringMap::new();
        map.insert(1u32, entry(1, now - Duration::seconds(1))).await;
        map.insert(2u32, entry(2, now)).await;
        map.insert(3u32, entry(3, now + Duration::seconds(1))).await;

        assert_eq!(map.sweep(now).await, 2);
        assert_eq!(map.len().await, 1);
        assert!(map.get(&3u32, now).await.is_some());
        assert_eq!(map.sweep(now).await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_and_reads() {
        let now = Utc::now();
        let map = Arc::new(ExpiringMap::new());
        let tasks: Vec<_> = (0..32u32)
            .map(|i| {
                let map = map.clone();
                tokio::spawn(async move {
                    map.insert(i, entry(i, now + Duration::seconds(60))).await;
                    map.get(&i, now).await.map(|e| e.value)
                })
            })
            .collect();

        for (i, task) in futures::future::join_all(tasks).await.into_iter().enumerate() {
            assert_eq!(task.unwrap(), Some(i as u32));
        }
        assert_eq!(map.len().await, 32);
    }
}
