//! In-memory store backend with passive per-key expiry.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::Instant;

use crate::kv::{Key, Kv, KvError};

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Single-process [`Kv`] backend. An expired entry becomes invisible to
/// reads the moment its deadline passes; no timer ever fires, and writes
/// re-arm the window.
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<Key, Entry>>,
    watchers: Mutex<HashMap<Key, watch::Sender<u64>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    async fn notify(&self, key: &Key) {
        let watchers = self.watchers.lock().await;
        if let Some(tx) = watchers.get(key) {
            tx.send_modify(|version| *version += 1);
        }
    }
}

#[async_trait]
impl Kv for MemoryKv {
    async fn get(&self, key: &Key) -> Result<Option<Value>, KvError> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &Key, value: Value, ttl: Option<Duration>) -> Result<(), KvError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        {
            let mut entries = self.entries.write().await;
            entries.insert(key.clone(), Entry { value, expires_at });
        }
        self.notify(key).await;
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<(), KvError> {
        let removed = self.entries.write().await.remove(key).is_some();
        if removed {
            self.notify(key).await;
        }
        Ok(())
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<(Key, Value)>, KvError> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect())
    }

    async fn watch(&self, key: &Key) -> watch::Receiver<u64> {
        let mut watchers = self.watchers.lock().await;
        let tx = watchers
            .entry(key.clone())
            .or_insert_with(|| watch::channel(0).0);
        let mut rx = tx.subscribe();
        // A fresh subscription starts with one pending event so the consumer
        // observes the current state before the next mutation.
        rx.mark_changed();
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(parts: &[&str]) -> Key {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let kv = MemoryKv::new();
        let k = key(&["room", "r1"]);
        kv.set(&k, json!({"name": "Sprint 1"}), None).await.unwrap();
        assert_eq!(
            kv.get(&k).await.unwrap(),
            Some(json!({"name": "Sprint 1"}))
        );
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let kv = MemoryKv::new();
        assert_eq!(kv.get(&key(&["nope"])).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_invisible() {
        let kv = MemoryKv::new();
        let k = key(&["room", "r1", "user", "u1"]);
        kv.set(&k, json!({"name": "A"}), Some(Duration::from_secs(60)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(kv.get(&k).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(kv.get(&k).await.unwrap().is_none());
        assert!(kv.list(&key(&["room", "r1"])).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rewriting_re_arms_the_ttl() {
        let kv = MemoryKv::new();
        let k = key(&["room", "r1", "user", "u1"]);
        let ttl = Some(Duration::from_secs(60));
        kv.set(&k, json!({"name": "A"}), ttl).await.unwrap();

        tokio::time::advance(Duration::from_secs(40)).await;
        kv.set(&k, json!({"name": "A"}), ttl).await.unwrap();

        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(kv.get(&k).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let kv = MemoryKv::new();
        kv.set(&key(&["room", "r1"]), json!(1), None).await.unwrap();
        kv.set(&key(&["room", "r1", "user", "u1"]), json!(2), None)
            .await
            .unwrap();
        kv.set(&key(&["room", "r1", "user", "u2"]), json!(3), None)
            .await
            .unwrap();
        kv.set(&key(&["room", "r2", "user", "u3"]), json!(4), None)
            .await
            .unwrap();

        let users = kv.list(&key(&["room", "r1", "user"])).await.unwrap();
        assert_eq!(users.len(), 2);
        assert!(users.iter().all(|(k, _)| k[1] == "r1" && k[2] == "user"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let kv = MemoryKv::new();
        let k = key(&["room", "r1"]);
        kv.set(&k, json!(1), None).await.unwrap();
        kv.delete(&k).await.unwrap();
        kv.delete(&k).await.unwrap();
        assert!(kv.get(&k).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn watch_fires_on_every_write() {
        let kv = MemoryKv::new();
        let k = key(&["room", "r1", "refresh"]);
        let mut rx = kv.watch(&k).await;

        // Initial pending event.
        assert!(rx.changed().await.is_ok());

        kv.set(&k, json!("t1"), None).await.unwrap();
        assert!(rx.changed().await.is_ok());

        kv.set(&k, json!("t2"), None).await.unwrap();
        assert!(rx.changed().await.is_ok());
    }

    #[tokio::test]
    async fn watch_ignores_other_keys() {
        let kv = MemoryKv::new();
        let mut rx = kv.watch(&key(&["room", "r1", "refresh"])).await;
        assert!(rx.changed().await.is_ok());

        kv.set(&key(&["room", "r2", "refresh"]), json!("t"), None)
            .await
            .unwrap();
        assert!(!rx.has_changed().unwrap());
    }
}
