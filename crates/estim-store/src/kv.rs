//! Store contract: key/value entries with per-key expiry and a change feed.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

/// Ordered key parts, e.g. `["room", <room id>, "user", <participant id>]`.
pub type Key = Vec<String>;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Key/value storage with per-key expiry and a per-key change feed.
///
/// Trait seam so a networked backend can replace [`crate::MemoryKv`] without
/// touching the mutation API. Correctness upstream relies only on single
/// calls being atomic; nothing here sequences a read with a later write.
#[async_trait]
pub trait Kv: Send + Sync {
    async fn get(&self, key: &Key) -> Result<Option<Value>, KvError>;

    /// Write `value` under `key`. A `ttl` re-arms the expiry window on every
    /// write; `None` keeps the entry until overwritten or deleted.
    async fn set(&self, key: &Key, value: Value, ttl: Option<Duration>) -> Result<(), KvError>;

    /// Delete `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &Key) -> Result<(), KvError>;

    /// All live entries whose key starts with `prefix`.
    async fn list(&self, prefix: &Key) -> Result<Vec<(Key, Value)>, KvError>;

    /// Change feed for `key`: the receiver resolves once per subsequent
    /// write (coalescing permitted) and starts with one pending event so a
    /// fresh subscriber sees the current state. Dropping the receiver
    /// releases the subscription.
    async fn watch(&self, key: &Key) -> watch::Receiver<u64>;
}
