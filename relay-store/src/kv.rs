//! Key-value backend abstraction.
//!
//! [`KvBackend`] is the seam between the cache surface and the actual
//! store. [`RedisBackend`] is the production implementation;
//! [`MemoryBackend`] backs tests and single-node deployments. Both expose
//! the same compare-and-act primitives the lock layer needs, so lock
//! semantics hold on either backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tokio::sync::RwLock;

use relay_types::StoreError;

/// Async key-value operations over string values.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Whether the backend currently has a live connection.
    fn is_connected(&self) -> bool;

    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value with an optional TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Delete a key. Returns whether it existed.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Reset a key's TTL. Returns whether the key existed.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// List keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Atomic set-if-absent with TTL. Returns whether the write happened.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Delete `key` only if its value equals `value`. Returns whether it did.
    async fn del_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    /// Reset `key`'s TTL only if its value equals `value`.
    async fn expire_if_equals(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;
}

// ---- Redis --------------------------------------------------------------

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("expire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Redis-backed implementation over a shared [`ConnectionManager`].
///
/// The manager multiplexes one connection and reconnects internally;
/// clones are cheap and share it.
#[derive(Clone)]
pub struct RedisBackend {
    manager: ConnectionManager,
}

impl RedisBackend {
    /// Connect to the given Redis URL.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Backend(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    fn is_connected(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut con = self.conn();
        con.get(key)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut con = self.conn();
        match ttl {
            Some(ttl) => con
                .set_ex(key, value, ttl.as_secs())
                .await
                .map_err(|e| StoreError::Backend(e.to_string())),
            None => con
                .set(key, value)
                .await
                .map_err(|e| StoreError::Backend(e.to_string())),
        }
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut con = self.conn();
        let removed: u64 = con
            .del(key)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut con = self.conn();
        con.exists(key)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut con = self.conn();
        con.expire(key, ttl.as_secs() as i64)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut con = self.conn();
        con.keys(pattern)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut con = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut con)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(reply.is_some())
    }

    async fn del_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut con = self.conn();
        let deleted: i64 = Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(value)
            .invoke_async(&mut con)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(deleted > 0)
    }

    async fn expire_if_equals(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut con = self.conn();
        let extended: i64 = Script::new(EXTEND_SCRIPT)
            .key(key)
            .arg(value)
            .arg(ttl.as_secs())
            .invoke_async(&mut con)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(extended > 0)
    }
}

// ---- In-memory ----------------------------------------------------------

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory backend with real TTL semantics.
///
/// Expired entries are dropped lazily on access.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn live_value(&self, key: &str) -> Option<String> {
        let mut map = self.entries.write().await;
        match map.get(key) {
            Some(entry) if entry.is_expired() => {
                map.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    fn is_connected(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.live_value(key).await)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut map = self.entries.write().await;
        map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut map = self.entries.write().await;
        Ok(map.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.live_value(key).await.is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut map = self.entries.write().await;
        match map.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let map = self.entries.read().await;
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        Ok(map
            .iter()
            .filter(|(k, entry)| !entry.is_expired() && k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut map = self.entries.write().await;
        let occupied = map.get(key).is_some_and(|entry| !entry.is_expired());
        if occupied {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn del_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut map = self.entries.write().await;
        let matches = map
            .get(key)
            .is_some_and(|entry| !entry.is_expired() && entry.value == value);
        if matches {
            map.remove(key);
        }
        Ok(matches)
    }

    async fn expire_if_equals(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut map = self.entries.write().await;
        match map.get_mut(key) {
            Some(entry) if !entry.is_expired() && entry.value == value => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_set_get_del() {
        let kv = MemoryBackend::new();
        kv.set("a", "1", None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some("1".into()));
        assert!(kv.exists("a").await.unwrap());
        assert!(kv.del("a").await.unwrap());
        assert_eq!(kv.get("a").await.unwrap(), None);
        assert!(!kv.del("a").await.unwrap());
    }

    #[tokio::test]
    async fn memory_ttl_expires() {
        let kv = MemoryBackend::new();
        kv.set("a", "1", Some(Duration::from_millis(20))).await.unwrap();
        assert!(kv.exists("a").await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_set_nx_respects_occupancy() {
        let kv = MemoryBackend::new();
        assert!(kv.set_nx("lock", "v1", Duration::from_secs(10)).await.unwrap());
        assert!(!kv.set_nx("lock", "v2", Duration::from_secs(10)).await.unwrap());
        assert!(kv.del_if_equals("lock", "v1").await.unwrap());
        assert!(kv.set_nx("lock", "v2", Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn memory_del_if_equals_checks_value() {
        let kv = MemoryBackend::new();
        kv.set("k", "owner", None).await.unwrap();
        assert!(!kv.del_if_equals("k", "thief").await.unwrap());
        assert!(kv.exists("k").await.unwrap());
        assert!(kv.del_if_equals("k", "owner").await.unwrap());
    }

    #[tokio::test]
    async fn memory_keys_prefix_match() {
        let kv = MemoryBackend::new();
        kv.set("relay:a", "1", None).await.unwrap();
        kv.set("relay:b", "2", None).await.unwrap();
        kv.set("other", "3", None).await.unwrap();
        let mut keys = kv.keys("relay:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["relay:a".to_string(), "relay:b".to_string()]);
    }

    #[tokio::test]
    async fn memory_expire_if_equals() {
        let kv = MemoryBackend::new();
        kv.set("k", "owner", Some(Duration::from_millis(30))).await.unwrap();
        assert!(
            kv.expire_if_equals("k", "owner", Duration::from_secs(5))
                .await
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Extended past the original TTL, still present.
        assert!(kv.exists("k").await.unwrap());
        assert!(!kv.expire_if_equals("k", "thief", Duration::from_secs(5)).await.unwrap());
    }
}
