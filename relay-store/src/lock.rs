//! Distributed locks over the KV backend.
//!
//! A lock is a key holding an owner token with a TTL. Acquisition is atomic
//! set-if-absent; release and extension only act when the stored token
//! matches, so a lock that expired and was re-acquired by someone else
//! cannot be stolen back. With no backend attached, operations succeed
//! optimistically (single-instance fail-open).

use std::sync::Arc;
use std::time::Duration;

use relay_types::StoreError;

use crate::cache::CacheClient;
use crate::kv::KvBackend;

/// Lock manager over the cache's backend.
#[derive(Clone)]
pub struct LockManager {
    backend: Option<Arc<dyn KvBackend>>,
    prefix: String,
}

impl LockManager {
    /// Build a manager sharing the cache client's backend and keyspace.
    #[must_use]
    pub fn new(cache: &CacheClient) -> Self {
        Self {
            backend: cache.backend(),
            prefix: "lock".into(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    /// Try to take the lock. Returns `true` when this call acquired it.
    pub async fn acquire(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        match &self.backend {
            Some(backend) => backend.set_nx(&self.full_key(key), value, ttl).await,
            None => Ok(true),
        }
    }

    /// Release the lock if `value` still owns it.
    pub async fn release(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        match &self.backend {
            Some(backend) => backend.del_if_equals(&self.full_key(key), value).await,
            None => Ok(true),
        }
    }

    /// Extend the lock's TTL if `value` still owns it.
    pub async fn extend(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        match &self.backend {
            Some(backend) => backend.expire_if_equals(&self.full_key(key), value, ttl).await,
            None => Ok(true),
        }
    }

    /// Acquire with a bounded wait, polling at `retry_every`.
    ///
    /// Returns `false` if the lock was still held when `wait` ran out.
    pub async fn acquire_with_wait(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        wait: Duration,
        retry_every: Duration,
    ) -> Result<bool, StoreError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if self.acquire(key, value, ttl).await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() + retry_every > deadline {
                return Ok(false);
            }
            tokio::time::sleep(retry_every).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryBackend;
    use relay_types::CacheConfig;

    fn manager() -> LockManager {
        let cache = CacheClient::new(Arc::new(MemoryBackend::new()), &CacheConfig::default());
        LockManager::new(&cache)
    }

    #[tokio::test]
    async fn acquire_is_exclusive_until_release() {
        let locks = manager();
        let ttl = Duration::from_secs(10);
        assert!(locks.acquire("session:s-1", "turn-a", ttl).await.unwrap());
        assert!(!locks.acquire("session:s-1", "turn-b", ttl).await.unwrap());
        assert!(locks.release("session:s-1", "turn-a").await.unwrap());
        assert!(locks.acquire("session:s-1", "turn-b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn release_requires_matching_value() {
        let locks = manager();
        let ttl = Duration::from_secs(10);
        locks.acquire("k", "owner", ttl).await.unwrap();
        assert!(!locks.release("k", "thief").await.unwrap());
        assert!(locks.release("k", "owner").await.unwrap());
    }

    #[tokio::test]
    async fn acquire_release_leaves_keyspace_unchanged() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = CacheClient::new(backend.clone(), &CacheConfig::default());
        let locks = LockManager::new(&cache);
        locks.acquire("k", "v", Duration::from_secs(5)).await.unwrap();
        locks.release("k", "v").await.unwrap();
        assert!(backend.keys("*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ttl_expiry_frees_the_lock() {
        let locks = manager();
        assert!(
            locks
                .acquire("k", "a", Duration::from_millis(20))
                .await
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(locks.acquire("k", "b", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn extend_keeps_ownership() {
        let locks = manager();
        locks
            .acquire("k", "owner", Duration::from_millis(30))
            .await
            .unwrap();
        assert!(
            locks
                .extend("k", "owner", Duration::from_secs(5))
                .await
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!locks.acquire("k", "other", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn no_backend_is_fail_open() {
        let cache = CacheClient::disconnected(&CacheConfig::default());
        let locks = LockManager::new(&cache);
        assert!(locks.acquire("k", "v", Duration::from_secs(1)).await.unwrap());
        assert!(locks.release("k", "v").await.unwrap());
    }

    #[tokio::test]
    async fn bounded_wait_gives_up() {
        let locks = manager();
        locks.acquire("k", "holder", Duration::from_secs(10)).await.unwrap();
        let got = locks
            .acquire_with_wait(
                "k",
                "waiter",
                Duration::from_secs(10),
                Duration::from_millis(30),
                Duration::from_millis(10),
            )
            .await
            .unwrap();
        assert!(!got);
    }
}
