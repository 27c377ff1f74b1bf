//! The assembled-context cache.
//!
//! Keys derive from `(user, topic hash, model)`; validity is governed by
//! the entry's own `expires_at`, not its age, so an entry written with a
//! short horizon expires on time even if the backend TTL is longer.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use relay_store::CacheClient;
use relay_types::StoreError;

use crate::topic::short_hash;

/// How long assembled contexts stay valid.
pub const CONTEXT_TTL: Duration = Duration::hours(1);

/// Bookkeeping carried with a cache entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextCacheMetadata {
    /// Memories included at assembly time.
    pub memory_count: usize,
    /// Entities from the topic classification.
    pub entity_list: Vec<String>,
    /// `total_chars / (total_tokens * 4)` at assembly time.
    pub compression_ratio: f64,
    /// Assembly wall time in milliseconds.
    pub computation_time_ms: u64,
}

/// One cached assembled context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextCacheEntry {
    /// Derived cache key.
    pub key: String,
    /// Owning user.
    pub user_id: String,
    /// Topic hash the entry was assembled for.
    pub topic_hash: String,
    /// The assembled context prompt.
    pub prompt_template: String,
    /// Memory contents included at assembly time.
    pub relevant_memories: Vec<String>,
    /// Token total of the assembled context.
    pub total_tokens: u64,
    /// When the entry was computed.
    pub computed_at: DateTime<Utc>,
    /// Validity horizon; reads past this point miss.
    pub expires_at: DateTime<Utc>,
    /// Number of cache hits served.
    pub hit_count: u64,
    /// Last read or write.
    pub last_accessed: DateTime<Utc>,
    /// Bookkeeping.
    pub metadata: ContextCacheMetadata,
}

/// Context cache over the shared KV client.
#[derive(Clone)]
pub struct ContextCache {
    cache: CacheClient,
}

impl ContextCache {
    /// Wrap the shared cache client.
    #[must_use]
    pub fn new(cache: CacheClient) -> Self {
        Self { cache }
    }

    /// Derive the cache key for `(user, topic hash, model)`.
    #[must_use]
    pub fn cache_key(user_id: &str, topic_hash: &str, model_id: &str) -> String {
        short_hash(&format!("{user_id}:{topic_hash}:{model_id}"))
    }

    fn storage_key(key: &str) -> String {
        format!("context:{key}")
    }

    /// Read a valid entry, bumping its hit statistics.
    ///
    /// An entry past its `expires_at` misses even if the backend still
    /// holds it.
    pub async fn get(&self, key: &str) -> Result<Option<ContextCacheEntry>, StoreError> {
        let Some(mut entry) = self
            .cache
            .get::<ContextCacheEntry>(&Self::storage_key(key))
            .await?
        else {
            return Ok(None);
        };
        if Utc::now() >= entry.expires_at {
            return Ok(None);
        }
        entry.hit_count += 1;
        entry.last_accessed = Utc::now();
        // Hit bookkeeping is best-effort; a failed write-back still serves
        // the hit.
        let remaining = (entry.expires_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(1));
        let _ = self
            .cache
            .set(&Self::storage_key(key), &entry, Some(remaining))
            .await;
        Ok(Some(entry))
    }

    /// Write an entry with the standard TTL.
    pub async fn put(&self, entry: &ContextCacheEntry) -> Result<(), StoreError> {
        let ttl = (entry.expires_at - Utc::now())
            .to_std()
            .unwrap_or_else(|_| CONTEXT_TTL.to_std().unwrap_or_default());
        self.cache
            .set(&Self::storage_key(&entry.key), entry, Some(ttl))
            .await
    }
}
