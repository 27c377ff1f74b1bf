//! The memory manager.
//!
//! Hot memory lives in the KV cache under `memory:<user_id>`; entries with
//! importance at or above the promotion threshold also land in the durable
//! archive. Retrieval is vector-first with a scored keyword fallback, and
//! positive retrievals are cached for five minutes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};

use relay_store::{
    CacheClient, CollectionSchema, FieldSchema, IndexConfig, VectorRecord, VectorStore,
};
use relay_types::{
    MemoryConfig, MemoryContext, MemoryEntry, MemoryKind, ProviderError, StoreError,
};

use crate::store::DurableMemoryStore;

/// Name of the vector collection holding memory embeddings.
pub const MEMORY_COLLECTION: &str = "user_memories";

/// Cap on retrieved memories per turn.
pub const MAX_RETRIEVED: usize = 10;

/// TTL for cached retrieval results.
const QUERY_CACHE_TTL: Duration = Duration::from_secs(300);

/// TTL for the hot memory context.
const CONTEXT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Importance floor below which aged entries are pruned.
const PRUNE_IMPORTANCE: f64 = 0.5;

/// Embeds query and memory text. Implemented over the provider fleet.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed texts into the configured dimension.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// What happened on the retrieval path, for the stage's warning events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalPath {
    /// Served from the query cache.
    Cached,
    /// Vector search.
    Vector,
    /// Keyword scoring (vector unavailable or not configured).
    Keyword,
    /// Keyword scoring after a vector failure; worth one warning.
    KeywordAfterVectorFailure,
}

/// A retrieval outcome.
#[derive(Debug, Clone)]
pub struct Retrieved {
    /// Up to [`MAX_RETRIEVED`] memories, most relevant first.
    pub memories: Vec<MemoryEntry>,
    /// Which path produced them.
    pub path: RetrievalPath,
}

/// Memory orchestration for one gateway process.
pub struct MemoryManager {
    cache: CacheClient,
    vector: Option<Arc<dyn VectorStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    durable: Arc<dyn DurableMemoryStore>,
    config: MemoryConfig,
    embedding_dimension: usize,
}

impl MemoryManager {
    /// Build a manager without vector search (keyword retrieval only).
    #[must_use]
    pub fn new(
        cache: CacheClient,
        durable: Arc<dyn DurableMemoryStore>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            cache,
            vector: None,
            embedder: None,
            durable,
            config,
            embedding_dimension: 0,
        }
    }

    /// Attach a vector store and embedder. The collection dimension always
    /// derives from the embedder's configured dimension.
    #[must_use]
    pub fn with_vector(
        mut self,
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        embedding_dimension: usize,
    ) -> Self {
        self.vector = Some(vector);
        self.embedder = Some(embedder);
        self.embedding_dimension = embedding_dimension;
        self
    }

    /// Declare the memory collection. Recreates on dimension change.
    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let Some(vector) = &self.vector else {
            return Ok(());
        };
        vector
            .create_collection(CollectionSchema {
                name: MEMORY_COLLECTION.into(),
                fields: vec![
                    FieldSchema::primary_int64("id"),
                    FieldSchema::varchar("user_id", 128),
                    FieldSchema::varchar("content", 8192),
                    FieldSchema::float("importance"),
                    FieldSchema::float_vector("embedding", self.embedding_dimension),
                ],
                index: IndexConfig::default(),
            })
            .await
    }

    fn context_key(user_id: &str) -> String {
        format!("memory:{user_id}")
    }

    fn query_key(user_id: &str, query: &str) -> String {
        let digest = Sha256::digest(format!("{user_id}:{query}").as_bytes());
        let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
        format!("memquery:{hex}")
    }

    /// The user's hot memory context; empty when none is cached.
    pub async fn context_for(&self, user_id: &str) -> MemoryContext {
        self.cache
            .get::<MemoryContext>(&Self::context_key(user_id))
            .await
            .unwrap_or(None)
            .unwrap_or_default()
    }

    async fn save_context(&self, user_id: &str, context: &MemoryContext) {
        if let Err(error) = self
            .cache
            .set(&Self::context_key(user_id), context, Some(CONTEXT_CACHE_TTL))
            .await
        {
            tracing::warn!(error = %error, "relay.memory.context_save_failed");
        }
    }

    /// Append one memory, enforcing caps, promotion, and consolidation.
    pub async fn remember(&self, entry: MemoryEntry) -> Result<(), StoreError> {
        let Some(user_id) = entry.user_id.clone() else {
            return Ok(());
        };
        let mut context = self.context_for(&user_id).await;

        match entry.kind {
            MemoryKind::Session => {
                context.session_memory.push(entry.clone());
                // FIFO eviction at the session cap.
                while context.session_memory.len() > self.config.max_session_memory {
                    context.session_memory.remove(0);
                }
            }
            MemoryKind::User => {
                context.user_memory.push(entry.clone());
                while context.user_memory.len() > self.config.max_user_memory {
                    context.user_memory.remove(0);
                }
            }
            MemoryKind::Semantic => context.semantic_memory.push(entry.clone()),
            MemoryKind::Working => context.working_memory.push(entry.clone()),
        }

        // High-importance semantic knowledge survives the cache.
        if entry.kind == MemoryKind::Semantic && entry.is_protected() {
            if let Err(error) = self.durable.save(&entry).await {
                tracing::warn!(error = %error, "relay.memory.promotion_failed");
            }
            self.index_entry(&entry).await;
        }

        if context.total() >= self.config.consolidation_threshold {
            self.consolidate(&mut context);
        }

        context.touch();
        self.save_context(&user_id, &context).await;
        Ok(())
    }

    /// Working memory never outlives its turn.
    pub async fn clear_working(&self, user_id: &str) {
        let mut context = self.context_for(user_id).await;
        if context.working_memory.is_empty() {
            return;
        }
        context.working_memory.clear();
        context.touch();
        self.save_context(user_id, &context).await;
    }

    /// Dedup by lowercase content and prune aged low-importance entries.
    /// Entries at or above the protection threshold always survive.
    pub fn consolidate(&self, context: &mut MemoryContext) {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.retention_days);
        let mut seen: HashMap<String, ()> = HashMap::new();

        for band in [
            &mut context.session_memory,
            &mut context.user_memory,
            &mut context.semantic_memory,
        ] {
            band.retain(|entry| {
                let fresh = seen.insert(entry.content.to_lowercase(), ()).is_none();
                if entry.is_protected() {
                    return true;
                }
                if entry.timestamp < cutoff && entry.importance < PRUNE_IMPORTANCE {
                    return false;
                }
                fresh
            });
        }
        context.touch();
    }

    async fn index_entry(&self, entry: &MemoryEntry) {
        let (Some(vector), Some(embedder)) = (&self.vector, &self.embedder) else {
            return;
        };
        let embedding = match embedder.embed(std::slice::from_ref(&entry.content)).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => return,
            Err(error) => {
                tracing::warn!(error = %error, "relay.memory.embed_failed");
                return;
            }
        };
        let record = VectorRecord {
            id: entry.timestamp.timestamp_millis(),
            vector: embedding,
            fields: HashMap::from([
                (
                    "user_id".to_string(),
                    serde_json::Value::String(entry.user_id.clone().unwrap_or_default()),
                ),
                (
                    "content".to_string(),
                    serde_json::Value::String(entry.content.clone()),
                ),
                (
                    "importance".to_string(),
                    serde_json::json!(entry.importance),
                ),
            ]),
        };
        if let Err(error) = vector.insert(MEMORY_COLLECTION, vec![record]).await {
            tracing::warn!(error = %error, "relay.memory.index_failed");
        }
    }

    /// Retrieve up to [`MAX_RETRIEVED`] memories relevant to `query`.
    pub async fn retrieve(&self, user_id: &str, query: &str) -> Retrieved {
        let cache_key = Self::query_key(user_id, query);
        let context = self.context_for(user_id).await;

        if let Ok(Some(cached)) = self.cache.get::<Vec<MemoryEntry>>(&cache_key).await {
            let memories = merge_with_recent_session(cached, &context);
            return Retrieved { memories, path: RetrievalPath::Cached };
        }

        let (mut memories, path) = match self.vector_search(user_id, query).await {
            Some(Ok(found)) => (found, RetrievalPath::Vector),
            Some(Err(error)) => {
                tracing::warn!(error = %error, "relay.memory.vector_search_failed");
                (
                    keyword_search(&context, query),
                    RetrievalPath::KeywordAfterVectorFailure,
                )
            }
            None => (keyword_search(&context, query), RetrievalPath::Keyword),
        };
        memories.truncate(MAX_RETRIEVED);

        if !memories.is_empty() {
            let _ = self
                .cache
                .set(&cache_key, &memories, Some(QUERY_CACHE_TTL))
                .await;
        }
        Retrieved { memories, path }
    }

    async fn vector_search(
        &self,
        user_id: &str,
        query: &str,
    ) -> Option<Result<Vec<MemoryEntry>, StoreError>> {
        let (vector, embedder) = (self.vector.as_ref()?, self.embedder.as_ref()?);

        let embedding = match embedder.embed(&[query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => return Some(Ok(Vec::new())),
            Err(error) => return Some(Err(StoreError::Backend(error.to_string()))),
        };

        // The collection is shared; over-fetch and filter to this user.
        let hits = match vector
            .search(
                MEMORY_COLLECTION,
                &embedding,
                MAX_RETRIEVED * 5,
                &["user_id".to_string(), "content".to_string(), "importance".to_string()],
            )
            .await
        {
            Ok(hits) => hits,
            Err(error) => return Some(Err(error)),
        };

        let memories = hits
            .into_iter()
            .filter(|hit| {
                hit.fields.get("user_id").and_then(|v| v.as_str()) == Some(user_id)
            })
            .take(MAX_RETRIEVED)
            .map(|hit| MemoryEntry {
                kind: MemoryKind::Semantic,
                content: hit
                    .fields
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                timestamp: chrono::DateTime::from_timestamp_millis(hit.id)
                    .unwrap_or_else(Utc::now),
                importance: hit
                    .fields
                    .get("importance")
                    .and_then(serde_json::Value::as_f64)
                    .unwrap_or(0.5),
                keywords: Vec::new(),
                user_id: Some(user_id.to_string()),
                session_id: None,
            })
            .collect();
        Some(Ok(memories))
    }
}

/// Merge cached results with the last three session entries, newest last,
/// deduplicated by content.
fn merge_with_recent_session(
    cached: Vec<MemoryEntry>,
    context: &MemoryContext,
) -> Vec<MemoryEntry> {
    let mut merged = cached;
    let recent = context
        .session_memory
        .iter()
        .rev()
        .take(3)
        .rev()
        .cloned()
        .collect::<Vec<_>>();
    for entry in recent {
        if !merged.iter().any(|m| m.content == entry.content) {
            merged.push(entry);
        }
    }
    merged.truncate(MAX_RETRIEVED);
    merged
}

/// Score all hot entries against the query and keep the best.
///
/// `0.2 × entity_overlap + 0.3 × substring + recency_boost + 0.2 × importance`
/// where recency is 0.3 within an hour, 0.2 within a day, 0.1 within a week.
fn keyword_search(context: &MemoryContext, query: &str) -> Vec<MemoryEntry> {
    let query_lower = query.to_lowercase();
    let query_words: Vec<&str> = query_lower
        .split_whitespace()
        .filter(|w| w.len() > 3)
        .collect();
    let now = Utc::now();

    let mut scored: Vec<(f64, &MemoryEntry)> = context
        .session_memory
        .iter()
        .chain(&context.user_memory)
        .chain(&context.semantic_memory)
        .map(|entry| {
            let content_lower = entry.content.to_lowercase();

            let overlap = if query_words.is_empty() {
                0.0
            } else {
                let hits = query_words
                    .iter()
                    .filter(|w| content_lower.contains(*w))
                    .count();
                hits as f64 / query_words.len() as f64
            };
            let substring = if !query_lower.is_empty() && content_lower.contains(&query_lower) {
                1.0
            } else {
                0.0
            };
            let age = now - entry.timestamp;
            let recency = if age <= chrono::Duration::hours(1) {
                0.3
            } else if age <= chrono::Duration::hours(24) {
                0.2
            } else if age <= chrono::Duration::weeks(1) {
                0.1
            } else {
                0.0
            };

            let score = 0.2 * overlap + 0.3 * substring + recency + 0.2 * entry.importance;
            (score, entry)
        })
        .filter(|(score, _)| *score > 0.0)
        .collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored
        .into_iter()
        .take(MAX_RETRIEVED)
        .map(|(_, entry)| entry.clone())
        .collect()
}
