//! The context assembler.
//!
//! Turns `(user, messages, model, memories)` into an [`AugmentedContext`]
//! sized to the model's window: classify the topic, probe the cache, split
//! the budget across three tiers, pack greedily, and cache the result.

use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use relay_types::{MemoryEntry, Message, ModelProfile, Role};

use crate::budget::{Budget, Tier, pack_tier};
use crate::cache::{CONTEXT_TTL, ContextCache, ContextCacheEntry, ContextCacheMetadata};
use crate::counter::TokenCounter;
use crate::topic::{TopicClassification, classify};

/// Messages counted as "recent conversation" (tier 1); anything older is
/// offered to tier 2.
const RECENT_WINDOW: usize = 10;

/// Tokens held back from the window for the model's generation.
pub const DEFAULT_GENERATION_RESERVE: u64 = 4_096;

/// Errors from context assembly.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// The user id is missing or empty.
    #[error("invalid user: {0}")]
    InvalidUser(String),
    /// The model profile is unusable.
    #[error("invalid model: {0}")]
    InvalidModel(String),
}

/// The three priority tiers of an assembled context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierSet {
    /// Recent conversation.
    pub tier1: Tier,
    /// Prior discussion.
    pub tier2: Tier,
    /// Retrieved knowledge.
    pub tier3: Tier,
}

impl TierSet {
    /// Total tokens used across the tiers.
    #[must_use]
    pub fn used_tokens(&self) -> u64 {
        self.tier1.used_tokens + self.tier2.used_tokens + self.tier3.used_tokens
    }
}

/// Classification-derived bookkeeping on an assembled context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssemblyMetadata {
    /// The topic hash the cache key was derived from.
    pub topic_hash: String,
    /// Entities from classification.
    pub entity_list: Vec<String>,
    /// Memories included.
    pub memory_count: usize,
    /// `total_chars / (total_tokens * 4)`, informational.
    pub compression_ratio: f64,
}

/// A packed, budgeted context ready for the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentedContext {
    /// The system prompt, verbatim.
    pub system_prompt: String,
    /// The packed context block injected ahead of the conversation.
    pub context_prompt: String,
    /// System + tier tokens.
    pub total_tokens: u64,
    /// The packed tiers.
    pub tiers: TierSet,
    /// Memory contents that made it into tier 3.
    pub relevant_memories: Vec<String>,
    /// Assembly wall time in milliseconds.
    pub assembly_time_ms: u64,
    /// Whether this context came from the cache.
    pub cache_hit: bool,
    /// Bookkeeping.
    pub metadata: AssemblyMetadata,
}

/// What the assembler needs for one turn.
pub struct AssembleRequest<'a> {
    /// The requesting user.
    pub user_id: &'a str,
    /// Conversation messages, oldest first.
    pub messages: &'a [Message],
    /// The model the context must fit.
    pub model: &'a ModelProfile,
    /// The system prompt for the turn.
    pub system_prompt: &'a str,
    /// Retrieved memories, most relevant first.
    pub memories: &'a [MemoryEntry],
    /// Whether the context cache may be consulted and written.
    pub cache_enabled: bool,
}

/// The context-assembly engine.
pub struct ContextAssembler {
    counter: TokenCounter,
    cache: ContextCache,
    generation_reserve: u64,
}

impl ContextAssembler {
    /// Build an assembler over the context cache.
    #[must_use]
    pub fn new(cache: ContextCache) -> Self {
        Self {
            counter: TokenCounter::new(),
            cache,
            generation_reserve: DEFAULT_GENERATION_RESERVE,
        }
    }

    /// Override the generation reserve.
    #[must_use]
    pub fn with_generation_reserve(mut self, tokens: u64) -> Self {
        self.generation_reserve = tokens;
        self
    }

    /// Assemble a context for one turn.
    pub async fn assemble(
        &self,
        request: AssembleRequest<'_>,
    ) -> Result<AugmentedContext, ContextError> {
        let started = Instant::now();

        if request.user_id.trim().is_empty() {
            return Err(ContextError::InvalidUser("userId is required".into()));
        }
        if request.model.model_id.is_empty() || request.model.performance.max_context_tokens == 0 {
            return Err(ContextError::InvalidModel(
                "model has no usable context window".into(),
            ));
        }

        let system_tokens = self.counter.estimate_text(request.system_prompt);

        // Empty conversation: the context is just the system prompt.
        if request.messages.is_empty() {
            return Ok(AugmentedContext {
                system_prompt: request.system_prompt.to_string(),
                context_prompt: String::new(),
                total_tokens: system_tokens,
                tiers: TierSet::default(),
                relevant_memories: Vec::new(),
                assembly_time_ms: started.elapsed().as_millis() as u64,
                cache_hit: false,
                metadata: AssemblyMetadata::default(),
            });
        }

        let combined: String = request
            .messages
            .iter()
            .map(|m| m.content.as_text())
            .collect::<Vec<_>>()
            .join("\n");
        let classification = classify(&combined);

        let key = ContextCache::cache_key(
            request.user_id,
            &classification.hash,
            &request.model.model_id,
        );

        if request.cache_enabled {
            match self.cache.get(&key).await {
                Ok(Some(entry)) => {
                    tracing::debug!(key = %key, "relay.context.cache_hit");
                    return Ok(self.from_cache(request.system_prompt, &classification, entry, started));
                }
                Ok(None) => {}
                Err(error) => {
                    // Non-fatal; assemble fresh and let the caller emit one
                    // cache warning for the turn.
                    tracing::warn!(error = %error, "relay.context.cache_probe_failed");
                }
            }
        }

        let budget = Budget::new(
            request.model.performance.max_context_tokens,
            self.generation_reserve,
            system_tokens,
        );

        // Tier 1: the recent window, newest first so the newest always
        // survives a tight budget; flipped back to chronological after
        // packing.
        let non_system: Vec<&Message> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .collect();
        let split = non_system.len().saturating_sub(RECENT_WINDOW);
        let (older, recent) = non_system.split_at(split);

        let recent_items: Vec<String> =
            recent.iter().rev().map(|m| format_message(m)).collect();
        let mut tier1 = pack_tier(&recent_items, budget.tier1_max, &self.counter);
        tier1.content.reverse();

        // Tier 2: older conversation, newest of the old first.
        let older_items: Vec<String> = older.iter().rev().map(|m| format_message(m)).collect();
        let mut tier2 = pack_tier(&older_items, budget.tier2_max, &self.counter);
        tier2.content.reverse();

        // Tier 3: retrieved memories, already relevance-ordered.
        let memory_items: Vec<String> =
            request.memories.iter().map(|m| m.content.clone()).collect();
        let tier3 = pack_tier(&memory_items, budget.tier3_max, &self.counter);

        let tiers = TierSet { tier1, tier2, tier3 };
        let context_prompt = render_context(&tiers);
        let total_tokens = system_tokens + tiers.used_tokens();

        let total_chars = request.system_prompt.len() + combined.len();
        let compression_ratio = if total_tokens == 0 {
            0.0
        } else {
            total_chars as f64 / (total_tokens as f64 * 4.0)
        };

        let relevant_memories = tiers.tier3.content.clone();
        let assembly_time_ms = started.elapsed().as_millis() as u64;
        let context = AugmentedContext {
            system_prompt: request.system_prompt.to_string(),
            context_prompt,
            total_tokens,
            relevant_memories: relevant_memories.clone(),
            assembly_time_ms,
            cache_hit: false,
            metadata: AssemblyMetadata {
                topic_hash: classification.hash.clone(),
                entity_list: classification.entities.clone(),
                memory_count: relevant_memories.len(),
                compression_ratio,
            },
            tiers,
        };

        if request.cache_enabled {
            let now = Utc::now();
            let entry = ContextCacheEntry {
                key,
                user_id: request.user_id.to_string(),
                topic_hash: classification.hash,
                prompt_template: context.context_prompt.clone(),
                relevant_memories,
                total_tokens,
                computed_at: now,
                expires_at: now + CONTEXT_TTL,
                hit_count: 0,
                last_accessed: now,
                metadata: ContextCacheMetadata {
                    memory_count: context.metadata.memory_count,
                    entity_list: context.metadata.entity_list.clone(),
                    compression_ratio,
                    computation_time_ms: assembly_time_ms,
                },
            };
            if let Err(error) = self.cache.put(&entry).await {
                tracing::warn!(error = %error, "relay.context.cache_write_failed");
            }
        }

        Ok(context)
    }

    fn from_cache(
        &self,
        system_prompt: &str,
        classification: &TopicClassification,
        entry: ContextCacheEntry,
        started: Instant,
    ) -> AugmentedContext {
        AugmentedContext {
            system_prompt: system_prompt.to_string(),
            context_prompt: entry.prompt_template,
            total_tokens: entry.total_tokens,
            tiers: TierSet::default(),
            relevant_memories: entry.relevant_memories,
            assembly_time_ms: started.elapsed().as_millis() as u64,
            cache_hit: true,
            metadata: AssemblyMetadata {
                topic_hash: classification.hash.clone(),
                entity_list: entry.metadata.entity_list,
                memory_count: entry.metadata.memory_count,
                compression_ratio: entry.metadata.compression_ratio,
            },
        }
    }
}

fn format_message(message: &Message) -> String {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    format!("{role}: {}", message.content.as_text())
}

fn render_context(tiers: &TierSet) -> String {
    let mut sections = Vec::new();
    if !tiers.tier1.content.is_empty() {
        sections.push(format!("## Recent Conversation\n{}", tiers.tier1.content.join("\n")));
    }
    if !tiers.tier2.content.is_empty() {
        sections.push(format!("## Prior Discussion\n{}", tiers.tier2.content.join("\n")));
    }
    if !tiers.tier3.content.is_empty() {
        sections.push(format!("## Retrieved Knowledge\n{}", tiers.tier3.content.join("\n")));
    }
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_store::{CacheClient, MemoryBackend};
    use relay_types::{
        CacheConfig, MemoryKind, ModelCapabilities, ModelCost, ModelMetadata, ModelPerformance,
        ProviderType,
    };
    use std::sync::Arc;

    fn model(window: u64) -> ModelProfile {
        ModelProfile {
            model_id: "gpt-4o".into(),
            provider: "azure".into(),
            provider_type: ProviderType::AzureOpenai,
            capabilities: ModelCapabilities::default(),
            performance: ModelPerformance {
                max_context_tokens: window,
                ..Default::default()
            },
            cost: ModelCost::default(),
            metadata: ModelMetadata::default(),
            embedding: None,
        }
    }

    fn memory(content: &str, importance: f64) -> MemoryEntry {
        MemoryEntry {
            kind: MemoryKind::Semantic,
            content: content.into(),
            timestamp: Utc::now(),
            importance,
            keywords: vec![],
            user_id: Some("u-1".into()),
            session_id: None,
        }
    }

    fn assembler() -> ContextAssembler {
        let cache = ContextCache::new(CacheClient::new(
            Arc::new(MemoryBackend::new()),
            &CacheConfig::default(),
        ));
        ContextAssembler::new(cache)
    }

    fn request<'a>(
        messages: &'a [Message],
        model: &'a ModelProfile,
        memories: &'a [MemoryEntry],
    ) -> AssembleRequest<'a> {
        AssembleRequest {
            user_id: "u-1",
            messages,
            model,
            system_prompt: "You are a cloud assistant.",
            memories,
            cache_enabled: true,
        }
    }

    #[tokio::test]
    async fn empty_messages_yield_system_only_context() {
        let assembler = assembler();
        let model = model(128_000);
        let context = assembler.assemble(request(&[], &model, &[])).await.unwrap();
        assert!(context.context_prompt.is_empty());
        assert!(context.relevant_memories.is_empty());
        assert_eq!(
            context.total_tokens,
            TokenCounter::new().estimate_text("You are a cloud assistant.")
        );
    }

    #[tokio::test]
    async fn empty_user_id_is_invalid() {
        let assembler = assembler();
        let model = model(128_000);
        let messages = [Message::user("hi")];
        let err = assembler
            .assemble(AssembleRequest { user_id: " ", ..request(&messages, &model, &[]) })
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::InvalidUser(_)));
    }

    #[tokio::test]
    async fn zero_window_model_is_invalid() {
        let assembler = assembler();
        let model = model(0);
        let messages = [Message::user("hi")];
        let err = assembler.assemble(request(&messages, &model, &[])).await.unwrap_err();
        assert!(matches!(err, ContextError::InvalidModel(_)));
    }

    #[tokio::test]
    async fn packed_context_respects_window() {
        let assembler = assembler();
        let model = model(6_000);
        let messages: Vec<Message> = (0..40)
            .map(|i| Message::user(format!("message {i}: {}", "word ".repeat(100))))
            .collect();
        let memories = vec![memory(&"fact. ".repeat(100), 0.9)];

        let context = assembler.assemble(request(&messages, &model, &memories)).await.unwrap();
        let system_tokens = TokenCounter::new().estimate_text("You are a cloud assistant.");
        assert!(
            system_tokens + context.tiers.used_tokens()
                <= model.performance.max_context_tokens
        );
        assert_eq!(context.total_tokens, system_tokens + context.tiers.used_tokens());
        assert!(!context.cache_hit);
    }

    #[tokio::test]
    async fn second_identical_call_hits_the_cache() {
        let assembler = assembler();
        let model = model(128_000);
        let messages = [Message::user("how do I list my azure subscriptions")];
        let memories = [memory("user prefers the azure cli", 0.8)];

        let first = assembler.assemble(request(&messages, &model, &memories)).await.unwrap();
        assert!(!first.cache_hit);

        let second = assembler.assemble(request(&messages, &model, &memories)).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.context_prompt, first.context_prompt);
        assert_eq!(second.total_tokens, first.total_tokens);
        assert_eq!(second.metadata.topic_hash, first.metadata.topic_hash);
    }

    #[tokio::test]
    async fn cache_disabled_never_hits() {
        let assembler = assembler();
        let model = model(128_000);
        let messages = [Message::user("hello")];
        for _ in 0..2 {
            let context = assembler
                .assemble(AssembleRequest {
                    cache_enabled: false,
                    ..request(&messages, &model, &[])
                })
                .await
                .unwrap();
            assert!(!context.cache_hit);
        }
    }

    #[tokio::test]
    async fn memories_land_in_tier3() {
        let assembler = assembler();
        let model = model(128_000);
        let messages = [Message::user("what did we decide about the database")];
        let memories = [
            memory("we chose postgres for the inventory service", 0.9),
            memory("the migration runs nightly", 0.6),
        ];

        let context = assembler.assemble(request(&messages, &model, &memories)).await.unwrap();
        assert_eq!(context.tiers.tier3.content.len(), 2);
        assert_eq!(
            context.relevant_memories[0],
            "we chose postgres for the inventory service"
        );
        assert!(context.context_prompt.contains("## Retrieved Knowledge"));
    }

    #[tokio::test]
    async fn older_messages_fall_to_tier2() {
        let assembler = assembler();
        let model = model(128_000);
        let messages: Vec<Message> =
            (0..15).map(|i| Message::user(format!("message number {i}"))).collect();

        let context = assembler.assemble(request(&messages, &model, &[])).await.unwrap();
        assert_eq!(context.tiers.tier1.content.len(), 10);
        assert_eq!(context.tiers.tier2.content.len(), 5);
        // Chronological order within each tier.
        assert!(context.tiers.tier1.content[0].contains("message number 5"));
        assert!(context.tiers.tier2.content[0].contains("message number 0"));
    }
}
