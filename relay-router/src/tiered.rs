//! Tiered function-calling decisions.
//!
//! Before provider dispatch, decide three things for a turn: does it need
//! tools at all, which cost tier should serve it, and can the tool catalog
//! be stripped from the prompt. Pure-chat turns with stripping enabled
//! save a few thousand prompt tokens; the estimate is reported, never
//! asserted.

use std::time::{Duration, Instant};

use quick_cache::sync::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use relay_types::{ModelTier, SliderConfig, TieredFcConfig};

/// Reported token savings when the tool catalog is stripped.
pub const STRIP_SAVINGS_ESTIMATE: u64 = 2_000;

/// Decision cache capacity.
const DECISION_CACHE_CAPACITY: usize = 4_096;

/// Verbs that usually mean "go do something with a tool".
const TOOL_VERBS: &[&str] = &[
    "list", "create", "delete", "deploy", "run", "execute", "fetch", "update", "restart",
    "query", "provision", "scale", "stop", "start", "describe", "show",
];

/// Nouns that usually require live retrieval to answer about.
const RETRIEVAL_ENTITIES: &[&str] = &[
    "subscription", "cluster", "database", "instance", "server", "bucket", "repo", "pipeline",
    "deployment", "resource", "tenant", "namespace", "secret", "billing", "invoice",
];

/// The tiered function-calling verdict for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieredDecision {
    /// Whether the turn appears to need tools.
    pub requires_tools: bool,
    /// Whether the tool catalog should be stripped from the request.
    pub strip_tools: bool,
    /// The cost tier targeted.
    pub tier: ModelTier,
    /// The tier's configured model; `None` defers to the smart router.
    pub model: Option<String>,
    /// Estimated prompt tokens saved by stripping, when stripping.
    pub estimated_savings_tokens: Option<u64>,
    /// Whether this decision came from the cache.
    pub cached_decision: bool,
}

struct CachedEntry {
    decision: TieredDecision,
    inserted_at: Instant,
}

/// The tiered function-calling router.
pub struct TieredRouter {
    config: TieredFcConfig,
    cache: Cache<String, std::sync::Arc<CachedEntry>>,
}

impl TieredRouter {
    /// Build a router from its config.
    #[must_use]
    pub fn new(config: TieredFcConfig) -> Self {
        Self {
            config,
            cache: Cache::new(DECISION_CACHE_CAPACITY),
        }
    }

    fn cache_key(message: &str, tools_len: usize, position: u8) -> String {
        let digest = Sha256::digest(format!("{message}\u{1f}{tools_len}\u{1f}{position}"));
        digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.decision_cache_ttl_seconds)
    }

    /// Map a slider position to a tier: `[0, 40]` cheap, `(40, 60]`
    /// balanced, `(60, 100]` premium.
    #[must_use]
    pub fn tier_for_position(position: u8) -> ModelTier {
        match position {
            0..=40 => ModelTier::Cheap,
            41..=60 => ModelTier::Balanced,
            _ => ModelTier::Premium,
        }
    }

    fn model_for_tier(&self, tier: ModelTier) -> Option<String> {
        match tier {
            ModelTier::Cheap => self.config.cheap_model.clone(),
            ModelTier::Balanced => self.config.balanced_model.clone(),
            ModelTier::Premium => self.config.premium_model.clone(),
        }
    }

    /// Decide for one turn.
    #[must_use]
    pub fn decide(&self, message: &str, tools_len: usize, slider: &SliderConfig) -> TieredDecision {
        let key = Self::cache_key(message, tools_len, slider.position);
        if self.config.decision_cache_enabled {
            if let Some(entry) = self.cache.get(&key) {
                if entry.inserted_at.elapsed() < self.ttl() {
                    let mut decision = entry.decision.clone();
                    decision.cached_decision = true;
                    return decision;
                }
                self.cache.remove(&key);
            }
        }

        let requires_tools = tools_len > 0 && message_wants_tools(message);
        let strip_tools =
            !requires_tools && self.config.tool_stripping_enabled && tools_len > 0;
        let tier = Self::tier_for_position(slider.position);

        let decision = TieredDecision {
            requires_tools,
            strip_tools,
            tier,
            model: self.model_for_tier(tier),
            estimated_savings_tokens: strip_tools.then_some(STRIP_SAVINGS_ESTIMATE),
            cached_decision: false,
        };

        if self.config.decision_cache_enabled {
            self.cache.insert(
                key,
                std::sync::Arc::new(CachedEntry {
                    decision: decision.clone(),
                    inserted_at: Instant::now(),
                }),
            );
        }
        decision
    }
}

/// Pure-chat heuristic, inverted: does the message look like it needs a
/// tool? Either an imperative tool verb or an entity that requires live
/// retrieval qualifies.
fn message_wants_tools(message: &str) -> bool {
    let lower = message.to_lowercase();
    let has_verb = TOOL_VERBS.iter().any(|verb| {
        lower
            .split_whitespace()
            .any(|word| word.trim_matches(|c: char| !c.is_alphanumeric()) == *verb)
    });
    let has_entity = RETRIEVAL_ENTITIES.iter().any(|entity| lower.contains(entity));
    has_verb || has_entity
}
