//! Tiered token budgets and greedy packing.
//!
//! The window left after the system prompt and the generation reserve is
//! split proportionally across three priority tiers: recent conversation,
//! prior discussion, retrieved knowledge. Packing is greedy within a tier;
//! an item that doesn't fit whole may be truncated only when a sentence
//! boundary survives, otherwise it is skipped.

use serde::{Deserialize, Serialize};

use crate::counter::TokenCounter;

/// Share of the post-system budget given to tier 1 (recent conversation).
const TIER1_SHARE: f64 = 0.5;
/// Share given to tier 2 (prior discussion).
const TIER2_SHARE: f64 = 0.3;
/// Share given to tier 3 (retrieved knowledge).
const TIER3_SHARE: f64 = 0.2;

/// Token budget for one assembled context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    /// Tokens consumed by the system prompt.
    pub system: u64,
    /// Cap for tier 1.
    pub tier1_max: u64,
    /// Cap for tier 2.
    pub tier2_max: u64,
    /// Cap for tier 3.
    pub tier3_max: u64,
}

impl Budget {
    /// Split `context_window − reserved_for_generation − system` across
    /// the tiers proportionally.
    #[must_use]
    pub fn new(context_window: u64, reserved_for_generation: u64, system: u64) -> Self {
        let available = context_window
            .saturating_sub(reserved_for_generation)
            .saturating_sub(system);
        Self {
            system,
            tier1_max: (available as f64 * TIER1_SHARE) as u64,
            tier2_max: (available as f64 * TIER2_SHARE) as u64,
            tier3_max: (available as f64 * TIER3_SHARE) as u64,
        }
    }

    /// Total the packed context may reach, system included.
    #[must_use]
    pub fn total_cap(&self) -> u64 {
        self.system + self.tier1_max + self.tier2_max + self.tier3_max
    }
}

/// One packed tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    /// Cap for this tier.
    pub max_tokens: u64,
    /// Tokens actually used.
    pub used_tokens: u64,
    /// Included items, in priority order.
    pub content: Vec<String>,
    /// Items offered vs. included, for observability.
    pub metadata: TierMetadata,
}

/// Packing statistics for one tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierMetadata {
    /// Items offered to the tier.
    pub offered: usize,
    /// Items included (possibly truncated).
    pub included: usize,
    /// Items truncated at a sentence boundary.
    pub truncated: usize,
    /// Items skipped for lack of space.
    pub skipped: usize,
}

/// Truncate `text` to at most `max_chars`, keeping a sentence boundary.
///
/// Returns `None` when no boundary survives the cut, in which case the
/// caller skips the item instead.
#[must_use]
pub fn truncate_at_sentence(text: &str, max_chars: usize) -> Option<String> {
    if text.len() <= max_chars {
        return Some(text.to_string());
    }
    let mut cut = max_chars;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let window = &text[..cut];
    let boundary = window
        .rmatch_indices(['.', '!', '?'])
        .map(|(i, _)| i + 1)
        .next()?;
    if boundary < 2 {
        return None;
    }
    Some(window[..boundary].to_string())
}

/// Greedily pack `items` into a tier of `max_tokens`.
///
/// Items are taken in the given priority order. An item that exceeds the
/// remaining space is truncated to a sentence boundary when possible and
/// skipped otherwise; later, smaller items may still fit.
#[must_use]
pub fn pack_tier(items: &[String], max_tokens: u64, counter: &TokenCounter) -> Tier {
    let mut tier = Tier {
        max_tokens,
        ..Tier::default()
    };
    tier.metadata.offered = items.len();

    for item in items {
        let tokens = counter.estimate_text(item);
        let remaining = max_tokens - tier.used_tokens;
        if tokens <= remaining {
            tier.used_tokens += tokens;
            tier.content.push(item.clone());
            tier.metadata.included += 1;
            continue;
        }
        if remaining == 0 {
            tier.metadata.skipped += 1;
            continue;
        }
        // Item exceeds what's left: truncate at a sentence boundary or skip.
        match truncate_at_sentence(item, (remaining * 4) as usize) {
            Some(truncated) => {
                let truncated_tokens = counter.estimate_text(&truncated);
                if truncated_tokens <= remaining && !truncated.is_empty() {
                    tier.used_tokens += truncated_tokens;
                    tier.content.push(truncated);
                    tier.metadata.included += 1;
                    tier.metadata.truncated += 1;
                } else {
                    tier.metadata.skipped += 1;
                }
            }
            None => tier.metadata.skipped += 1,
        }
    }
    tier
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn budget_splits_proportionally() {
        let budget = Budget::new(10_000, 1_000, 500);
        // 8500 available: 4250 / 2550 / 1700.
        assert_eq!(budget.tier1_max, 4250);
        assert_eq!(budget.tier2_max, 2550);
        assert_eq!(budget.tier3_max, 1700);
        assert!(budget.total_cap() <= 10_000 - 1_000);
    }

    #[test]
    fn budget_survives_oversized_system() {
        let budget = Budget::new(1_000, 200, 5_000);
        assert_eq!(budget.tier1_max, 0);
        assert_eq!(budget.tier2_max, 0);
    }

    #[test]
    fn pack_includes_in_priority_order() {
        let counter = TokenCounter::new();
        let items = vec!["a".repeat(40), "b".repeat(40), "c".repeat(40)];
        let tier = pack_tier(&items, 25, &counter);
        assert_eq!(tier.content.len(), 2);
        assert_eq!(tier.used_tokens, 20);
        assert_eq!(tier.metadata.skipped, 1);
    }

    #[test]
    fn oversized_item_truncates_at_sentence() {
        let counter = TokenCounter::new();
        let long = format!("First sentence. {}", "x".repeat(400));
        let tier = pack_tier(&[long], 20, &counter);
        assert_eq!(tier.metadata.truncated, 1);
        assert_eq!(tier.content[0], "First sentence.");
        assert!(tier.used_tokens <= 20);
    }

    #[test]
    fn unbreakable_item_is_skipped() {
        let counter = TokenCounter::new();
        let unbreakable = "x".repeat(400);
        let tier = pack_tier(&[unbreakable], 20, &counter);
        assert!(tier.content.is_empty());
        assert_eq!(tier.metadata.skipped, 1);
        assert_eq!(tier.used_tokens, 0);
    }

    #[test]
    fn truncate_keeps_boundary() {
        assert_eq!(
            truncate_at_sentence("One. Two. Three is long.", 10),
            Some("One. Two.".to_string())
        );
        assert_eq!(truncate_at_sentence("short", 10), Some("short".to_string()));
        assert_eq!(truncate_at_sentence(&"x".repeat(50), 10), None);
    }

    proptest! {
        #[test]
        fn packed_tier_respects_cap(
            items in proptest::collection::vec(".{0,200}", 0..20),
            max_tokens in 0u64..100,
        ) {
            let counter = TokenCounter::new();
            let tier = pack_tier(&items, max_tokens, &counter);
            prop_assert!(tier.used_tokens <= tier.max_tokens);

            // The tier's own estimator agrees with its accounting.
            let recomputed: u64 =
                tier.content.iter().map(|c| counter.estimate_text(c)).sum();
            prop_assert_eq!(recomputed, tier.used_tokens);

            // Bookkeeping adds up.
            prop_assert_eq!(
                tier.metadata.included + tier.metadata.skipped,
                tier.metadata.offered
            );
        }
    }
}
