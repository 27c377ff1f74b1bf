#![deny(missing_docs)]
//! Context-assembly engine.
//!
//! One turn's context is classified, budgeted, packed into three priority
//! tiers (recent conversation, prior discussion, retrieved knowledge), and
//! cached under a key derived from user, topic hash, and model. The
//! invariant throughout: system tokens plus tier tokens never exceed the
//! model's context window minus the generation reserve.

pub mod assembler;
pub mod budget;
pub mod cache;
pub mod counter;
pub mod topic;

pub use assembler::{
    AssembleRequest, AssemblyMetadata, AugmentedContext, ContextAssembler, ContextError,
    DEFAULT_GENERATION_RESERVE, TierSet,
};
pub use budget::{Budget, Tier, TierMetadata, pack_tier, truncate_at_sentence};
pub use cache::{CONTEXT_TTL, ContextCache, ContextCacheEntry, ContextCacheMetadata};
pub use counter::TokenCounter;
pub use topic::{TopicClassification, classify, short_hash};
