//! Memory entries and the per-user memory context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Importance threshold above which entries survive every consolidation
/// pass, and session/semantic entries promote to durable storage.
pub const PROMOTION_IMPORTANCE: f64 = 0.7;

/// The storage band a memory entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Scoped to one session; evicts FIFO at the session cap.
    Session,
    /// Long-lived per-user facts.
    User,
    /// Cross-session knowledge; promotes to durable storage at high importance.
    Semantic,
    /// Scratch state for the current turn; never promoted.
    Working,
}

/// One remembered fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Which band the entry lives in.
    pub kind: MemoryKind,
    /// The remembered content.
    pub content: String,
    /// When the entry was created.
    pub timestamp: DateTime<Utc>,
    /// Importance in `[0, 1]`; drives retention and promotion.
    pub importance: f64,
    /// Keywords extracted at write time.
    pub keywords: Vec<String>,
    /// Owning user, when user-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Owning session, when session-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl MemoryEntry {
    /// Whether this entry must survive consolidation and may promote.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.importance >= PROMOTION_IMPORTANCE
    }
}

/// Bookkeeping carried with a [`MemoryContext`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    /// Total entries across all bands.
    pub total_memories: usize,
    /// Last read or write through the manager.
    pub last_accessed: Option<DateTime<Utc>>,
}

/// A user's full memory state, cached under `memory:<user_id>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryContext {
    /// Session-band entries, oldest first.
    pub session_memory: Vec<MemoryEntry>,
    /// User-band entries.
    pub user_memory: Vec<MemoryEntry>,
    /// Semantic-band entries.
    pub semantic_memory: Vec<MemoryEntry>,
    /// Working-band entries for the current turn.
    pub working_memory: Vec<MemoryEntry>,
    /// Bookkeeping.
    pub metadata: MemoryMetadata,
}

impl MemoryContext {
    /// Total entries across all bands.
    #[must_use]
    pub fn total(&self) -> usize {
        self.session_memory.len()
            + self.user_memory.len()
            + self.semantic_memory.len()
            + self.working_memory.len()
    }

    /// Refresh `metadata` from the current band contents.
    pub fn touch(&mut self) {
        self.metadata.total_memories = self.total();
        self.metadata.last_accessed = Some(Utc::now());
    }
}
