//! Durable memory archive.
//!
//! High-importance entries outlive the hot cache; the relational store is
//! the archive. The gateway only consumes this trait — the production
//! implementation lives with the rest of the persistence adapters.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use relay_types::{MemoryEntry, PersistError};

/// Archive for promoted memories.
#[async_trait]
pub trait DurableMemoryStore: Send + Sync {
    /// Persist one entry.
    async fn save(&self, entry: &MemoryEntry) -> Result<(), PersistError>;

    /// Load a user's archived entries, newest first.
    async fn load_for_user(&self, user_id: &str) -> Result<Vec<MemoryEntry>, PersistError>;
}

/// In-memory archive for tests and single-node deployments.
#[derive(Clone, Default)]
pub struct InMemoryMemoryStore {
    entries: Arc<RwLock<Vec<MemoryEntry>>>,
}

impl InMemoryMemoryStore {
    /// Create an empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of archived entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the archive is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl DurableMemoryStore for InMemoryMemoryStore {
    async fn save(&self, entry: &MemoryEntry) -> Result<(), PersistError> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn load_for_user(&self, user_id: &str) -> Result<Vec<MemoryEntry>, PersistError> {
        let mut found: Vec<MemoryEntry> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(found)
    }
}
