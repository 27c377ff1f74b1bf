//! Persistence seams.
//!
//! The relational store is an external collaborator; the pipeline consumes
//! these traits and ships in-memory implementations for tests and
//! single-node use. The turn log is append-only — nothing here rewrites a
//! finalized turn.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use relay_types::{PersistError, PromptUsage, Session, Turn, User};

/// User directory lookups.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fetch a user by id.
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, PersistError>;
}

/// Sessions, the append-only turn log, and prompt-usage rows.
#[async_trait]
pub trait TurnStore: Send + Sync {
    /// Fetch a session.
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, PersistError>;

    /// Append one turn.
    async fn append_turn(&self, turn: &Turn) -> Result<(), PersistError>;

    /// A session's turns in append order.
    async fn session_turns(&self, session_id: &str) -> Result<Vec<Turn>, PersistError>;

    /// Record one prompt-usage row.
    async fn record_prompt_usage(&self, usage: &PromptUsage) -> Result<(), PersistError>;
}

/// In-memory [`UserStore`].
#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<HashMap<String, User>>>,
}

impl InMemoryUserStore {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user.
    pub async fn put_user(&self, user: User) {
        self.users.write().await.insert(user.id.clone(), user);
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, PersistError> {
        Ok(self.users.read().await.get(user_id).cloned())
    }
}

/// In-memory [`TurnStore`].
#[derive(Clone, Default)]
pub struct InMemoryTurnStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    turns: Arc<RwLock<Vec<Turn>>>,
    usage_rows: Arc<RwLock<Vec<PromptUsage>>>,
}

impl InMemoryTurnStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a session.
    pub async fn put_session(&self, session: Session) {
        self.sessions.write().await.insert(session.id.clone(), session);
    }

    /// All recorded prompt-usage rows.
    pub async fn prompt_usage_rows(&self) -> Vec<PromptUsage> {
        self.usage_rows.read().await.clone()
    }

    /// Total turn count across sessions.
    pub async fn turn_count(&self) -> usize {
        self.turns.read().await.len()
    }
}

#[async_trait]
impl TurnStore for InMemoryTurnStore {
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, PersistError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn append_turn(&self, turn: &Turn) -> Result<(), PersistError> {
        self.turns.write().await.push(turn.clone());
        Ok(())
    }

    async fn session_turns(&self, session_id: &str) -> Result<Vec<Turn>, PersistError> {
        Ok(self
            .turns
            .read()
            .await
            .iter()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn record_prompt_usage(&self, usage: &PromptUsage) -> Result<(), PersistError> {
        self.usage_rows.write().await.push(usage.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_types::{MessageContent, Role};

    fn turn(id: &str, session: &str) -> Turn {
        Turn {
            id: id.into(),
            session_id: session.into(),
            role: Role::User,
            content: MessageContent::Text("hi".into()),
            tool_calls: vec![],
            model: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn turns_append_in_order() {
        let store = InMemoryTurnStore::new();
        store.append_turn(&turn("t-1", "s-1")).await.unwrap();
        store.append_turn(&turn("t-2", "s-1")).await.unwrap();
        store.append_turn(&turn("t-3", "s-2")).await.unwrap();

        let turns = store.session_turns("s-1").await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].id, "t-1");
        assert_eq!(turns[1].id, "t-2");
    }

    #[tokio::test]
    async fn user_lookup() {
        let store = InMemoryUserStore::new();
        store
            .put_user(User {
                id: "u-1".into(),
                email: "u@example.com".into(),
                name: "U".into(),
                groups: vec!["az-users".into()],
                is_admin: false,
                created_at: Utc::now(),
            })
            .await;
        assert!(store.get_user("u-1").await.unwrap().is_some());
        assert!(store.get_user("u-2").await.unwrap().is_none());
    }
}
