//! Turn persistence.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use relay_types::{GatewayError, Role, Turn};

use crate::context::PipelineContext;
use crate::events::EventSink;
use crate::stage::{FailurePolicy, Stage};
use crate::store::TurnStore;

/// Appends the user turn and the assistant turn to the log.
pub struct PersistStage {
    store: Arc<dyn TurnStore>,
}

impl PersistStage {
    /// Build the stage over the turn store.
    #[must_use]
    pub fn new(store: Arc<dyn TurnStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Stage for PersistStage {
    fn name(&self) -> &'static str {
        "persist"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    async fn run(
        &self,
        ctx: &mut PipelineContext,
        _events: &EventSink,
    ) -> Result<(), GatewayError> {
        let Some(response) = &ctx.response else {
            // Nothing was generated (canceled upstream); nothing to persist.
            return Ok(());
        };

        if let Some(user_message) = ctx.request.messages.iter().rev().find(|m| m.role == Role::User)
        {
            self.store
                .append_turn(&Turn {
                    id: format!("{}-user", ctx.turn_id),
                    session_id: ctx.request.session_id.clone(),
                    role: Role::User,
                    content: user_message.content.clone(),
                    tool_calls: vec![],
                    model: None,
                    created_at: Utc::now(),
                })
                .await
                .map_err(GatewayError::from)?;
        }

        self.store
            .append_turn(&Turn {
                id: format!("{}-assistant", ctx.turn_id),
                session_id: ctx.request.session_id.clone(),
                role: Role::Assistant,
                content: response.message.content.clone(),
                tool_calls: response.message.tool_calls.clone(),
                model: ctx.served_model.clone(),
                created_at: Utc::now(),
            })
            .await
            .map_err(GatewayError::from)?;

        ctx.persisted = true;
        Ok(())
    }
}
