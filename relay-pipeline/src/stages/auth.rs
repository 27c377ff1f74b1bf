//! Identity resolution.

use std::sync::Arc;

use async_trait::async_trait;

use relay_types::{ErrorKind, GatewayError};

use crate::context::PipelineContext;
use crate::events::EventSink;
use crate::stage::{FailurePolicy, Stage};
use crate::store::UserStore;

/// Resolves the requesting user and the effective slider.
pub struct AuthStage {
    users: Arc<dyn UserStore>,
}

impl AuthStage {
    /// Build the stage over a user directory.
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl Stage for AuthStage {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    async fn run(
        &self,
        ctx: &mut PipelineContext,
        _events: &EventSink,
    ) -> Result<(), GatewayError> {
        if ctx.request.user_id.trim().is_empty() {
            return Err(GatewayError::invalid_input("userId is required"));
        }
        if ctx.request.session_id.trim().is_empty() {
            return Err(GatewayError::invalid_input("sessionId is required"));
        }

        let user = self
            .users
            .get_user(&ctx.request.user_id)
            .await
            .map_err(|e| GatewayError::new(ErrorKind::AuthDenied, e.to_string()))?
            .ok_or_else(|| {
                GatewayError::new(
                    ErrorKind::AuthDenied,
                    format!("unknown user {}", ctx.request.user_id),
                )
            })?;

        tracing::debug!(
            user = %user.id,
            groups = user.groups.len(),
            admin = user.is_admin,
            "relay.pipeline.auth_resolved"
        );
        ctx.user = Some(user);
        Ok(())
    }
}
