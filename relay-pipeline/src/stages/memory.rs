//! Memory retrieval.

use std::sync::Arc;

use async_trait::async_trait;

use relay_memory::{MemoryManager, RetrievalPath, render_memory_block};
use relay_types::{ErrorKind, GatewayError};

use crate::context::PipelineContext;
use crate::events::EventSink;
use crate::stage::{FailurePolicy, Stage};

/// Populates the turn's retrieved memories and memory block.
pub struct MemoryStage {
    manager: Arc<MemoryManager>,
}

impl MemoryStage {
    /// Build the stage over the memory manager.
    #[must_use]
    pub fn new(manager: Arc<MemoryManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Stage for MemoryStage {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::WarnAndContinue
    }

    async fn run(
        &self,
        ctx: &mut PipelineContext,
        events: &EventSink,
    ) -> Result<(), GatewayError> {
        if !ctx.request.flags.enable_memory {
            return Ok(());
        }
        let query = ctx.latest_user_text();
        if query.is_empty() {
            return Ok(());
        }
        let user_id = ctx.request.user_id.clone();

        let retrieved = self.manager.retrieve(&user_id, &query).await;
        if retrieved.path == RetrievalPath::KeywordAfterVectorFailure
            && ctx.warn_once(ErrorKind::VectorUnavailable)
        {
            events.warn(
                ErrorKind::VectorUnavailable.as_str(),
                "vector search unavailable, using keyword retrieval",
            );
        }

        let memory_context = self.manager.context_for(&user_id).await;
        ctx.memory_block = render_memory_block(&memory_context, &retrieved.memories);
        ctx.retrieved_memories = retrieved.memories;
        Ok(())
    }
}
