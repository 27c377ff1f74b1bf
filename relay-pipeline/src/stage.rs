//! The stage contract.

use async_trait::async_trait;

use relay_types::GatewayError;

use crate::context::PipelineContext;
use crate::events::EventSink;

/// What a stage failure does to the rest of the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Terminate the turn, roll back executed stages.
    Fatal,
    /// Emit one warning and keep going.
    WarnAndContinue,
    /// Stop executing stages but finish the turn normally.
    SkipDownstream,
}

/// One step of the pipeline.
///
/// Stages run sequentially against a single [`PipelineContext`] and may
/// emit events. Rollback is best-effort and must not fail; it runs in
/// reverse order over the stages that completed before a fatal failure.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name, used in events and logs.
    fn name(&self) -> &'static str;

    /// What this stage's failure does to the turn.
    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    /// Run the stage.
    async fn run(
        &self,
        ctx: &mut PipelineContext,
        events: &EventSink,
    ) -> Result<(), GatewayError>;

    /// Undo this stage's effects after a downstream fatal failure.
    async fn rollback(&self, _ctx: &mut PipelineContext) {}
}
