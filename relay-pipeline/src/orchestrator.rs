//! The pipeline orchestrator.
//!
//! One turn = one ordered pass over the stages against one
//! [`PipelineContext`], guarded by a distributed session lock so turns
//! within a session serialize. Fatal failures roll back executed stages in
//! reverse and the event stream always terminates with a `Done` event —
//! success, error, or cancellation alike.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_store::LockManager;
use relay_types::{
    ErrorKind, FinishReason, GatewayError, GatewayRequest, GatewayResponse, StageStatus,
    TokenUsage, TurnEvent,
};

use crate::context::PipelineContext;
use crate::events::EventSink;
use crate::stage::{FailurePolicy, Stage};

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Per-stage wall clock budget.
    pub stage_timeout: Duration,
    /// Session lock TTL; must exceed the whole turn's budget.
    pub session_lock_ttl: Duration,
    /// How long a turn waits for the session lock before reporting busy.
    pub session_lock_wait: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(60),
            session_lock_ttl: Duration::from_secs(180),
            session_lock_wait: Duration::from_secs(2),
        }
    }
}

/// What one turn came to.
#[derive(Debug)]
pub struct TurnReport {
    /// The turn id.
    pub turn_id: String,
    /// Terminal finish reason.
    pub finish_reason: FinishReason,
    /// Aggregate usage.
    pub usage: TokenUsage,
    /// The model that served the turn, when one was reached.
    pub model_id: Option<String>,
    /// The fatal error, when the turn failed.
    pub error: Option<GatewayError>,
    /// Whether the turn reached durable storage.
    pub persisted: bool,
    /// The session lock was held by another turn; nothing ran.
    pub busy: bool,
}

/// A spawned turn: its event stream plus the report future.
pub struct TurnHandle {
    /// The turn's event stream.
    pub events: broadcast::Receiver<TurnEvent>,
    /// Resolves when the turn finishes.
    pub report: JoinHandle<TurnReport>,
}

/// The stage pipeline.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    locks: LockManager,
    config: PipelineConfig,
}

impl Pipeline {
    /// Build a pipeline from ordered stages.
    #[must_use]
    pub fn new(stages: Vec<Box<dyn Stage>>, locks: LockManager, config: PipelineConfig) -> Self {
        Self { stages, locks, config }
    }

    /// Spawn one turn. Subscribe to `events` before awaiting `report`.
    #[must_use]
    pub fn spawn(
        self: &Arc<Self>,
        request: GatewayRequest,
        cancel: CancellationToken,
    ) -> TurnHandle {
        let (sink, events) = EventSink::new();
        let pipeline = Arc::clone(self);
        let report =
            tokio::spawn(async move { pipeline.run(request, &sink, &cancel).await });
        TurnHandle { events, report }
    }

    /// Run one turn to completion on the current task.
    pub async fn run(
        &self,
        request: GatewayRequest,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> TurnReport {
        let mut ctx = PipelineContext::new(request);
        let lock_key = format!("session:{}", ctx.request.session_id);
        let lock_value = ctx.turn_id.clone();

        let acquired = self
            .locks
            .acquire_with_wait(
                &lock_key,
                &lock_value,
                self.config.session_lock_ttl,
                self.config.session_lock_wait,
                Duration::from_millis(50),
            )
            .await
            .unwrap_or(false);
        if !acquired {
            tracing::info!(session = %ctx.request.session_id, "relay.pipeline.session_busy");
            let error = GatewayError::internal("session busy with another turn");
            sink.emit(TurnEvent::done_error(error.clone(), TokenUsage::default(), None));
            return TurnReport {
                turn_id: ctx.turn_id,
                finish_reason: FinishReason::Error,
                usage: TokenUsage::default(),
                model_id: None,
                error: Some(error),
                persisted: false,
                busy: true,
            };
        }

        let report = self.run_stages(&mut ctx, sink, cancel).await;

        // The lock releases on every completion path.
        if let Err(error) = self.locks.release(&lock_key, &lock_value).await {
            tracing::warn!(error = %error, "relay.pipeline.lock_release_failed");
        }
        report
    }

    async fn run_stages(
        &self,
        ctx: &mut PipelineContext,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> TurnReport {
        let mut executed: Vec<usize> = Vec::new();

        for (index, stage) in self.stages.iter().enumerate() {
            let name = stage.name();
            sink.stage(name, StageStatus::Started, None);
            let started = Instant::now();

            // Cancellation drops the in-flight stage future, which tears
            // down any provider stream it holds.
            let outcome = tokio::select! {
                () = cancel.cancelled() => None,
                result = tokio::time::timeout(self.config.stage_timeout, stage.run(ctx, sink)) => {
                    Some(result.unwrap_or_else(|_| {
                        Err(GatewayError::new(
                            ErrorKind::UpstreamTimeout,
                            format!("stage {name} timed out"),
                        ))
                    }))
                }
            };
            let elapsed = started.elapsed().as_millis() as u64;

            let Some(result) = outcome else {
                tracing::info!(stage = name, "relay.pipeline.canceled");
                sink.stage(name, StageStatus::Failed, Some(elapsed));
                self.rollback(&executed, ctx).await;
                sink.emit(TurnEvent::Done {
                    finish_reason: FinishReason::Canceled,
                    usage: ctx.usage,
                    model_id: ctx.served_model.clone(),
                    error: None,
                });
                return self.report(ctx, FinishReason::Canceled, None);
            };

            match result {
                Ok(()) => {
                    sink.stage(name, StageStatus::Completed, Some(elapsed));
                    executed.push(index);
                }
                Err(error) => match stage.failure_policy() {
                    FailurePolicy::WarnAndContinue => {
                        if ctx.warn_once(error.kind) {
                            tracing::warn!(
                                stage = name,
                                kind = %error.kind,
                                error = %error.message,
                                "relay.pipeline.stage_warned"
                            );
                            sink.warn(error.kind.as_str(), error.message.clone());
                        }
                        sink.stage(name, StageStatus::Warned, Some(elapsed));
                    }
                    FailurePolicy::SkipDownstream => {
                        tracing::warn!(
                            stage = name,
                            error = %error,
                            "relay.pipeline.skipping_downstream"
                        );
                        sink.warn(error.kind.as_str(), error.message.clone());
                        sink.stage(name, StageStatus::Warned, Some(elapsed));
                        for later in self.stages[index + 1..].iter() {
                            sink.stage(later.name(), StageStatus::Skipped, None);
                        }
                        break;
                    }
                    FailurePolicy::Fatal => {
                        tracing::error!(
                            stage = name,
                            kind = %error.kind,
                            error = %error.message,
                            "relay.pipeline.stage_failed"
                        );
                        sink.stage(name, StageStatus::Failed, Some(elapsed));
                        self.rollback(&executed, ctx).await;
                        sink.emit(TurnEvent::done_error(
                            error.clone(),
                            ctx.usage,
                            ctx.served_model.clone(),
                        ));
                        return self.report(ctx, FinishReason::Error, Some(error));
                    }
                },
            }
        }

        let finish_reason = ctx
            .response
            .as_ref()
            .map_or(FinishReason::Stop, |r| r.finish_reason);
        sink.emit(TurnEvent::Done {
            finish_reason,
            usage: ctx.usage,
            model_id: ctx.served_model.clone(),
            error: None,
        });
        self.report(ctx, finish_reason, None)
    }

    /// Best-effort reverse rollback. Rollbacks must not fail; they get a
    /// short leash and any hang is logged and abandoned.
    async fn rollback(&self, executed: &[usize], ctx: &mut PipelineContext) {
        for &index in executed.iter().rev() {
            let stage = &self.stages[index];
            if tokio::time::timeout(Duration::from_secs(5), stage.rollback(ctx))
                .await
                .is_err()
            {
                tracing::warn!(stage = stage.name(), "relay.pipeline.rollback_timed_out");
            }
        }
    }

    fn report(
        &self,
        ctx: &PipelineContext,
        finish_reason: FinishReason,
        error: Option<GatewayError>,
    ) -> TurnReport {
        TurnReport {
            turn_id: ctx.turn_id.clone(),
            finish_reason,
            usage: ctx.usage,
            model_id: ctx.served_model.clone(),
            error,
            persisted: ctx.persisted,
            busy: false,
        }
    }
}

/// Drain a turn's events into an aggregated [`GatewayResponse`].
///
/// For non-streaming callers: text deltas concatenate, tool-call deltas
/// assemble by id, and the terminal event supplies finish reason, usage,
/// and model.
pub async fn collect_response(
    mut events: broadcast::Receiver<TurnEvent>,
) -> Result<GatewayResponse, GatewayError> {
    use relay_types::{Message, MessageContent, Role, ToolCall};

    let mut text = String::new();
    let mut calls: Vec<(String, String, String)> = Vec::new();

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => {
                return Err(GatewayError::internal("turn ended without a done event"));
            }
        };
        match event {
            TurnEvent::TextDelta { text: fragment } => text.push_str(&fragment),
            TurnEvent::ToolCallDelta { id, name, arguments_delta } => {
                match calls.iter_mut().find(|(call_id, _, _)| *call_id == id) {
                    Some((_, call_name, arguments)) => {
                        if call_name.is_empty() {
                            *call_name = name;
                        }
                        arguments.push_str(&arguments_delta);
                    }
                    None => calls.push((id, name, arguments_delta)),
                }
            }
            TurnEvent::Done { finish_reason, usage, model_id, error } => {
                if let Some(error) = error {
                    return Err(error);
                }
                let tool_calls = calls
                    .into_iter()
                    .map(|(id, name, raw)| ToolCall {
                        id,
                        name,
                        arguments: relay_providers::parse_tool_arguments(&raw),
                    })
                    .collect();
                return Ok(GatewayResponse {
                    message: Message {
                        role: Role::Assistant,
                        content: MessageContent::Text(text),
                        tool_calls,
                        tool_call_id: None,
                    },
                    finish_reason,
                    usage,
                    model_id,
                });
            }
            _ => {}
        }
    }
}
