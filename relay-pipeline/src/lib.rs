#![deny(missing_docs)]
//! The turn pipeline.
//!
//! A user turn enters as a [`relay_types::GatewayRequest`], runs through
//! the ordered stages `[auth, memory, mcp, context, tiered_fc, route, llm,
//! persist, metrics]` under a per-session distributed lock, and leaves as
//! a FIFO stream of [`relay_types::TurnEvent`]s terminated by `Done`.
//! Stage failures classify into the error taxonomy; non-fatal kinds warn
//! once and the turn continues, fatal kinds roll back executed stages in
//! reverse and close the stream with an error.

pub mod context;
pub mod events;
pub mod gateway;
pub mod orchestrator;
pub mod stage;
pub mod stages;
pub mod store;

pub use context::PipelineContext;
pub use events::EventSink;
pub use gateway::{Gateway, GatewayDeps, standard_stages};
pub use orchestrator::{
    Pipeline, PipelineConfig, TurnHandle, TurnReport, collect_response,
};
pub use stage::{FailurePolicy, Stage};
pub use store::{InMemoryTurnStore, InMemoryUserStore, TurnStore, UserStore};
