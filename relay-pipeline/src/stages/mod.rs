//! The standard stage set, in execution order:
//! `[auth, memory, mcp, context, tiered_fc, route, llm, persist, metrics]`.

pub mod auth;
pub mod context;
pub mod llm;
pub mod mcp;
pub mod memory;
pub mod metrics;
pub mod persist;
pub mod route;
pub mod tiered;

pub use auth::AuthStage;
pub use context::ContextStage;
pub use llm::LlmStage;
pub use mcp::McpStage;
pub use memory::MemoryStage;
pub use metrics::MetricsStage;
pub use persist::PersistStage;
pub use route::RouteStage;
pub use tiered::TieredStage;

use relay_types::ToolSchema;

use crate::context::PipelineContext;

/// The turn's tool catalog as provider-ready schemas.
#[must_use]
pub fn tool_schemas(ctx: &PipelineContext) -> Vec<ToolSchema> {
    ctx.tools
        .iter()
        .map(|tool| ToolSchema {
            name: tool.id.clone(),
            description: tool.description.clone(),
            parameters: tool.input_schema.clone(),
        })
        .collect()
}
