#![deny(missing_docs)]
//! MCP tool layer: catalog, access control, execution.
//!
//! Tools live on external servers behind a tool orchestrator; the gateway
//! discovers them, indexes search tags, filters the catalog per user
//! policy at discovery time, and re-checks the policy at execution time.
//! Policy resolution fails secure; servers absent from the policy table
//! are explicitly permissive.

pub mod client;
pub mod index;
pub mod policy;
pub mod registry;
pub mod worker;

pub use client::{HttpToolOrchestrator, ServerInfo, ToolInfo, ToolOrchestrator};
pub use index::{generate_tags, index_tool};
pub use policy::{AccessController, InMemoryPolicyStore, PolicyStore, ToolAccess};
pub use registry::ServerRegistry;
pub use worker::{UserWorkerPool, WorkerSpawner};
