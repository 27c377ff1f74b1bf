//! Error taxonomy for the gateway core.
//!
//! Failures are typed values, not panics. Every failure a stage can surface
//! classifies into one [`ErrorKind`]; the kind decides whether the turn dies
//! (fatal) or continues with a warning event. Component-level errors
//! (provider, store, MCP) carry their own detail and convert into
//! [`GatewayError`] at the pipeline boundary.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Closed set of failure kinds surfaced by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or malformed user, model, or messages.
    InvalidInput,
    /// Identity or policy rejected the turn.
    AuthDenied,
    /// MCP policy disallows a required tool.
    ToolDenied,
    /// All provider candidates exhausted.
    ProviderUnavailable,
    /// A single provider call exceeded its deadline.
    UpstreamTimeout,
    /// The KV cache is unreachable.
    CacheUnavailable,
    /// The vector backend is unreachable.
    VectorUnavailable,
    /// The turn could not be persisted.
    PersistFailed,
    /// Unclassified internal failure.
    Internal,
}

impl ErrorKind {
    /// Stable wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::AuthDenied => "auth_denied",
            ErrorKind::ToolDenied => "tool_denied",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::UpstreamTimeout => "upstream_timeout",
            ErrorKind::CacheUnavailable => "cache_unavailable",
            ErrorKind::VectorUnavailable => "vector_unavailable",
            ErrorKind::PersistFailed => "persist_failed",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether this kind terminates the turn.
    ///
    /// Non-fatal kinds log once, emit a warning event, and let the turn
    /// continue. `PersistFailed` is fatal for the turn record but the stream
    /// is still allowed to complete.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ErrorKind::CacheUnavailable | ErrorKind::VectorUnavailable
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified gateway failure.
///
/// The message is short and human-readable; internal detail stays in logs
/// and never reaches user-facing fields.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct GatewayError {
    /// The failure class.
    pub kind: ErrorKind,
    /// Short human-readable message.
    pub message: String,
}

impl GatewayError {
    /// Build an error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    /// Shorthand for [`ErrorKind::InvalidInput`].
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    /// Shorthand for [`ErrorKind::Internal`].
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

/// Errors from LLM provider calls.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Network-level failure (connect, DNS, reset).
    #[error("network error: {0}")]
    Network(String),
    /// Rate limited by the provider.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Suggested retry delay, if the API provided one.
        retry_after: Option<Duration>,
    },
    /// The call exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    /// Provider returned a 5xx-equivalent.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Authentication or authorization failure.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// Malformed request rejected by the provider.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Requested model does not exist at this provider.
    #[error("model not found: {0}")]
    ModelNotFound(String),
    /// Could not parse the provider's response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// The provider does not implement the requested capability.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Error mid-stream.
    #[error("stream error: {0}")]
    Stream(String),
}

impl ProviderError {
    /// Whether failover to another provider may succeed.
    ///
    /// Terminal errors (bad request, auth, unknown model) fail the same way
    /// everywhere and are not worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_)
                | ProviderError::RateLimited { .. }
                | ProviderError::Timeout(_)
                | ProviderError::ServiceUnavailable(_)
                | ProviderError::Stream(_)
        )
    }
}

/// Errors from the cache / lock / vector substrate.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend is not connected.
    #[error("disconnected")]
    Disconnected,
    /// A backend command failed.
    #[error("backend error: {0}")]
    Backend(String),
    /// Value (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Named collection does not exist.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    /// Vector dimension does not match the collection schema.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Dimension declared by the collection schema.
        expected: usize,
        /// Dimension of the offending vector.
        got: usize,
    },
}

/// Errors from the MCP tool layer.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// Access policy denies the tool.
    #[error("tool denied: {0}")]
    Denied(String),
    /// Tool or server not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// The orchestrator call failed.
    #[error("orchestrator error: {0}")]
    Orchestrator(String),
    /// Tool execution reported an error.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

/// Errors from persistence collaborators.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Record not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// The store rejected the write.
    #[error("write failed: {0}")]
    WriteFailed(String),
}

impl From<ProviderError> for GatewayError {
    fn from(err: ProviderError) -> Self {
        let kind = match &err {
            ProviderError::Timeout(_) => ErrorKind::UpstreamTimeout,
            _ => ErrorKind::ProviderUnavailable,
        };
        GatewayError::new(kind, err.to_string())
    }
}

impl From<McpError> for GatewayError {
    fn from(err: McpError) -> Self {
        let kind = match &err {
            McpError::Denied(_) => ErrorKind::ToolDenied,
            _ => ErrorKind::Internal,
        };
        GatewayError::new(kind, err.to_string())
    }
}

impl From<PersistError> for GatewayError {
    fn from(err: PersistError) -> Self {
        GatewayError::new(ErrorKind::PersistFailed, err.to_string())
    }
}
