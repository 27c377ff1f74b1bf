//! Helpers shared by every adapter.

use relay_types::ProviderError;

/// Map an HTTP error status to a [`ProviderError`].
///
/// 429 and 5xx are retryable (failover candidates); 4xx are terminal.
pub(crate) fn classify_http_error(status: reqwest::StatusCode, body: String) -> ProviderError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return ProviderError::RateLimited { retry_after: None };
    }
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return ProviderError::Authentication(body);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return ProviderError::ModelNotFound(body);
    }
    if status.is_server_error() {
        return ProviderError::ServiceUnavailable(format!("HTTP {status}: {body}"));
    }
    ProviderError::InvalidRequest(format!("HTTP {status}: {body}"))
}

/// Map a reqwest transport error to a [`ProviderError`].
pub(crate) fn classify_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        return ProviderError::Timeout(std::time::Duration::from_secs(0));
    }
    ProviderError::Network(err.to_string())
}

/// Best-effort tool-argument parsing.
///
/// The contract is: a fragment that fails to parse yields `{}`, never the
/// raw string. An empty fragment is also `{}` (tools with no parameters).
#[must_use]
pub fn parse_tool_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    match serde_json::from_str(raw) {
        Ok(serde_json::Value::Object(map)) => serde_json::Value::Object(map),
        Ok(_) | Err(_) => {
            tracing::warn!(len = raw.len(), "relay.provider.tool_arguments_unparseable");
            serde_json::Value::Object(serde_json::Map::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, String::new()),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_http_error(reqwest::StatusCode::UNAUTHORIZED, String::new()),
            ProviderError::Authentication(_)
        ));
        assert!(matches!(
            classify_http_error(reqwest::StatusCode::BAD_GATEWAY, String::new()),
            ProviderError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            classify_http_error(reqwest::StatusCode::BAD_REQUEST, String::new()),
            ProviderError::InvalidRequest(_)
        ));
    }

    #[test]
    fn retryability_follows_classification() {
        assert!(
            classify_http_error(reqwest::StatusCode::SERVICE_UNAVAILABLE, String::new())
                .is_retryable()
        );
        assert!(!classify_http_error(reqwest::StatusCode::BAD_REQUEST, String::new()).is_retryable());
    }

    #[test]
    fn arguments_parse_contract() {
        assert_eq!(parse_tool_arguments(r#"{"a": 1}"#), serde_json::json!({"a": 1}));
        assert_eq!(parse_tool_arguments(""), serde_json::json!({}));
        assert_eq!(parse_tool_arguments("{broken"), serde_json::json!({}));
        // Non-object JSON is coerced to the empty object too.
        assert_eq!(parse_tool_arguments("[1, 2]"), serde_json::json!({}));
    }
}
