//! Model-id normalization.
//!
//! Pricing feeds, provider catalogs, and routing all spell model ids
//! differently: `us.anthropic.claude-sonnet-4-5-v1:0`,
//! `azure/gpt-4o-mini`, `gemini-2.0-flash@001`. Cost lookup keys on the
//! normalized form: lowercase, no provider prefix, no version suffix.

const REGION_PREFIXES: &[&str] = &["us.", "eu.", "apac.", "global."];

const VENDOR_PREFIXES: &[&str] = &[
    "anthropic.",
    "amazon.",
    "meta.",
    "mistral.",
    "cohere.",
    "ai21.",
];

/// Normalize a model id for pricing lookup.
#[must_use]
pub fn normalize_model_id(model_id: &str) -> String {
    let mut id = model_id.trim().to_ascii_lowercase();

    // Path-style prefixes: azure/gpt-4o, models/gemini-2.0-flash.
    if let Some(pos) = id.rfind('/') {
        id = id[pos + 1..].to_string();
    }

    // Bedrock region prefix, then vendor prefix.
    for prefix in REGION_PREFIXES {
        if let Some(rest) = id.strip_prefix(prefix) {
            id = rest.to_string();
            break;
        }
    }
    for prefix in VENDOR_PREFIXES {
        if let Some(rest) = id.strip_prefix(prefix) {
            id = rest.to_string();
            break;
        }
    }

    // Vertex-style @001 revision.
    if let Some(pos) = id.find('@') {
        id.truncate(pos);
    }

    // Bedrock-style -v1:0 version suffix.
    if let Some(pos) = id.find(':') {
        id.truncate(pos);
        if let Some(dash) = id.rfind("-v") {
            if id[dash + 2..].chars().all(|c| c.is_ascii_digit()) && dash + 2 < id.len() {
                id.truncate(dash);
            }
        }
    }

    id
}
