//! Tool tag generation.
//!
//! Tags are derived from the tool name at index time so catalog search can
//! match loose queries ("subs", "db list") without embedding lookups. The
//! literal tool name is deliberately excluded: exact-name matching is the
//! caller's first check, tags exist for everything else.

use std::collections::BTreeSet;

use relay_types::ToolDescriptor;

/// Common long-form words and their conventional short forms.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("subscription", "sub"),
    ("database", "db"),
    ("kubernetes", "k8s"),
    ("configuration", "config"),
    ("management", "mgmt"),
    ("resource", "res"),
    ("virtual", "vm"),
    ("deployment", "deploy"),
    ("repository", "repo"),
    ("document", "doc"),
    ("application", "app"),
];

/// Split a tool name into lowercase words across snake, kebab, and camel
/// boundaries.
fn split_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    for segment in name.split(['_', '-', '.', ' ']) {
        if segment.is_empty() {
            continue;
        }
        // Camel boundaries within the segment.
        let mut current = String::new();
        for ch in segment.chars() {
            if ch.is_uppercase() && !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            current.extend(ch.to_lowercase());
        }
        if !current.is_empty() {
            words.push(current);
        }
    }
    words
}

/// Strip inner vowels, keeping the first character.
fn strip_vowels(word: &str) -> String {
    let mut out = String::new();
    for (i, ch) in word.chars().enumerate() {
        if i == 0 || !matches!(ch, 'a' | 'e' | 'i' | 'o' | 'u') {
            out.push(ch);
        }
    }
    out
}

/// Generate search tags for a tool name.
///
/// Covers the individual words, plural/singular variants, conventional
/// abbreviations, vowel-stripped forms, and the first-letter acronym of
/// compound names. The literal name itself never appears.
#[must_use]
pub fn generate_tags(name: &str) -> Vec<String> {
    let literal = name.to_lowercase();
    let words = split_words(name);
    let mut tags: BTreeSet<String> = BTreeSet::new();

    for word in &words {
        tags.insert(word.clone());

        // Plural/singular variants.
        if let Some(singular) = word.strip_suffix('s') {
            if singular.len() > 2 {
                tags.insert(singular.to_string());
            }
        } else {
            tags.insert(format!("{word}s"));
        }

        // Conventional abbreviations.
        for (long, short) in ABBREVIATIONS {
            if word == long {
                tags.insert((*short).to_string());
            }
        }

        // Vowel-stripped form for longer words.
        if word.len() > 3 {
            let stripped = strip_vowels(word);
            if stripped.len() >= 2 && stripped != *word {
                tags.insert(stripped);
            }
        }
    }

    // First-letter acronym of compound names.
    if words.len() > 1 {
        let acronym: String = words.iter().filter_map(|w| w.chars().next()).collect();
        tags.insert(acronym);
    }

    tags.remove(&literal);
    tags.into_iter().collect()
}

/// Build an indexed descriptor for one tool.
#[must_use]
pub fn index_tool(
    server_id: &str,
    name: &str,
    description: &str,
    input_schema: serde_json::Value,
) -> ToolDescriptor {
    ToolDescriptor {
        id: ToolDescriptor::dotted_id(server_id, name),
        server_id: server_id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
        tags: generate_tags(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_splits() {
        let tags = generate_tags("subscription_list");
        assert!(tags.contains(&"subscription".to_string()));
        assert!(tags.contains(&"list".to_string()));
    }

    #[test]
    fn camel_and_kebab_split() {
        assert!(generate_tags("listDatabases").contains(&"databases".to_string()));
        assert!(generate_tags("create-cluster").contains(&"cluster".to_string()));
    }

    #[test]
    fn literal_name_is_never_a_tag() {
        for name in ["subscription_list", "deploy", "listDatabases"] {
            let tags = generate_tags(name);
            assert!(!tags.contains(&name.to_lowercase()), "{name} leaked into tags");
        }
    }

    #[test]
    fn abbreviations_present() {
        let tags = generate_tags("subscription_list");
        assert!(tags.contains(&"sub".to_string()));
        let tags = generate_tags("database_query");
        assert!(tags.contains(&"db".to_string()));
    }

    #[test]
    fn vowel_stripped_forms() {
        let tags = generate_tags("subscription_list");
        assert!(tags.contains(&"sbscrptn".to_string()));
        assert!(tags.contains(&"lst".to_string()));
    }

    #[test]
    fn plurals_both_ways() {
        let tags = generate_tags("subscription_list");
        assert!(tags.contains(&"subscriptions".to_string()));
        let tags = generate_tags("databases_list");
        assert!(tags.contains(&"database".to_string()));
    }

    #[test]
    fn compound_acronym() {
        let tags = generate_tags("subscription_list");
        assert!(tags.contains(&"sl".to_string()));
    }

    #[test]
    fn index_tool_builds_dotted_id() {
        let descriptor = index_tool(
            "azure",
            "subscription_list",
            "List subscriptions",
            serde_json::json!({"type": "object"}),
        );
        assert_eq!(descriptor.id, "azure.subscription_list");
        assert!(!descriptor.tags.is_empty());
    }
}
